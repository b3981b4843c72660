//! Prompt composition for the coding agent.

use std::path::Path;

use serde_json::{Map, Value};

use conductor_core::session::WorkflowSession;

/// Inputs to the system prompt.
pub struct PromptContext<'a> {
    pub identity: &'a str,
    pub workspace: &'a Path,
    /// Files under `inputs/`, relative to it.
    pub inputs: &'a [String],
    pub mcps: &'a [String],
    pub custom_properties: &'a Map<String, Value>,
}

/// Build the system prompt appended to the agent's own.
pub fn build_system_prompt(ctx: &PromptContext<'_>) -> String {
    let mut parts = vec![ctx.identity.to_string()];

    let now = chrono::Utc::now();
    parts.push(format!("Current time: {}", now.format("%Y-%m-%d %H:%M:%S UTC")));

    parts.push(format!(
        "Workspace directory: {}\nInput files are under inputs/. Write any artifacts under outputs/.",
        ctx.workspace.display()
    ));

    if !ctx.inputs.is_empty() {
        let listing: Vec<String> = ctx.inputs.iter().map(|f| format!("- inputs/{f}")).collect();
        parts.push(format!("Input files:\n{}", listing.join("\n")));
    }

    if !ctx.mcps.is_empty() {
        parts.push(format!("Enabled integrations: {}", ctx.mcps.join(", ")));
    }

    if !ctx.custom_properties.is_empty() {
        let props: Vec<String> = ctx
            .custom_properties
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("- {key}: {s}"),
                other => format!("- {key}: {other}"),
            })
            .collect();
        parts.push(format!("Project properties:\n{}", props.join("\n")));
    }

    parts.join("\n\n")
}

/// Build the user prompt.
///
/// A fresh conversation gets every user message in order. When resuming,
/// the provider already holds the history, so only the latest one is sent.
pub fn build_user_prompt(session: &WorkflowSession, resuming: bool) -> String {
    if resuming {
        return session
            .latest_user_message()
            .map(|m| m.content.clone())
            .unwrap_or_default();
    }
    session
        .messages
        .iter()
        .filter(|m| m.is_user())
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
