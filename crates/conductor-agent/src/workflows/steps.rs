//! Phase steps shared by the built-in workflows.

use std::sync::LazyLock;

use futures::StreamExt;
use regex::Regex;
use serde_json::json;
use tracing::{debug, info, warn};

use conductor_core::event::AgentEvent;
use conductor_core::session::WorkflowSession;
use conductor_providers::LlmRequest;

use crate::prompt::{PromptContext, build_system_prompt, build_user_prompt};
use crate::runner::{Cancelled, EventSink};
use crate::sdk::{chunk_session_id, map_chunk};
use crate::workflows::RunContext;
use crate::workspace::{OUTPUTS_DIR, safe_join};

pub const RESPONSE_FILE: &str = "response.md";

static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)@([A-Za-z0-9_][A-Za-z0-9_./-]*)").expect("static regex"));

/// `@path` mentions across the session's user messages, first occurrence order.
pub fn mentioned_paths(session: &WorkflowSession) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for message in session.messages.iter().filter(|m| m.is_user()) {
        for cap in MENTION_RE.captures_iter(&message.content) {
            let path = cap[1].trim_end_matches(['.', ',']).to_string();
            if !path.is_empty() && !paths.contains(&path) {
                paths.push(path);
            }
        }
    }
    paths
}

/// Copy attachments and `@path`-mentioned project files into `inputs/`.
pub async fn materialize_inputs(ctx: &mut RunContext, sink: &EventSink) -> anyhow::Result<()> {
    let mut copied = Vec::new();

    let uploads = ctx.config.uploads_dir();
    let attachments: Vec<_> = ctx
        .session
        .messages
        .iter()
        .filter(|m| m.is_user())
        .flat_map(|m| m.attachments.iter().cloned())
        .collect();
    for attachment in attachments {
        let src = safe_join(&uploads, &attachment.path)?;
        if !src.is_file() {
            anyhow::bail!("Attachment '{}' not found in uploads", attachment.name);
        }
        ctx.workspace.copy_input(&src, &attachment.name).await?;
        copied.push(attachment.name);
    }

    let mentions = mentioned_paths(&ctx.session);
    if !mentions.is_empty() {
        match ctx.config.project_source_dir(&ctx.session.project_id) {
            Some(source) => {
                for rel in mentions {
                    let src = match safe_join(&source, &rel) {
                        Ok(src) => src,
                        Err(e) => {
                            warn!(path = %rel, %e, "Ignoring mention outside the project");
                            continue;
                        }
                    };
                    if !src.is_file() {
                        debug!(path = %rel, "Mentioned path is not a project file");
                        continue;
                    }
                    ctx.workspace.copy_input(&src, &rel).await?;
                    copied.push(rel);
                }
            }
            None => debug!("No project source configured, ignoring mentions"),
        }
    }

    copied.sort();
    copied.dedup();
    info!(execution_id = %ctx.execution_id, count = copied.len(), "Inputs materialized");
    ctx.output.inputs = copied.clone();
    sink.emit(AgentEvent::System(json!({
        "phase": "prepare",
        "status": "inputs",
        "files": copied,
    })))
    .await
}

/// Run the coding agent and forward its events.
///
/// The collaborator's session id is persisted the first time a chunk
/// reports one. Cancellation is checked while waiting for every chunk, and
/// returning drops the chunk stream, which stops the agent.
pub async fn run_llm(ctx: &mut RunContext, sink: &EventSink, identity: &str) -> anyhow::Result<()> {
    let resume = ctx.session.llm_session_id.clone();
    let system_prompt = build_system_prompt(&PromptContext {
        identity,
        workspace: ctx.workspace.path(),
        inputs: &ctx.output.inputs,
        mcps: &ctx.session.mcps,
        custom_properties: &ctx.session.custom_properties,
    });
    let prompt = build_user_prompt(&ctx.session, resume.is_some());
    if prompt.trim().is_empty() {
        anyhow::bail!("No user message to send");
    }

    let llm = ctx.config.llm.clone().unwrap_or_default();
    let request = LlmRequest {
        prompt,
        system_prompt: Some(system_prompt),
        cwd: ctx.workspace.path().to_path_buf(),
        resume_session_id: resume,
        model: llm.model,
        max_turns: llm.max_turns,
        permission_mode: llm.permission_mode,
        allowed_tools: llm.allowed_tools,
        mcp_servers: ctx.mcp_config.clone(),
    };

    let cancel = sink.cancellation().clone();
    info!(
        execution_id = %ctx.execution_id,
        client = ctx.llm.id(),
        resume = request.resume_session_id.is_some(),
        "Querying coding agent"
    );
    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Cancelled.into()),
        started = ctx.llm.query(&request) => started?,
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled.into()),
            next = stream.next() => next,
        };
        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return Err(e.context("Coding agent failed")),
            None => break,
        };

        if ctx.output.llm_session_id.is_none() {
            if let Some(id) = chunk_session_id(&chunk) {
                let id = id.to_string();
                let stored = ctx.sessions.set_llm_session_id(&ctx.session.id, &id).await?;
                debug!(session_id = %ctx.session.id, llm_session_id = %id, stored, "LLM session id reported");
                ctx.output.llm_session_id = Some(id);
            }
        }

        for event in map_chunk(&chunk) {
            match &event {
                AgentEvent::Text { text, .. } => {
                    if !ctx.output.text.is_empty() {
                        ctx.output.text.push_str("\n\n");
                    }
                    ctx.output.text.push_str(text);
                }
                AgentEvent::ToolCall { .. } => ctx.output.tool_calls += 1,
                _ => {}
            }
            sink.emit(event).await?;
        }
    }
    Ok(())
}

/// Save the agent's text as `outputs/response.md`.
pub async fn write_response(ctx: &mut RunContext) -> anyhow::Result<()> {
    if ctx.output.text.trim().is_empty() {
        return Ok(());
    }
    ctx.workspace
        .write_output(RESPONSE_FILE, &ctx.output.text)
        .await?;
    ctx.output.outputs.push(format!("{OUTPUTS_DIR}/{RESPONSE_FILE}"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::session::NewSession;
    use conductor_core::types::SessionMessage;

    #[test]
    fn test_mentioned_paths() {
        let mut session = WorkflowSession::new(NewSession::default());
        session.append_user_messages([
            SessionMessage::user("Look at @src/main.rs and @src/lib.rs."),
            SessionMessage::user("email me@example.com, then @src/main.rs again"),
            SessionMessage::user("@Cargo.toml"),
        ]);
        assert_eq!(
            mentioned_paths(&session),
            vec!["src/main.rs", "src/lib.rs", "Cargo.toml"]
        );
    }
}
