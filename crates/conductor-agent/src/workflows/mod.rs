//! Workflows: the phase bodies a runner drives, and their registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};

use conductor_core::config::Config;
use conductor_core::error::{ConductorError, Result};
use conductor_core::session::{SessionStore, WorkflowSession};
use conductor_providers::LlmClient;

use crate::runner::EventSink;
use crate::workspace::Workspace;

pub mod assistant;
pub mod steps;
pub mod test_generation;

pub use assistant::AssistantWorkflow;
pub use test_generation::TestGenerationWorkflow;

pub const DEFAULT_WORKFLOW: &str = assistant::ID;

/// What a run has produced so far.
#[derive(Debug, Default)]
pub struct RunOutput {
    /// Concatenated assistant text.
    pub text: String,
    pub tool_calls: usize,
    pub llm_session_id: Option<String>,
    /// Files copied into `inputs/`, relative to it.
    pub inputs: Vec<String>,
    /// Artifacts written during the run, relative to the workspace.
    pub outputs: Vec<String>,
    /// Workflow-specific fields merged into the final report.
    pub report: Map<String, Value>,
}

/// Everything a phase can touch during one execution.
pub struct RunContext {
    pub execution_id: String,
    pub session: WorkflowSession,
    pub workspace: Workspace,
    pub config: Arc<Config>,
    pub llm: Arc<dyn LlmClient>,
    pub sessions: Arc<dyn SessionStore>,
    /// Rendered `{ "mcpServers": {...} }`, if any integration is enabled.
    pub mcp_config: Option<Value>,
    pub started_at: Instant,
    pub output: RunOutput,
}

/// An agent workflow. Phases run strictly in order; an error from any of
/// them fails the run.
///
/// The default phase bodies cover the common case: copy referenced inputs,
/// run the agent, save its response.
#[async_trait]
pub trait Workflow: Send + Sync {
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    /// Opening line of the system prompt.
    fn identity(&self) -> &str;

    async fn prepare(&self, ctx: &mut RunContext, sink: &EventSink) -> anyhow::Result<()> {
        steps::materialize_inputs(ctx, sink).await
    }

    async fn execute(&self, ctx: &mut RunContext, sink: &EventSink) -> anyhow::Result<()> {
        steps::run_llm(ctx, sink, self.identity()).await
    }

    async fn finalize(&self, ctx: &mut RunContext, _sink: &EventSink) -> anyhow::Result<()> {
        steps::write_response(ctx).await
    }
}

/// Explicit table of workflows, built once at startup.
pub struct WorkflowRegistry {
    workflows: HashMap<String, Arc<dyn Workflow>>,
    default_id: String,
}

impl WorkflowRegistry {
    /// Fails on duplicate ids or when `default_id` is not among `workflows`.
    pub fn new(workflows: Vec<Arc<dyn Workflow>>, default_id: &str) -> Result<Self> {
        let mut table = HashMap::new();
        for workflow in workflows {
            let id = workflow.id().to_string();
            if table.insert(id.clone(), workflow).is_some() {
                return Err(ConductorError::Workflow(format!(
                    "workflow '{id}' registered twice"
                )));
            }
        }
        if !table.contains_key(default_id) {
            return Err(ConductorError::Workflow(format!(
                "default workflow '{default_id}' is not registered"
            )));
        }
        Ok(Self {
            workflows: table,
            default_id: default_id.to_string(),
        })
    }

    pub fn with_builtins() -> Result<Self> {
        Self::new(
            vec![
                Arc::new(AssistantWorkflow),
                Arc::new(TestGenerationWorkflow),
            ],
            DEFAULT_WORKFLOW,
        )
    }

    /// Look up a workflow; `None` selects the default.
    pub fn resolve(&self, id: Option<&str>) -> Option<Arc<dyn Workflow>> {
        self.workflows.get(id.unwrap_or(&self.default_id)).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.workflows.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins() {
        let registry = WorkflowRegistry::with_builtins().unwrap();
        assert_eq!(registry.list(), vec!["assistant", "test_generation"]);
        assert_eq!(registry.resolve(None).unwrap().id(), "assistant");
        assert_eq!(
            registry.resolve(Some("test_generation")).unwrap().id(),
            "test_generation"
        );
        assert!(registry.resolve(Some("nope")).is_none());
    }

    #[test]
    fn test_duplicate_ids_fail() {
        let result = WorkflowRegistry::new(
            vec![Arc::new(AssistantWorkflow), Arc::new(AssistantWorkflow)],
            DEFAULT_WORKFLOW,
        );
        assert!(matches!(result, Err(ConductorError::Workflow(_))));
    }

    #[test]
    fn test_missing_default_fails() {
        let result = WorkflowRegistry::new(vec![Arc::new(TestGenerationWorkflow)], "assistant");
        assert!(result.is_err());
    }
}
