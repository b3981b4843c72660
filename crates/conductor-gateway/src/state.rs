//! Gateway shared state.

use std::sync::Arc;
use std::time::Instant;

use conductor_agent::executions::{ExecutionRegistry, TokioTimer};
use conductor_agent::{RunnerDeps, WorkflowRegistry};
use conductor_core::config::Config;
use conductor_core::error::{ConductorError, Result};
use conductor_core::session::SessionStore;
use conductor_providers::LlmClient;
use conductor_providers::credentials::CredentialStore;
use conductor_providers::integrations::IntegrationRegistry;

/// Shared state accessible from all handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub sessions: Arc<dyn SessionStore>,
    pub llm: Arc<dyn LlmClient>,
    pub credentials: Arc<dyn CredentialStore>,
    pub integrations: Arc<IntegrationRegistry>,
    pub workflows: Arc<WorkflowRegistry>,
    pub executions: ExecutionRegistry,
    pub started_at: Instant,
}

impl GatewayState {
    /// Build state with the built-in workflows and integrations.
    ///
    /// Fails if either registry has conflicting ids.
    pub fn new(
        config: Arc<Config>,
        sessions: Arc<dyn SessionStore>,
        llm: Arc<dyn LlmClient>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        let integrations = IntegrationRegistry::with_builtins()
            .map_err(|e| ConductorError::Integration(e.to_string()))?;
        let workflows = WorkflowRegistry::with_builtins()?;
        let executions = ExecutionRegistry::new(Arc::new(TokioTimer), config.cleanup_delay());
        Ok(Self {
            config,
            sessions,
            llm,
            credentials,
            integrations: Arc::new(integrations),
            workflows: Arc::new(workflows),
            executions,
            started_at: Instant::now(),
        })
    }

    pub fn runner_deps(&self) -> RunnerDeps {
        RunnerDeps {
            config: self.config.clone(),
            llm: self.llm.clone(),
            sessions: self.sessions.clone(),
            executions: self.executions.clone(),
        }
    }
}
