//! External collaborators for Conductor.
//!
//! The LLM coding agent is reached through the [`LlmClient`] trait, which
//! yields the agent SDK's raw JSON chunks. Integration providers (GitHub,
//! Jira, ...) are rendered into MCP server entries by the
//! [`integrations::IntegrationRegistry`], using tokens from a
//! [`credentials::CredentialStore`].

use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

pub mod claude_code;
pub mod credentials;
pub mod integrations;
pub mod scripted;

/// Raw chunks from the coding-agent SDK, one JSON object per item.
pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<serde_json::Value>> + Send>>;

/// One outbound call to the coding agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Working directory for the agent (the execution workspace).
    pub cwd: PathBuf,
    /// Continue an existing provider-side conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    /// `{ "mcpServers": {...} }` document, when any integration is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_servers: Option<serde_json::Value>,
}

/// The coding-agent collaborator.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Identifier used in logs (e.g., "claude-code").
    fn id(&self) -> &str;

    /// Start a query. Dropping the returned stream cancels the call.
    async fn query(&self, request: &LlmRequest) -> anyhow::Result<ChunkStream>;
}
