//! Workflow session model and the persistence seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::SessionMessage;

/// A persisted agent conversation for one project and agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSession {
    pub id: String,
    pub project_id: String,
    pub agent_id: String,
    /// Workflow to run; `None` selects the default workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    /// User-authored messages, oldest first.
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
    /// Requested integration providers.
    #[serde(default)]
    pub mcps: Vec<String>,
    #[serde(default)]
    pub custom_properties: serde_json::Map<String, serde_json::Value>,
    /// Conversation id at the LLM provider. Write-once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_session_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

/// Fields accepted when creating a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSession {
    pub project_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub workflow: Option<String>,
    #[serde(default)]
    pub mcps: Vec<String>,
    #[serde(default)]
    pub custom_properties: serde_json::Map<String, serde_json::Value>,
}

impl WorkflowSession {
    pub fn new(new: NewSession) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: new.project_id,
            agent_id: new.agent_id,
            workflow: new.workflow,
            messages: Vec::new(),
            mcps: new.mcps,
            custom_properties: new.custom_properties,
            llm_session_id: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the LLM session id unless one is already present.
    ///
    /// Returns `true` when this call stored the value.
    pub fn set_llm_session_id_once(&mut self, value: &str) -> bool {
        if self.llm_session_id.is_some() {
            return false;
        }
        self.llm_session_id = Some(value.to_string());
        self.updated_at = Utc::now();
        true
    }

    /// Append messages, keeping only the user-authored ones.
    pub fn append_user_messages(&mut self, messages: impl IntoIterator<Item = SessionMessage>) {
        self.messages
            .extend(messages.into_iter().filter(SessionMessage::is_user));
        self.updated_at = Utc::now();
    }

    /// Apply additive chat-request changes: user messages are appended,
    /// new mcps are added once, and custom properties are upserted.
    pub fn apply_patch(&mut self, patch: &SessionPatch) {
        self.append_user_messages(patch.messages.iter().cloned());
        for mcp in &patch.mcps {
            if !self.mcps.contains(mcp) {
                self.mcps.push(mcp.clone());
            }
        }
        for (key, value) in &patch.custom_properties {
            self.custom_properties.insert(key.clone(), value.clone());
        }
    }

    /// Apply an update on top of the stored record. A stored
    /// `llm_session_id` and the stored message history always survive, so a
    /// stale snapshot cannot drop messages appended after it was read.
    pub fn merged_onto(mut self, stored: &WorkflowSession) -> WorkflowSession {
        if stored.llm_session_id.is_some() {
            self.llm_session_id = stored.llm_session_id.clone();
        }
        self.messages = stored.messages.clone();
        self.created_at = stored.created_at;
        self.updated_at = Utc::now();
        self
    }

    /// Most recent user message, if any.
    pub fn latest_user_message(&self) -> Option<&SessionMessage> {
        self.messages.iter().rev().find(|m| m.is_user())
    }
}

/// Additive changes carried by one chat request.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub messages: Vec<SessionMessage>,
    pub mcps: Vec<String>,
    pub custom_properties: serde_json::Map<String, serde_json::Value>,
}

/// Persistence collaborator for workflow sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<WorkflowSession>>;

    async fn create(&self, session: WorkflowSession) -> Result<WorkflowSession>;

    /// Replace a stored session. Never overwrites a set `llm_session_id`
    /// and keeps the stored message history.
    async fn update(&self, session: &WorkflowSession) -> Result<()>;

    async fn list(&self) -> Result<Vec<WorkflowSession>>;

    /// Returns `false` when no such session existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Apply `patch` to the stored record in one atomic read-modify-write
    /// and return the result.
    async fn apply_patch(&self, id: &str, patch: SessionPatch) -> Result<WorkflowSession>;

    /// Append messages (user messages only) and return the updated session.
    async fn append_user_messages(
        &self,
        id: &str,
        messages: Vec<SessionMessage>,
    ) -> Result<WorkflowSession> {
        let patch = SessionPatch {
            messages,
            ..SessionPatch::default()
        };
        self.apply_patch(id, patch).await
    }

    /// First-write-wins. Later calls succeed without changing the value and
    /// return `false`.
    async fn set_llm_session_id(&self, id: &str, llm_session_id: &str) -> Result<bool>;
}
