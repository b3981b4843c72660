//! Session store implementations: in-memory and one-JSON-file-per-session.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::{ConductorError, Result};
use crate::session::{SessionPatch, SessionStore, WorkflowSession};

fn not_found(id: &str) -> ConductorError {
    ConductorError::NotFound(format!("session {id}"))
}

/// In-memory session store, used by tests and ephemeral deployments.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, WorkflowSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<WorkflowSession>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn create(&self, session: WorkflowSession) -> Result<WorkflowSession> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(ConductorError::Session(format!(
                "session {} already exists",
                session.id
            )));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn update(&self, session: &WorkflowSession) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions.get(&session.id).ok_or_else(|| not_found(&session.id))?;
        let merged = session.clone().merged_onto(stored);
        sessions.insert(session.id.clone(), merged);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WorkflowSession>> {
        let mut all: Vec<_> = self.sessions.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }

    async fn apply_patch(&self, id: &str, patch: SessionPatch) -> Result<WorkflowSession> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        session.apply_patch(&patch);
        Ok(session.clone())
    }

    async fn set_llm_session_id(&self, id: &str, llm_session_id: &str) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        Ok(session.set_llm_session_id_once(llm_session_id))
    }
}

/// File-based session store.
///
/// Layout: `<base>/<session_id>.json`. Read-modify-write cycles are
/// serialized through `write_lock` so write-once fields stay write-once.
pub struct JsonSessionStore {
    base: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonSessionStore {
    pub fn new(base: PathBuf) -> Self {
        Self {
            base,
            write_lock: Mutex::new(()),
        }
    }

    fn session_path(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ConductorError::Session(format!("invalid session id: {id}")));
        }
        Ok(self.base.join(format!("{id}.json")))
    }

    async fn read(&self, id: &str) -> Result<Option<WorkflowSession>> {
        let path = self.session_path(id)?;
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let session = serde_json::from_str(&data)
            .map_err(|e| ConductorError::Session(format!("corrupt session file {id}: {e}")))?;
        Ok(Some(session))
    }

    async fn write(&self, session: &WorkflowSession) -> Result<()> {
        tokio::fs::create_dir_all(&self.base).await?;
        let path = self.session_path(&session.id)?;
        let data = serde_json::to_string_pretty(session)?;
        // Atomic write: write to temp then rename
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for JsonSessionStore {
    async fn get(&self, id: &str) -> Result<Option<WorkflowSession>> {
        self.read(id).await
    }

    async fn create(&self, session: WorkflowSession) -> Result<WorkflowSession> {
        let _guard = self.write_lock.lock().await;
        if self.read(&session.id).await?.is_some() {
            return Err(ConductorError::Session(format!(
                "session {} already exists",
                session.id
            )));
        }
        self.write(&session).await?;
        debug!(session_id = %session.id, "Created session");
        Ok(session)
    }

    async fn update(&self, session: &WorkflowSession) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let stored = self
            .read(&session.id)
            .await?
            .ok_or_else(|| not_found(&session.id))?;
        self.write(&session.clone().merged_onto(&stored)).await
    }

    async fn list(&self) -> Result<Vec<WorkflowSession>> {
        if !self.base.exists() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<WorkflowSession>(&data) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    tracing::warn!(path = %path.display(), %e, "Skipping corrupt session file")
                }
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let path = self.session_path(id)?;
        if !path.exists() {
            return Ok(false);
        }
        tokio::fs::remove_file(&path).await?;
        debug!(session_id = %id, "Deleted session");
        Ok(true)
    }

    async fn apply_patch(&self, id: &str, patch: SessionPatch) -> Result<WorkflowSession> {
        let _guard = self.write_lock.lock().await;
        let mut session = self.read(id).await?.ok_or_else(|| not_found(id))?;
        session.apply_patch(&patch);
        self.write(&session).await?;
        Ok(session)
    }

    async fn set_llm_session_id(&self, id: &str, llm_session_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut session = self.read(id).await?.ok_or_else(|| not_found(id))?;
        if !session.set_llm_session_id_once(llm_session_id) {
            debug!(session_id = %id, "LLM session id already set, keeping first value");
            return Ok(false);
        }
        self.write(&session).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::session::NewSession;
    use crate::types::{Role, SessionMessage};

    fn test_session() -> WorkflowSession {
        WorkflowSession::new(NewSession {
            project_id: "proj".into(),
            agent_id: "agent".into(),
            mcps: vec!["github".into()],
            ..NewSession::default()
        })
    }

    #[tokio::test]
    async fn test_json_create_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSessionStore::new(dir.path().to_path_buf());

        let session = store.create(test_session()).await.unwrap();
        let loaded = store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.project_id, "proj");
        assert_eq!(loaded.mcps, vec!["github".to_string()]);
        assert!(loaded.is_active);
    }

    #[tokio::test]
    async fn test_json_duplicate_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSessionStore::new(dir.path().to_path_buf());
        let session = store.create(test_session()).await.unwrap();
        assert!(store.create(session).await.is_err());
    }

    #[tokio::test]
    async fn test_json_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSessionStore::new(dir.path().to_path_buf());

        let session = store.create(test_session()).await.unwrap();
        store.create(test_session()).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);

        assert!(store.delete(&session.id).await.unwrap());
        assert!(!store.delete(&session.id).await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_json_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSessionStore::new(dir.path().to_path_buf());
        assert!(store.get("../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_set_llm_session_id_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let json = JsonSessionStore::new(dir.path().to_path_buf());
        let memory = MemorySessionStore::new();
        let stores: [&dyn SessionStore; 2] = [&json, &memory];

        for store in stores {
            let session = store.create(test_session()).await.unwrap();
            assert!(store.set_llm_session_id(&session.id, "first").await.unwrap());
            assert!(!store.set_llm_session_id(&session.id, "second").await.unwrap());
            let loaded = store.get(&session.id).await.unwrap().unwrap();
            assert_eq!(loaded.llm_session_id.as_deref(), Some("first"));
        }
    }

    #[tokio::test]
    async fn test_concurrent_llm_session_id_writes_keep_one_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonSessionStore::new(dir.path().to_path_buf()));
        let session = store.create(test_session()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let id = session.id.clone();
            handles.push(tokio::spawn(async move {
                store.set_llm_session_id(&id, &format!("llm-{i}")).await.unwrap()
            }));
        }
        let results = futures::future::join_all(handles).await;
        let wins = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(wins, 1);

        let loaded = store.get(&session.id).await.unwrap().unwrap();
        assert!(loaded.llm_session_id.unwrap().starts_with("llm-"));
    }

    #[tokio::test]
    async fn test_update_does_not_overwrite_llm_session_id() {
        let store = MemorySessionStore::new();
        let session = store.create(test_session()).await.unwrap();
        store.set_llm_session_id(&session.id, "anchor").await.unwrap();

        let mut stale = session.clone();
        stale.llm_session_id = Some("replacement".into());
        store.update(&stale).await.unwrap();

        let loaded = store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.llm_session_id.as_deref(), Some("anchor"));
    }

    #[tokio::test]
    async fn test_stale_update_keeps_later_messages() {
        let dir = tempfile::tempdir().unwrap();
        let json = JsonSessionStore::new(dir.path().to_path_buf());
        let memory = MemorySessionStore::new();
        let stores: [&dyn SessionStore; 2] = [&json, &memory];

        for store in stores {
            let session = store.create(test_session()).await.unwrap();
            let mut snapshot = store
                .append_user_messages(&session.id, vec![SessionMessage::user("A")])
                .await
                .unwrap();
            store
                .append_user_messages(&session.id, vec![SessionMessage::user("B")])
                .await
                .unwrap();

            snapshot.mcps.push("jira".into());
            store.update(&snapshot).await.unwrap();

            let loaded = store.get(&session.id).await.unwrap().unwrap();
            let contents: Vec<_> = loaded.messages.iter().map(|m| m.content.as_str()).collect();
            assert_eq!(contents, vec!["A", "B"]);
            assert_eq!(loaded.mcps, vec!["github", "jira"]);
        }
    }

    #[tokio::test]
    async fn test_concurrent_patches_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonSessionStore::new(dir.path().to_path_buf()));
        let session = store.create(test_session()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let id = session.id.clone();
            handles.push(tokio::spawn(async move {
                let patch = SessionPatch {
                    messages: vec![SessionMessage::user(format!("m{i}"))],
                    mcps: vec![format!("mcp-{}", i % 2)],
                    ..SessionPatch::default()
                };
                store.apply_patch(&id, patch).await.unwrap()
            }));
        }
        futures::future::join_all(handles).await;

        let loaded = store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 8);
        assert_eq!(loaded.mcps.len(), 3);
    }

    #[tokio::test]
    async fn test_append_keeps_user_messages_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSessionStore::new(dir.path().to_path_buf());
        let session = store.create(test_session()).await.unwrap();

        let mut reply = SessionMessage::user("an answer");
        reply.role = Role::Assistant;
        let updated = store
            .append_user_messages(&session.id, vec![SessionMessage::user("question"), reply])
            .await
            .unwrap();
        assert_eq!(updated.messages.len(), 1);

        let loaded = store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.messages[0].content, "question");
    }

    #[tokio::test]
    async fn test_append_to_missing_session() {
        let store = MemorySessionStore::new();
        let err = store
            .append_user_messages("missing", vec![SessionMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::NotFound(_)));
    }
}
