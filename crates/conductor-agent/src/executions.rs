//! Registry of running executions with delayed workspace cleanup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::workspace::Workspace;

/// Source of delays, injected so cleanup can be driven by hand in tests.
pub trait Timer: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// [`Timer`] backed by `tokio::time::sleep`.
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionInfo {
    pub execution_id: String,
    pub session_id: String,
    pub workflow: String,
    pub workspace: PathBuf,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

struct Entry {
    info: ExecutionInfo,
    cancel: CancellationToken,
}

/// Tracks executions from registration until their workspace is reclaimed.
///
/// Finished executions stay listed (with their final status) until the
/// cleanup delay elapses and the workspace directory is removed.
#[derive(Clone)]
pub struct ExecutionRegistry {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    timer: Arc<dyn Timer>,
    cleanup_delay: Duration,
}

impl ExecutionRegistry {
    pub fn new(timer: Arc<dyn Timer>, cleanup_delay: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            timer,
            cleanup_delay,
        }
    }

    /// Record a new running execution and return its cancellation token.
    pub async fn register(
        &self,
        execution_id: &str,
        session_id: &str,
        workflow: &str,
        workspace: &Path,
    ) -> CancellationToken {
        let cancel = CancellationToken::new();
        let info = ExecutionInfo {
            execution_id: execution_id.to_string(),
            session_id: session_id.to_string(),
            workflow: workflow.to_string(),
            workspace: workspace.to_path_buf(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.entries.write().await.insert(
            execution_id.to_string(),
            Entry {
                info,
                cancel: cancel.clone(),
            },
        );
        info!(execution_id, session_id, workflow, "Execution registered");
        cancel
    }

    /// Cancel a running execution. Returns `false` if it is unknown or finished.
    pub async fn cancel(&self, execution_id: &str) -> bool {
        let entries = self.entries.read().await;
        match entries.get(execution_id) {
            Some(entry) if entry.info.status == ExecutionStatus::Running => {
                entry.cancel.cancel();
                info!(execution_id, "Execution cancel requested");
                true
            }
            _ => false,
        }
    }

    pub async fn cancel_all(&self) {
        for entry in self.entries.read().await.values() {
            entry.cancel.cancel();
        }
    }

    pub async fn get(&self, execution_id: &str) -> Option<ExecutionInfo> {
        self.entries
            .read()
            .await
            .get(execution_id)
            .map(|e| e.info.clone())
    }

    /// Running executions, oldest first.
    pub async fn active(&self) -> Vec<ExecutionInfo> {
        let mut active: Vec<_> = self
            .list()
            .await
            .into_iter()
            .filter(|i| i.status == ExecutionStatus::Running)
            .collect();
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        active
    }

    /// All tracked executions, oldest first.
    pub async fn list(&self) -> Vec<ExecutionInfo> {
        let mut all: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.info.clone())
            .collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        all
    }

    /// Mark an execution finished and schedule its workspace for deletion.
    ///
    /// Deletion runs on a spawned task after the cleanup delay; this call
    /// returns immediately.
    pub async fn complete(&self, execution_id: &str, status: ExecutionStatus) {
        let workspace = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(execution_id) else {
                warn!(execution_id, "Completing unknown execution");
                return;
            };
            if entry.info.status != ExecutionStatus::Running {
                return;
            }
            entry.info.status = status;
            entry.info.finished_at = Some(Utc::now());
            Workspace::existing(execution_id, entry.info.workspace.clone())
        };
        info!(execution_id, ?status, "Execution finished");

        let delay = self.timer.sleep(self.cleanup_delay);
        let entries = self.entries.clone();
        let execution_id = execution_id.to_string();
        tokio::spawn(async move {
            delay.await;
            match workspace.remove().await {
                Ok(()) => debug!(%execution_id, "Workspace removed"),
                Err(e) => warn!(%execution_id, %e, "Failed to remove workspace"),
            }
            entries.write().await.remove(&execution_id);
        });
    }
}
