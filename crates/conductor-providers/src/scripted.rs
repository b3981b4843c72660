//! A client that replays a fixed list of chunks instead of calling an agent.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use crate::{ChunkStream, LlmClient, LlmRequest};

/// Replays scripted SDK chunks. Used by tests and offline demos.
#[derive(Default)]
pub struct ScriptedClient {
    chunks: Vec<Value>,
    query_error: Option<String>,
    stream_error: Option<String>,
    hang: bool,
    requests: Mutex<Vec<LlmRequest>>,
    dropped: Arc<AtomicBool>,
}

/// Sets the shared flag when the chunk stream is dropped.
struct DropFlag(Arc<AtomicBool>);

impl DropFlag {
    fn touch(&self) {}
}

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl ScriptedClient {
    pub fn new(chunks: Vec<Value>) -> Self {
        Self {
            chunks,
            ..Self::default()
        }
    }

    /// `query` itself fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            query_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Yield `chunks`, then an error item.
    pub fn with_stream_error(mut self, message: &str) -> Self {
        self.stream_error = Some(message.to_string());
        self
    }

    /// Never end the stream after the scripted chunks.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Whether a stream handed out by this client has been dropped.
    pub fn stream_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn query(&self, request: &LlmRequest) -> anyhow::Result<ChunkStream> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(message) = &self.query_error {
            anyhow::bail!("{message}");
        }

        let mut items: Vec<anyhow::Result<Value>> = self.chunks.iter().cloned().map(Ok).collect();
        if let Some(message) = &self.stream_error {
            items.push(Err(anyhow::anyhow!("{message}")));
        }

        let flag = DropFlag(self.dropped.clone());
        let scripted = futures::stream::iter(items).inspect(move |_| flag.touch());
        if self.hang {
            Ok(Box::pin(scripted.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(scripted))
        }
    }
}
