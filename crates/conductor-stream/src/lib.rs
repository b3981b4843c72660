//! Protocol encoders for agent event streams.
//!
//! An [`Encoder`] turns [`AgentEvent`]s into wire frames, one event at a
//! time. Both protocols share the finish rule: the first `finish` event is
//! held and written when the source ends (a default one is synthesized when
//! none arrived), so the finish frame is always the last substantive frame.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use conductor_core::event::AgentEvent;

pub mod data_stream;
pub mod sse;
pub mod ui_message;

pub use data_stream::DataStreamEncoder;
pub use ui_message::UiMessageEncoder;

/// Stateful per-stream translator from events to frames.
///
/// Each returned `String` is one complete frame.
pub trait Encoder: Send {
    fn encode(&mut self, event: AgentEvent) -> Vec<String>;

    /// Frames to write once the source is exhausted. Called exactly once.
    fn close(&mut self) -> Vec<String>;
}

impl Encoder for Box<dyn Encoder> {
    fn encode(&mut self, event: AgentEvent) -> Vec<String> {
        (**self).encode(event)
    }

    fn close(&mut self) -> Vec<String> {
        (**self).close()
    }
}

struct EncodeState<E> {
    encoder: E,
    events: futures::stream::BoxStream<'static, AgentEvent>,
    pending: VecDeque<String>,
    closed: bool,
}

/// Encode an event stream lazily.
///
/// The next event is pulled only after every frame of the previous one was
/// taken, so at most one event's frames are buffered. Dropping the returned
/// stream drops `events`.
pub fn encode_stream<E, S>(encoder: E, events: S) -> impl Stream<Item = String> + Send + 'static
where
    E: Encoder + 'static,
    S: Stream<Item = AgentEvent> + Send + 'static,
{
    let state = EncodeState {
        encoder,
        events: events.boxed(),
        pending: VecDeque::new(),
        closed: false,
    };
    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((frame, state));
            }
            if state.closed {
                return None;
            }
            match state.events.next().await {
                Some(event) => {
                    let frames = state.encoder.encode(event);
                    state.pending.extend(frames);
                }
                None => {
                    state.closed = true;
                    let frames = state.encoder.close();
                    state.pending.extend(frames);
                }
            }
        }
    })
}

/// Encode a finite list of events in one go.
pub fn encode_all<E: Encoder>(mut encoder: E, events: impl IntoIterator<Item = AgentEvent>) -> Vec<String> {
    let mut frames = Vec::new();
    for event in events {
        frames.extend(encoder.encode(event));
    }
    frames.extend(encoder.close());
    frames
}

/// Wire protocol selected by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StreamProtocol {
    /// Legacy AI SDK v4 data stream.
    DataStream,
    /// UI message stream over SSE.
    #[default]
    UiMessage,
}

impl StreamProtocol {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "v4" | "data" | "data-stream" => Some(StreamProtocol::DataStream),
            "v5" | "ui" | "ui-message" => Some(StreamProtocol::UiMessage),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamProtocol::DataStream => "v4",
            StreamProtocol::UiMessage => "v5",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            StreamProtocol::DataStream => "application/octet-stream",
            StreamProtocol::UiMessage => "text/event-stream",
        }
    }

    /// A fresh encoder for one stream.
    pub fn encoder(self) -> Box<dyn Encoder> {
        match self {
            StreamProtocol::DataStream => Box::new(DataStreamEncoder::new()),
            StreamProtocol::UiMessage => Box::new(UiMessageEncoder::new()),
        }
    }
}

impl fmt::Display for StreamProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown stream protocol: {s}"))
    }
}

impl TryFrom<String> for StreamProtocol {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StreamProtocol> for String {
    fn from(protocol: StreamProtocol) -> Self {
        protocol.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_protocol_parse() {
        assert_eq!(StreamProtocol::parse("v4"), Some(StreamProtocol::DataStream));
        assert_eq!(StreamProtocol::parse("UI"), Some(StreamProtocol::UiMessage));
        assert_eq!(StreamProtocol::parse("v6"), None);
        assert_eq!(StreamProtocol::default(), StreamProtocol::UiMessage);
        let parsed: StreamProtocol = serde_json::from_value(json!("data")).unwrap();
        assert_eq!(parsed, StreamProtocol::DataStream);
        assert!(serde_json::from_value::<StreamProtocol>(json!("nope")).is_err());
    }

    #[tokio::test]
    async fn test_encode_stream_matches_encode_all() {
        let text = |text: &str, id: &str| AgentEvent::Text {
            text: text.to_string(),
            id: Some(id.to_string()),
        };
        let events = vec![text("a", "t1"), AgentEvent::error("b"), text("c", "t2")];
        let expected = encode_all(
            UiMessageEncoder::with_message_id("m1"),
            events.clone(),
        );
        let streamed: Vec<String> = encode_stream(
            UiMessageEncoder::with_message_id("m1"),
            futures::stream::iter(events),
        )
        .collect()
        .await;
        assert_eq!(streamed, expected);
        assert_eq!(streamed.last(), Some(&sse::DONE_FRAME.to_string()));
    }

    #[tokio::test]
    async fn test_encode_stream_pulls_lazily() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let events = futures::stream::iter(0..100).map(move |i| {
            counter.fetch_add(1, Ordering::SeqCst);
            AgentEvent::text(format!("t{i}"))
        });
        let mut frames = Box::pin(encode_stream(DataStreamEncoder::new(), events));
        frames.next().await.unwrap();
        frames.next().await.unwrap();
        assert_eq!(pulled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_boxed_encoder_from_protocol() {
        let frames: Vec<String> = encode_stream(
            StreamProtocol::DataStream.encoder(),
            futures::stream::iter(vec![AgentEvent::error("boom")]),
        )
        .collect()
        .await;
        assert_eq!(frames[0], "3:\"boom\"\n");
        assert!(frames[1].starts_with("d:"));
    }
}
