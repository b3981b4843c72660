//! UI message stream: JSON chunks in SSE data frames, ended by `[DONE]`.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use conductor_core::event::AgentEvent;

use crate::Encoder;
use crate::sse::{DONE_FRAME, data_frame};

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
enum UiChunk<'a> {
    Start {
        message_id: &'a str,
    },
    TextStart {
        id: &'a str,
    },
    TextDelta {
        id: &'a str,
        delta: &'a str,
    },
    TextEnd {
        id: &'a str,
    },
    StartStep,
    ToolInputStart {
        tool_call_id: &'a str,
        tool_name: &'a str,
    },
    ToolInputAvailable {
        tool_call_id: &'a str,
        tool_name: &'a str,
        input: &'a Value,
    },
    ToolOutputAvailable {
        tool_call_id: &'a str,
        output: &'a Value,
    },
    FinishStep,
    ReasoningStart {
        id: &'a str,
    },
    ReasoningDelta {
        id: &'a str,
        delta: &'a str,
    },
    ReasoningEnd {
        id: &'a str,
    },
    Error {
        error_text: &'a str,
    },
}

/// `data-<name>` chunk wrapping an opaque payload.
#[derive(Serialize)]
struct DataChunk<'a> {
    #[serde(rename = "type")]
    kind: String,
    data: &'a Value,
}

/// `finish` chunk with upstream metadata merged in.
#[derive(Serialize)]
struct FinishChunk<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    metadata: &'a Map<String, Value>,
}

fn render<T: Serialize>(chunk: &T) -> String {
    match serde_json::to_string(chunk) {
        Ok(json) => data_frame(&json),
        Err(e) => {
            warn!(%e, "Failed to serialize UI chunk");
            data_frame("null")
        }
    }
}

/// Encoder for the UI message stream.
///
/// Tool steps opened by `tool_call` are closed only by `tool_result`; an
/// unmatched call leaves its step open and is reported at close.
#[derive(Debug)]
pub struct UiMessageEncoder {
    message_id: String,
    started: bool,
    finish: Option<AgentEvent>,
    open_steps: usize,
    reasoning_counter: u64,
}

impl Default for UiMessageEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl UiMessageEncoder {
    pub fn new() -> Self {
        Self::with_message_id(&format!("msg-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn with_message_id(message_id: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            started: false,
            finish: None,
            open_steps: 0,
            reasoning_counter: 0,
        }
    }

    /// Tool steps started but not yet finished.
    pub fn open_steps(&self) -> usize {
        self.open_steps
    }

    fn start(&mut self, frames: &mut Vec<String>) {
        if !self.started {
            self.started = true;
            frames.push(render(&UiChunk::Start {
                message_id: &self.message_id,
            }));
        }
    }

    fn data(name: &str, payload: &Value) -> String {
        render(&DataChunk {
            kind: format!("data-{name}"),
            data: payload,
        })
    }
}

impl Encoder for UiMessageEncoder {
    fn encode(&mut self, event: AgentEvent) -> Vec<String> {
        let mut frames = Vec::with_capacity(4);
        self.start(&mut frames);

        if event.is_finish() {
            if self.finish.is_none() {
                self.finish = Some(event);
            }
            return frames;
        }

        match &event {
            AgentEvent::Text { text, id } => {
                let id = match id {
                    Some(id) => id.clone(),
                    None => format!("text-{}", uuid::Uuid::new_v4().simple()),
                };
                frames.push(render(&UiChunk::TextStart { id: &id }));
                if !text.is_empty() {
                    frames.push(render(&UiChunk::TextDelta {
                        id: &id,
                        delta: text,
                    }));
                }
                frames.push(render(&UiChunk::TextEnd { id: &id }));
            }
            AgentEvent::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => {
                self.open_steps += 1;
                frames.push(render(&UiChunk::StartStep));
                frames.push(render(&UiChunk::ToolInputStart {
                    tool_call_id,
                    tool_name,
                }));
                frames.push(render(&UiChunk::ToolInputAvailable {
                    tool_call_id,
                    tool_name,
                    input: args,
                }));
            }
            AgentEvent::ToolResult {
                tool_call_id,
                result,
            } => {
                frames.push(render(&UiChunk::ToolOutputAvailable {
                    tool_call_id,
                    output: result,
                }));
                frames.push(render(&UiChunk::FinishStep));
                self.open_steps = self.open_steps.saturating_sub(1);
            }
            AgentEvent::System(payload) => frames.push(Self::data("system", payload)),
            AgentEvent::Annotation(payload) => frames.push(Self::data("annotation", payload)),
            AgentEvent::Data(payload) => frames.push(Self::data("data", payload)),
            AgentEvent::Thinking { text, signature } => {
                let id = if signature.is_empty() {
                    self.reasoning_counter += 1;
                    format!("reasoning-{}", self.reasoning_counter)
                } else {
                    signature.clone()
                };
                frames.push(render(&UiChunk::ReasoningStart { id: &id }));
                frames.push(render(&UiChunk::ReasoningDelta {
                    id: &id,
                    delta: text,
                }));
                frames.push(render(&UiChunk::ReasoningEnd { id: &id }));
            }
            AgentEvent::Error { message } => {
                frames.push(render(&UiChunk::Error {
                    error_text: message,
                }));
            }
            AgentEvent::Finish { .. } => {}
            AgentEvent::Unknown { kind, payload } => frames.push(Self::data(kind, payload)),
        }
        frames
    }

    fn close(&mut self) -> Vec<String> {
        let mut frames = Vec::with_capacity(3);
        self.start(&mut frames);

        if self.open_steps > 0 {
            warn!(
                open_steps = self.open_steps,
                message_id = %self.message_id,
                "Stream closed with tool steps still open"
            );
        }

        let mut metadata = match self.finish.take() {
            Some(AgentEvent::Finish { metadata, .. }) => metadata,
            _ => Map::new(),
        };
        metadata.remove("type");
        frames.push(render(&FinishChunk {
            kind: "finish",
            metadata: &metadata,
        }));
        frames.push(DONE_FRAME.to_string());
        frames
    }
}
