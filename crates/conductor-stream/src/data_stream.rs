//! Legacy AI SDK v4 data stream: one `<prefix>:<json>\n` line per frame.
//!
//! | event        | frames                                            |
//! |--------------|---------------------------------------------------|
//! | text         | `9:{toolCallId, toolName:"text", args:{text}}`    |
//! | data         | `2:[...]`                                         |
//! | tool_call    | `9:{toolCallId, toolName, args}`                  |
//! | tool_result  | `a:{toolCallId, result}`                          |
//! | system       | `8:[payload]`                                     |
//! | annotation   | `8:[payload]`                                     |
//! | thinking     | `g:"text"` then `j:{signature}`                   |
//! | error        | `3:"message"`                                     |
//! | finish       | `d:{finishReason, usage:{promptTokens, completionTokens}}` |
//! | unrecognized | `2:[{kind, payload}]`                             |

use std::hash::{DefaultHasher, Hash, Hasher};

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use conductor_core::event::{AgentEvent, RawEvent, Usage};

use crate::Encoder;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallPart<'a> {
    tool_call_id: &'a str,
    tool_name: &'a str,
    args: &'a Value,
}

#[derive(Serialize)]
struct TextArgs<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TextCallPart<'a> {
    tool_call_id: &'a str,
    tool_name: &'static str,
    args: TextArgs<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolResultPart<'a> {
    tool_call_id: &'a str,
    result: &'a Value,
}

#[derive(Serialize)]
struct SignaturePart<'a> {
    signature: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UsagePart {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FinishPart<'a> {
    finish_reason: &'a str,
    usage: UsagePart,
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        warn!(%e, "Failed to serialize frame body");
        "null".into()
    })
}

fn frame<T: Serialize>(prefix: char, body: &T) -> String {
    format!("{prefix}:{}\n", to_json(body))
}

/// Split a legacy frame into its prefix and JSON body.
pub fn parse_frame(line: &str) -> Option<(char, Value)> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (prefix, body) = line.split_once(':')?;
    let mut chars = prefix.chars();
    let code = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    serde_json::from_str(body).ok().map(|value| (code, value))
}

/// Encoder for the legacy data stream.
#[derive(Debug, Default)]
pub struct DataStreamEncoder {
    finish: Option<AgentEvent>,
    text_counter: u64,
}

impl DataStreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Best-effort id for a text event without one: content hash plus a
    /// per-stream counter.
    fn text_id(&mut self, text: &str) -> String {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let id = format!("text-{}-{}", hasher.finish() % 1_000_000, self.text_counter);
        self.text_counter += 1;
        id
    }

    fn finish_frame(event: &AgentEvent) -> String {
        let (reason, usage) = match event {
            AgentEvent::Finish {
                finish_reason,
                usage,
                ..
            } => (finish_reason.as_str(), usage.unwrap_or_default()),
            _ => ("stop", Usage::default()),
        };
        frame(
            'd',
            &FinishPart {
                finish_reason: reason,
                usage: UsagePart {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                },
            },
        )
    }
}

impl Encoder for DataStreamEncoder {
    fn encode(&mut self, event: AgentEvent) -> Vec<String> {
        match event {
            AgentEvent::Text { text, id } => {
                let id = match id {
                    Some(id) => id,
                    None => self.text_id(&text),
                };
                vec![frame(
                    '9',
                    &TextCallPart {
                        tool_call_id: &id,
                        tool_name: "text",
                        args: TextArgs { text: &text },
                    },
                )]
            }
            AgentEvent::Data(value) => {
                let body = if value.is_array() {
                    value
                } else {
                    Value::Array(vec![value])
                };
                vec![frame('2', &body)]
            }
            AgentEvent::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => vec![frame(
                '9',
                &ToolCallPart {
                    tool_call_id: &tool_call_id,
                    tool_name: &tool_name,
                    args: &args,
                },
            )],
            AgentEvent::ToolResult {
                tool_call_id,
                result,
            } => vec![frame(
                'a',
                &ToolResultPart {
                    tool_call_id: &tool_call_id,
                    result: &result,
                },
            )],
            AgentEvent::System(payload) | AgentEvent::Annotation(payload) => {
                vec![frame('8', &[payload])]
            }
            AgentEvent::Thinking { text, signature } => vec![
                frame('g', &text),
                frame(
                    'j',
                    &SignaturePart {
                        signature: &signature,
                    },
                ),
            ],
            AgentEvent::Error { message } => vec![frame('3', &message)],
            finish @ AgentEvent::Finish { .. } => {
                if self.finish.is_none() {
                    self.finish = Some(finish);
                }
                Vec::new()
            }
            unknown @ AgentEvent::Unknown { .. } => {
                vec![frame('2', &[RawEvent::from(unknown)])]
            }
        }
    }

    fn close(&mut self) -> Vec<String> {
        let finish = self.finish.take().unwrap_or_else(AgentEvent::finish_default);
        vec![Self::finish_frame(&finish)]
    }
}
