//! Agent events: the unit of activity streamed out of a workflow run.
//!
//! Events travel as `{ "kind": "...", "payload": {...} }`. Decoding never
//! fails: missing or mistyped payload fields fall back to empty values, and
//! kinds this build does not know become [`AgentEvent::Unknown`] so they can
//! still be forwarded by the encoders.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Token accounting attached to a finish event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Recognized event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Text,
    ToolCall,
    ToolResult,
    Thinking,
    System,
    Annotation,
    Data,
    Error,
    Finish,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::Text,
        EventKind::ToolCall,
        EventKind::ToolResult,
        EventKind::Thinking,
        EventKind::System,
        EventKind::Annotation,
        EventKind::Data,
        EventKind::Error,
        EventKind::Finish,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Text => "text",
            EventKind::ToolCall => "tool_call",
            EventKind::ToolResult => "tool_result",
            EventKind::Thinking => "thinking",
            EventKind::System => "system",
            EventKind::Annotation => "annotation",
            EventKind::Data => "data",
            EventKind::Error => "error",
            EventKind::Finish => "finish",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }
}

/// One unit of agent activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawEvent", into = "RawEvent")]
pub enum AgentEvent {
    Text {
        text: String,
        id: Option<String>,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: Value,
    },
    ToolResult {
        tool_call_id: String,
        result: Value,
    },
    Thinking {
        text: String,
        signature: String,
    },
    System(Value),
    Annotation(Value),
    Data(Value),
    Error {
        message: String,
    },
    Finish {
        finish_reason: String,
        usage: Option<Usage>,
        /// Extra upstream metadata (session id, cost, ...).
        metadata: Map<String, Value>,
    },
    /// A kind this build does not recognize, kept verbatim.
    Unknown {
        kind: String,
        payload: Value,
    },
}

impl AgentEvent {
    pub fn text(text: impl Into<String>) -> Self {
        AgentEvent::Text {
            text: text.into(),
            id: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        AgentEvent::Error {
            message: message.into(),
        }
    }

    /// The finish event synthesized when a stream ends without one.
    pub fn finish_default() -> Self {
        AgentEvent::Finish {
            finish_reason: "stop".into(),
            usage: Some(Usage::default()),
            metadata: Map::new(),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            AgentEvent::Text { .. } => EventKind::Text.as_str(),
            AgentEvent::ToolCall { .. } => EventKind::ToolCall.as_str(),
            AgentEvent::ToolResult { .. } => EventKind::ToolResult.as_str(),
            AgentEvent::Thinking { .. } => EventKind::Thinking.as_str(),
            AgentEvent::System(_) => EventKind::System.as_str(),
            AgentEvent::Annotation(_) => EventKind::Annotation.as_str(),
            AgentEvent::Data(_) => EventKind::Data.as_str(),
            AgentEvent::Error { .. } => EventKind::Error.as_str(),
            AgentEvent::Finish { .. } => EventKind::Finish.as_str(),
            AgentEvent::Unknown { kind, .. } => kind,
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, AgentEvent::Finish { .. })
    }
}

/// The `{kind, payload}` wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

/// First string found under any of `keys`, or empty.
fn str_field(payload: &Value, keys: &[&str]) -> String {
    opt_str_field(payload, keys).unwrap_or_default()
}

fn opt_str_field(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| payload.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

fn value_field(payload: &Value, keys: &[&str]) -> Value {
    keys.iter()
        .find_map(|k| payload.get(*k))
        .filter(|v| !v.is_null())
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()))
}

fn u64_field(payload: &Value, keys: &[&str]) -> u64 {
    keys.iter()
        .find_map(|k| payload.get(*k).and_then(Value::as_u64))
        .unwrap_or(0)
}

fn parse_usage(payload: &Value) -> Option<Usage> {
    let usage = payload.get("usage").filter(|u| u.is_object())?;
    Some(Usage {
        prompt_tokens: u64_field(usage, &["prompt_tokens", "promptTokens"]),
        completion_tokens: u64_field(usage, &["completion_tokens", "completionTokens"]),
    })
}

impl From<RawEvent> for AgentEvent {
    fn from(raw: RawEvent) -> Self {
        let p = &raw.payload;
        match EventKind::parse(&raw.kind) {
            Some(EventKind::Text) => AgentEvent::Text {
                text: p
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| str_field(p, &["text"])),
                id: opt_str_field(p, &["id", "tool_call_id", "toolCallId"]),
            },
            Some(EventKind::ToolCall) => AgentEvent::ToolCall {
                tool_call_id: str_field(p, &["tool_call_id", "toolCallId", "id"]),
                tool_name: str_field(p, &["tool_name", "toolName", "name"]),
                args: value_field(p, &["args", "input"]),
            },
            Some(EventKind::ToolResult) => AgentEvent::ToolResult {
                tool_call_id: str_field(p, &["tool_call_id", "toolCallId", "id"]),
                result: value_field(p, &["result", "output"]),
            },
            Some(EventKind::Thinking) => AgentEvent::Thinking {
                text: str_field(p, &["text", "thinking"]),
                signature: str_field(p, &["signature"]),
            },
            Some(EventKind::System) => AgentEvent::System(raw.payload),
            Some(EventKind::Annotation) => AgentEvent::Annotation(raw.payload),
            Some(EventKind::Data) => AgentEvent::Data(raw.payload),
            Some(EventKind::Error) => AgentEvent::Error {
                message: p
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| str_field(p, &["message", "error"])),
            },
            Some(EventKind::Finish) => AgentEvent::Finish {
                finish_reason: opt_str_field(p, &["finish_reason", "finishReason"])
                    .unwrap_or_else(|| "stop".into()),
                usage: parse_usage(p),
                metadata: p
                    .get("metadata")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            },
            None => AgentEvent::Unknown {
                kind: raw.kind,
                payload: raw.payload,
            },
        }
    }
}

impl From<AgentEvent> for RawEvent {
    fn from(event: AgentEvent) -> Self {
        let kind = event.kind().to_string();
        let payload = match event {
            AgentEvent::Text { text, id } => match id {
                Some(id) => json!({ "text": text, "id": id }),
                None => json!({ "text": text }),
            },
            AgentEvent::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => json!({ "tool_call_id": tool_call_id, "tool_name": tool_name, "args": args }),
            AgentEvent::ToolResult {
                tool_call_id,
                result,
            } => json!({ "tool_call_id": tool_call_id, "result": result }),
            AgentEvent::Thinking { text, signature } => {
                json!({ "text": text, "signature": signature })
            }
            AgentEvent::System(v) | AgentEvent::Annotation(v) | AgentEvent::Data(v) => v,
            AgentEvent::Error { message } => json!({ "message": message }),
            AgentEvent::Finish {
                finish_reason,
                usage,
                metadata,
            } => {
                let mut payload = json!({ "finish_reason": finish_reason });
                if let Some(usage) = usage {
                    payload["usage"] = json!(usage);
                }
                if !metadata.is_empty() {
                    payload["metadata"] = Value::Object(metadata);
                }
                payload
            }
            AgentEvent::Unknown { payload, .. } => payload,
        };
        RawEvent { kind, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(v: Value) -> AgentEvent {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_text_event_from_wire() {
        let event = parse(json!({"kind": "text", "payload": {"text": "hi"}}));
        assert_eq!(event, AgentEvent::text("hi"));
    }

    #[test]
    fn test_unknown_kind_is_kept() {
        let event = parse(json!({"kind": "frobnicate", "payload": {"x": 1}}));
        assert_eq!(
            event,
            AgentEvent::Unknown {
                kind: "frobnicate".into(),
                payload: json!({"x": 1}),
            }
        );
        assert_eq!(event.kind(), "frobnicate");
    }

    #[test]
    fn test_missing_fields_get_defaults() {
        let event = parse(json!({"kind": "tool_call", "payload": {}}));
        assert_eq!(
            event,
            AgentEvent::ToolCall {
                tool_call_id: String::new(),
                tool_name: String::new(),
                args: json!({}),
            }
        );

        // No payload at all
        let event = parse(json!({"kind": "error"}));
        assert_eq!(event, AgentEvent::error(""));

        // Mistyped field
        let event = parse(json!({"kind": "thinking", "payload": {"text": 5, "signature": "s"}}));
        assert_eq!(
            event,
            AgentEvent::Thinking {
                text: String::new(),
                signature: "s".into(),
            }
        );
    }

    #[test]
    fn test_finish_defaults_to_stop() {
        let event = parse(json!({"kind": "finish", "payload": {}}));
        match event {
            AgentEvent::Finish {
                finish_reason,
                usage,
                ..
            } => {
                assert_eq!(finish_reason, "stop");
                assert!(usage.is_none());
            }
            other => panic!("expected finish, got {other:?}"),
        }
    }

    #[test]
    fn test_finish_accepts_camel_case_usage() {
        let event = parse(json!({
            "kind": "finish",
            "payload": {"finishReason": "length", "usage": {"promptTokens": 3, "completionTokens": 4}}
        }));
        assert_eq!(
            event,
            AgentEvent::Finish {
                finish_reason: "length".into(),
                usage: Some(Usage {
                    prompt_tokens: 3,
                    completion_tokens: 4,
                }),
                metadata: Map::new(),
            }
        );
    }

    #[test]
    fn test_wire_shape_serialization() {
        let event = AgentEvent::ToolResult {
            tool_call_id: "c1".into(),
            result: json!("ok"),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "tool_result");
        assert_eq!(value["payload"]["tool_call_id"], "c1");
        assert_eq!(value["payload"]["result"], "ok");
    }

    #[test]
    fn test_kind_names_are_parseable() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert!(EventKind::parse("frobnicate").is_none());
    }
}
