//! Mapping from coding-agent SDK chunks to [`AgentEvent`]s.
//!
//! The SDK emits `system`, `assistant`, `user` and `result` chunks. Assistant
//! chunks carry `text`, `thinking` and `tool_use` content blocks; user chunks
//! carry `tool_result` blocks. Everything else is SDK-internal and dropped.

use serde_json::{Map, Value, json};
use tracing::debug;

use conductor_core::event::{AgentEvent, Usage};

/// The collaborator's conversation id, when the chunk carries one.
pub fn chunk_session_id(chunk: &Value) -> Option<&str> {
    chunk
        .get("session_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Translate one chunk into zero or more events, in content order.
pub fn map_chunk(chunk: &Value) -> Vec<AgentEvent> {
    let chunk_type = chunk.get("type").and_then(Value::as_str).unwrap_or("");
    match chunk_type {
        "system" => vec![map_system(chunk)],
        "assistant" => content_blocks(chunk)
            .iter()
            .filter_map(map_assistant_block)
            .collect(),
        "user" => content_blocks(chunk)
            .iter()
            .filter_map(map_user_block)
            .collect(),
        "result" => map_result(chunk),
        other => {
            debug!(chunk_type = other, "Dropping unrecognized SDK chunk");
            Vec::new()
        }
    }
}

fn content_blocks(chunk: &Value) -> &[Value] {
    chunk
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn str_of<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

fn map_system(chunk: &Value) -> AgentEvent {
    let mut payload = Map::new();
    if let Some(fields) = chunk.as_object() {
        for (key, value) in fields {
            if key != "type" {
                payload.insert(key.clone(), value.clone());
            }
        }
    }
    AgentEvent::System(Value::Object(payload))
}

fn map_assistant_block(block: &Value) -> Option<AgentEvent> {
    match str_of(block, "type") {
        "text" => Some(AgentEvent::text(str_of(block, "text"))),
        "thinking" => Some(AgentEvent::Thinking {
            text: str_of(block, "thinking").to_string(),
            signature: str_of(block, "signature").to_string(),
        }),
        "tool_use" => Some(AgentEvent::ToolCall {
            tool_call_id: str_of(block, "id").to_string(),
            tool_name: str_of(block, "name").to_string(),
            args: block.get("input").cloned().unwrap_or_else(|| json!({})),
        }),
        other => {
            debug!(block_type = other, "Dropping unrecognized assistant block");
            None
        }
    }
}

fn map_user_block(block: &Value) -> Option<AgentEvent> {
    match str_of(block, "type") {
        "tool_result" => {
            let content = block.get("content").cloned().unwrap_or(Value::Null);
            let result = if block.get("is_error").and_then(Value::as_bool) == Some(true) {
                json!({ "isError": true, "content": content })
            } else {
                content
            };
            Some(AgentEvent::ToolResult {
                tool_call_id: str_of(block, "tool_use_id").to_string(),
                result,
            })
        }
        other => {
            debug!(block_type = other, "Dropping unrecognized user block");
            None
        }
    }
}

fn map_result(chunk: &Value) -> Vec<AgentEvent> {
    let failed = chunk.get("is_error").and_then(Value::as_bool) == Some(true)
        || chunk
            .get("subtype")
            .and_then(Value::as_str)
            .is_some_and(|s| s != "success");

    let usage = chunk.get("usage").map(|u| Usage {
        prompt_tokens: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
        completion_tokens: u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
    });

    let mut metadata = Map::new();
    let fields = [
        ("session_id", "sessionId"),
        ("duration_ms", "durationMs"),
        ("num_turns", "numTurns"),
        ("total_cost_usd", "totalCostUsd"),
    ];
    for (from, to) in fields {
        if let Some(value) = chunk.get(from).filter(|v| !v.is_null()) {
            metadata.insert(to.to_string(), value.clone());
        }
    }

    let mut events = Vec::with_capacity(2);
    if failed {
        let message = chunk
            .get("result")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Agent run ended with {}", str_of(chunk, "subtype")));
        events.push(AgentEvent::error(message));
    }
    events.push(AgentEvent::Finish {
        finish_reason: if failed { "error" } else { "stop" }.into(),
        usage: Some(usage.unwrap_or_default()),
        metadata,
    });
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_chunk_keeps_fields() {
        let events = map_chunk(&json!({
            "type": "system", "subtype": "init", "session_id": "s-1", "model": "sonnet"
        }));
        assert_eq!(
            events,
            vec![AgentEvent::System(
                json!({"subtype": "init", "session_id": "s-1", "model": "sonnet"})
            )]
        );
    }

    #[test]
    fn test_assistant_blocks_in_order() {
        let events = map_chunk(&json!({
            "type": "assistant",
            "message": {"content": [
                {"type": "thinking", "thinking": "hmm", "signature": "sig-1"},
                {"type": "text", "text": "Reading the file"},
                {"type": "tool_use", "id": "toolu_1", "name": "Read", "input": {"path": "a.rs"}},
                {"type": "server_tool_use", "id": "x"}
            ]}
        }));
        assert_eq!(
            events,
            vec![
                AgentEvent::Thinking {
                    text: "hmm".into(),
                    signature: "sig-1".into()
                },
                AgentEvent::text("Reading the file"),
                AgentEvent::ToolCall {
                    tool_call_id: "toolu_1".into(),
                    tool_name: "Read".into(),
                    args: json!({"path": "a.rs"}),
                },
            ]
        );
    }

    #[test]
    fn test_tool_result_blocks() {
        let events = map_chunk(&json!({
            "type": "user",
            "message": {"content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "fn main() {}"},
                {"type": "tool_result", "tool_use_id": "toolu_2", "content": "denied", "is_error": true}
            ]}
        }));
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            AgentEvent::ToolResult {
                tool_call_id: "toolu_1".into(),
                result: json!("fn main() {}")
            }
        );
        assert_eq!(
            events[1],
            AgentEvent::ToolResult {
                tool_call_id: "toolu_2".into(),
                result: json!({"isError": true, "content": "denied"})
            }
        );
    }

    #[test]
    fn test_success_result_becomes_finish() {
        let chunk = json!({
            "type": "result", "subtype": "success", "is_error": false,
            "session_id": "s-1", "duration_ms": 1200, "num_turns": 3,
            "total_cost_usd": 0.02,
            "usage": {"input_tokens": 100, "output_tokens": 40}
        });
        let events = map_chunk(&chunk);
        let mut metadata = Map::new();
        metadata.insert("sessionId".into(), json!("s-1"));
        metadata.insert("durationMs".into(), json!(1200));
        metadata.insert("numTurns".into(), json!(3));
        metadata.insert("totalCostUsd".into(), json!(0.02));
        assert_eq!(
            events,
            vec![AgentEvent::Finish {
                finish_reason: "stop".into(),
                usage: Some(Usage {
                    prompt_tokens: 100,
                    completion_tokens: 40
                }),
                metadata,
            }]
        );
        assert_eq!(chunk_session_id(&chunk), Some("s-1"));
    }

    #[test]
    fn test_failed_result_reports_error_then_finish() {
        let events = map_chunk(&json!({"type": "result", "subtype": "error_max_turns", "is_error": true}));
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            AgentEvent::error("Agent run ended with error_max_turns")
        );
        assert!(matches!(
            &events[1],
            AgentEvent::Finish { finish_reason, .. } if finish_reason == "error"
        ));
    }

    #[test]
    fn test_unknown_chunks_are_dropped() {
        assert!(map_chunk(&json!({"type": "stream_event"})).is_empty());
        assert!(map_chunk(&json!({"no_type": true})).is_empty());
        assert_eq!(chunk_session_id(&json!({"session_id": ""})), None);
    }
}
