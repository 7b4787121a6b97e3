//! Maps `sdk.message` payloads (§4.4.1 / §4.5) onto [`session_core::EventKind`].
//! The `content` array walk is grounded on the teacher's
//! `wrapper_events::claude_code_adapter::classify_assistant`, generalized
//! from a coarse `NormalizedEventKind` tag into full per-block events
//! (`AssistantText`, `AssistantThinking`, `ToolUse`, `ToolResult`) since C5
//! here must carry the actual payload, not just its shape.

use serde_json::Value;
use session_core::{ContentBlock, EventKind};

/// One `sdk.message` frame can map to more than one event (e.g. an
/// `assistant` message with several content blocks), so normalization
/// always returns a vec, never a single item.
pub fn normalize_sdk_message(payload: &Value) -> Vec<EventKind> {
    match payload.get("type").and_then(Value::as_str) {
        Some("system") => normalize_system(payload),
        Some("assistant") => normalize_assistant(payload),
        Some("user") => normalize_user(payload),
        Some("result") => vec![normalize_result(payload)],
        Some("stream_event") => normalize_stream_event(payload),
        _ => Vec::new(),
    }
}

fn normalize_system(payload: &Value) -> Vec<EventKind> {
    match payload.get("subtype").and_then(Value::as_str) {
        Some("init") => {
            let model = payload
                .get("model")
                .and_then(Value::as_str)
                .map(str::to_string);
            let tools = payload
                .get("tools")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            vec![EventKind::SystemInit { model, tools }]
        }
        _ => Vec::new(),
    }
}

fn normalize_assistant(payload: &Value) -> Vec<EventKind> {
    let Some(content) = payload
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    content
        .iter()
        .filter_map(|block| {
            let ty = block.get("type").and_then(Value::as_str)?;
            match ty {
                "text" => Some(EventKind::AssistantText {
                    text: block.get("text").and_then(Value::as_str)?.to_string(),
                }),
                "thinking" => Some(EventKind::AssistantThinking {
                    text: block.get("thinking").and_then(Value::as_str)?.to_string(),
                }),
                "tool_use" => Some(EventKind::ToolUse {
                    id: block.get("id").and_then(Value::as_str)?.to_string(),
                    name: block.get("name").and_then(Value::as_str)?.to_string(),
                    input: block.get("input").cloned().unwrap_or(Value::Null),
                    parent_tool_use_id: None,
                }),
                _ => None,
            }
        })
        .collect()
}

fn normalize_user(payload: &Value) -> Vec<EventKind> {
    let Some(content) = payload
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    content
        .iter()
        .filter_map(|block| {
            let ty = block.get("type").and_then(Value::as_str)?;
            if ty != "tool_result" {
                return None;
            }
            let tool_use_id = block.get("tool_use_id").and_then(Value::as_str)?.to_string();
            let is_error = block
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let content = match block.get("content") {
                Some(Value::String(text)) => vec![ContentBlock::Text { text: text.clone() }],
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|item| {
                        if item.get("type").and_then(Value::as_str) == Some("text") {
                            Some(ContentBlock::Text {
                                text: item.get("text").and_then(Value::as_str)?.to_string(),
                            })
                        } else {
                            None
                        }
                    })
                    .collect(),
                _ => Vec::new(),
            };
            Some(EventKind::ToolResult {
                tool_use_id,
                content,
                is_error,
            })
        })
        .collect()
}

fn normalize_result(payload: &Value) -> EventKind {
    EventKind::TurnResult {
        subtype: payload
            .get("subtype")
            .and_then(Value::as_str)
            .unwrap_or("success")
            .to_string(),
        num_turns: payload.get("num_turns").and_then(Value::as_u64),
        cost_usd: payload.get("total_cost_usd").and_then(Value::as_f64),
        usage: payload.get("usage").cloned(),
    }
}

fn normalize_stream_event(payload: &Value) -> Vec<EventKind> {
    let Some(event) = payload.get("event") else {
        return Vec::new();
    };
    let Some(event_type) = event.get("type").and_then(Value::as_str) else {
        return Vec::new();
    };

    match event_type {
        "content_block_delta" => {
            let text = event
                .get("delta")
                .and_then(|d| d.get("text"))
                .and_then(Value::as_str);
            text.map(|text| vec![EventKind::StreamDelta { text: text.to_string() }])
                .unwrap_or_default()
        }
        "error" => vec![EventKind::Error {
            message: event
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown stream error")
                .to_string(),
            detail: event.get("error").cloned(),
        }],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scenario_a_happy_path_events() {
        let init = json!({"type":"system","subtype":"init","model":"claude-sonnet-4-5","tools":["Read","Bash"]});
        let events = normalize_sdk_message(&init);
        assert!(matches!(events[0], EventKind::SystemInit { .. }));

        let assistant = json!({"type":"assistant","message":{"content":[{"type":"text","text":"Hello!"}]}});
        let events = normalize_sdk_message(&assistant);
        match &events[0] {
            EventKind::AssistantText { text } => assert_eq!(text, "Hello!"),
            _ => panic!("expected assistant text"),
        }

        let result = json!({"type":"result","subtype":"success","num_turns":1,"total_cost_usd":0.001});
        let events = normalize_sdk_message(&result);
        match &events[0] {
            EventKind::TurnResult {
                num_turns,
                cost_usd,
                ..
            } => {
                assert_eq!(*num_turns, Some(1));
                assert_eq!(*cost_usd, Some(0.001));
            }
            _ => panic!("expected turn result"),
        }
    }

    #[test]
    fn tool_use_and_tool_result_round_trip_ids() {
        let assistant = json!({
            "type": "assistant",
            "message": {"content": [{"type":"tool_use","id":"tu_1","name":"Bash","input":{"command":"ls"}}]}
        });
        let events = normalize_sdk_message(&assistant);
        let id = match &events[0] {
            EventKind::ToolUse { id, .. } => id.clone(),
            _ => panic!("expected tool use"),
        };

        let user = json!({
            "type": "user",
            "message": {"content": [{"type":"tool_result","tool_use_id": id, "content": "ok", "is_error": false}]}
        });
        let events = normalize_sdk_message(&user);
        match &events[0] {
            EventKind::ToolResult { tool_use_id, .. } => assert_eq!(tool_use_id, &id),
            _ => panic!("expected tool result"),
        }
    }
}
