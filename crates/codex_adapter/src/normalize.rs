//! Maps Codex app-server notifications (§4.4.2 / §4.5) onto
//! [`session_core::EventKind`]. Generalizes the teacher's coarse
//! `AppNotification::{TaskComplete,Item,Error,Raw}` bucket (`codex::mcp::
//! protocol::AppNotification`) into the full per-method table the spec
//! names, since C5 here must distinguish `agentMessage` from `reasoning`
//! from `commandExecution` rather than collapsing them into one `Item`
//! payload.

use session_core::EventKind;

use crate::protocol::{Item, ItemNotification, ThreadStartedNotification, TokenUsageNotification, TurnCompletedNotification};

pub fn normalize_thread_started(note: &ThreadStartedNotification) -> Vec<EventKind> {
    vec![EventKind::SystemInit {
        model: note.model.clone(),
        tools: note.tools.clone(),
    }]
}

/// `item/started` only ever produces `ToolUse` events — agent text and
/// reasoning only become events once they're `item/completed` (Codex
/// streams them as a single completed item, not incremental deltas; §4.5
/// lists no `StreamDelta` mapping for Codex).
pub fn normalize_item_started(note: &ItemNotification) -> Vec<EventKind> {
    match &note.item {
        Item::CommandExecution { id, command, .. } => vec![EventKind::ToolUse {
            id: id.clone(),
            name: "commandExecution".to_string(),
            input: serde_json::json!({ "command": command }),
            parent_tool_use_id: None,
        }],
        Item::FileChange { id, changes, .. } => vec![EventKind::ToolUse {
            id: id.clone(),
            name: "fileChange".to_string(),
            input: changes.clone(),
            parent_tool_use_id: None,
        }],
        Item::McpToolCall { id, server, tool, arguments, .. } => vec![EventKind::ToolUse {
            id: id.clone(),
            name: format!("{}::{}", server.as_deref().unwrap_or(""), tool.as_deref().unwrap_or("")),
            input: arguments.clone().unwrap_or(serde_json::Value::Null),
            parent_tool_use_id: None,
        }],
        Item::AgentMessage { .. } | Item::Reasoning { .. } | Item::Plan { .. } | Item::Unknown => Vec::new(),
    }
}

pub fn normalize_item_completed(note: &ItemNotification) -> Vec<EventKind> {
    match &note.item {
        Item::AgentMessage { text, .. } => vec![EventKind::AssistantText { text: text.clone() }],
        Item::Reasoning { summary, content, .. } => {
            let text = summary.clone().or_else(|| content.clone()).unwrap_or_default();
            vec![EventKind::AssistantThinking { text }]
        }
        Item::Plan { entries } => vec![EventKind::Plan {
            entries: entries.clone(),
        }],
        Item::CommandExecution {
            id,
            aggregated_output,
            exit_code,
            ..
        } => {
            let is_error = exit_code.map(|code| code != 0).unwrap_or(false);
            vec![EventKind::ToolResult {
                tool_use_id: id.clone(),
                content: vec![session_core::ContentBlock::Text {
                    text: aggregated_output.clone().unwrap_or_default(),
                }],
                is_error,
            }]
        }
        Item::FileChange { id, changes, status } => vec![EventKind::ToolResult {
            tool_use_id: id.clone(),
            content: vec![session_core::ContentBlock::Text {
                text: changes.to_string(),
            }],
            is_error: status.as_deref() == Some("failed"),
        }],
        Item::McpToolCall { id, result, status, .. } => vec![EventKind::ToolResult {
            tool_use_id: id.clone(),
            content: vec![session_core::ContentBlock::Text {
                text: result.clone().unwrap_or(serde_json::Value::Null).to_string(),
            }],
            is_error: status.as_deref() == Some("failed"),
        }],
        Item::Unknown => Vec::new(),
    }
}

pub fn normalize_token_usage(_note: &TokenUsageNotification) -> Vec<EventKind> {
    // Token usage is folded into the eventual `TurnResult.usage` rather than
    // surfaced as its own event kind; §4.5 names it only as an input to
    // assembling `turn/completed`.
    Vec::new()
}

pub fn normalize_turn_completed(note: &TurnCompletedNotification) -> Vec<EventKind> {
    vec![EventKind::TurnResult {
        subtype: note.subtype.clone().unwrap_or_else(|| "success".to_string()),
        num_turns: None,
        cost_usd: note.cost_usd,
        usage: note.usage.clone(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ItemNotification;
    use serde_json::json;

    #[test]
    fn command_execution_started_yields_tool_use() {
        let note: ItemNotification = serde_json::from_value(json!({
            "threadId": "t1",
            "turnId": "tu1",
            "item": {"type": "commandExecution", "id": "item_1", "command": "ls -la"}
        }))
        .unwrap();
        let events = normalize_item_started(&note);
        match &events[0] {
            EventKind::ToolUse { id, name, .. } => {
                assert_eq!(id, "item_1");
                assert_eq!(name, "commandExecution");
            }
            _ => panic!("expected tool use"),
        }
    }

    #[test]
    fn command_execution_completed_yields_tool_result() {
        let note: ItemNotification = serde_json::from_value(json!({
            "threadId": "t1",
            "turnId": "tu1",
            "item": {"type": "commandExecution", "id": "item_1", "aggregatedOutput": "ok", "exitCode": 0}
        }))
        .unwrap();
        let events = normalize_item_completed(&note);
        match &events[0] {
            EventKind::ToolResult { tool_use_id, is_error, .. } => {
                assert_eq!(tool_use_id, "item_1");
                assert!(!is_error);
            }
            _ => panic!("expected tool result"),
        }
    }

    #[test]
    fn agent_message_completed_yields_assistant_text() {
        let note: ItemNotification = serde_json::from_value(json!({
            "threadId": "t1",
            "item": {"type": "agentMessage", "text": "hi there"}
        }))
        .unwrap();
        let events = normalize_item_completed(&note);
        match &events[0] {
            EventKind::AssistantText { text } => assert_eq!(text, "hi there"),
            _ => panic!("expected assistant text"),
        }
    }

    #[test]
    fn reasoning_prefers_summary_over_content() {
        let note: ItemNotification = serde_json::from_value(json!({
            "threadId": "t1",
            "item": {"type": "reasoning", "summary": "short", "content": "long form"}
        }))
        .unwrap();
        let events = normalize_item_completed(&note);
        match &events[0] {
            EventKind::AssistantThinking { text } => assert_eq!(text, "short"),
            _ => panic!("expected assistant thinking"),
        }
    }

    #[test]
    fn turn_completed_assembles_usage_and_cost() {
        let note: TurnCompletedNotification = serde_json::from_value(json!({
            "threadId": "t1",
            "turnId": "tu1",
            "subtype": "success",
            "usage": {"input_tokens": 10},
            "costUsd": 0.02
        }))
        .unwrap();
        let events = normalize_turn_completed(&note);
        match &events[0] {
            EventKind::TurnResult { subtype, cost_usd, usage, .. } => {
                assert_eq!(subtype, "success");
                assert_eq!(*cost_usd, Some(0.02));
                assert!(usage.is_some());
            }
            _ => panic!("expected turn result"),
        }
    }
}
