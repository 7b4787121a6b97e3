//! Maps `agent_client_protocol::SessionUpdate` notifications (§4.4.3 / §4.5)
//! onto `session_core::EventKind`, plus the `ContentBlock` conversions
//! needed at the prompt/tool-call boundary. One function per concern,
//! exhaustive over the schema's tagged `sessionUpdate` discriminator (§9:
//! "use a tagged-variant decoder keyed on `sessionUpdate`, never structural
//! sniffing" — the `agent-client-protocol` crate already hands us that
//! decoder as a Rust enum, so this module only has to be exhaustive over
//! it), satisfying §8 property 4: every variant yields exactly one event,
//! a non-exhaustive future variant downgrades to a `Log` rather than
//! yielding zero.

use agent_client_protocol as acp;
use session_core::{ContentBlock, EventKind, ImageSourceWire, LogLevel};

/// Normalizes one `session/update` notification payload. Always returns
/// exactly one `EventKind` (§8 property 4).
pub fn normalize_session_update(update: acp::SessionUpdate) -> EventKind {
    match update {
        acp::SessionUpdate::UserMessageChunk(chunk) => EventKind::UserText {
            text: content_block_text(&chunk.content),
        },
        acp::SessionUpdate::AgentMessageChunk(chunk) => EventKind::AssistantText {
            text: content_block_text(&chunk.content),
        },
        acp::SessionUpdate::AgentThoughtChunk(chunk) => EventKind::AssistantThinking {
            text: content_block_text(&chunk.content),
        },
        acp::SessionUpdate::ToolCall(tool_call) => EventKind::ToolUse {
            id: tool_call.tool_call_id.to_string(),
            name: tool_call_name(tool_call.title.as_deref(), &tool_call.kind),
            input: tool_call
                .raw_input
                .clone()
                .unwrap_or(serde_json::Value::Null),
            parent_tool_use_id: None,
        },
        acp::SessionUpdate::ToolCallUpdate(update) => normalize_tool_call_update(update),
        acp::SessionUpdate::Plan(plan) => EventKind::Plan {
            entries: serde_json::to_value(&plan.entries).unwrap_or(serde_json::Value::Null),
        },
        acp::SessionUpdate::AvailableCommandsUpdate(cmds) => EventKind::AvailableCommands {
            commands: serde_json::to_value(&cmds.available_commands)
                .unwrap_or(serde_json::Value::Null),
        },
        acp::SessionUpdate::CurrentModeUpdate(mode) => EventKind::ModeUpdate {
            mode_id: mode.current_mode_id.to_string(),
        },
        other => EventKind::Log {
            level: LogLevel::Debug,
            message: format!("unhandled acp session update variant: {other:?}"),
        },
    }
}

fn normalize_tool_call_update(update: acp::ToolCallUpdate) -> EventKind {
    let is_terminal = matches!(
        update.fields.status,
        Some(acp::ToolCallStatus::Completed)
            | Some(acp::ToolCallStatus::Failed)
            | Some(acp::ToolCallStatus::Cancelled)
    );
    if !is_terminal {
        return EventKind::Log {
            level: LogLevel::Debug,
            message: format!(
                "tool call {} transitioned to {:?}",
                update.tool_call_id, update.fields.status
            ),
        };
    }

    let is_error = matches!(update.fields.status, Some(acp::ToolCallStatus::Failed));
    let content = update
        .fields
        .content
        .unwrap_or_default()
        .into_iter()
        .map(tool_call_content_to_block)
        .collect();

    EventKind::ToolResult {
        tool_use_id: update.tool_call_id.to_string(),
        content,
        is_error,
    }
}

fn tool_call_name(title: Option<&str>, kind: &acp::ToolKind) -> String {
    match title {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => format!("{kind:?}").to_lowercase(),
    }
}

fn tool_call_content_to_block(content: acp::ToolCallContent) -> ContentBlock {
    match content {
        acp::ToolCallContent::Content(c) => from_acp_content_block(c.content),
        acp::ToolCallContent::Diff(diff) => ContentBlock::Text {
            text: format!(
                "--- {path}\n{old}\n+++\n{new}",
                path = diff.path.display(),
                old = diff.old_text.unwrap_or_default(),
                new = diff.new_text
            ),
        },
        acp::ToolCallContent::Terminal(term) => ContentBlock::Text {
            text: format!("terminal:{}", term.terminal_id),
        },
        other => ContentBlock::Text {
            text: format!("{other:?}"),
        },
    }
}

fn content_block_text(block: &acp::ContentBlock) -> String {
    match block {
        acp::ContentBlock::Text(text) => text.text.clone(),
        other => format!("{other:?}"),
    }
}

/// Converts a unified content block into the agent's prompt-input shape
/// (§3's content block union vs. the ACP schema's narrower prompt content
/// set). Blocks with no meaningful prompt-input representation (tool use,
/// tool result, thinking) are skipped, mirroring the Codex adapter's
/// `content_blocks_to_turn_input` fallback for blocks §4.4.2 doesn't name.
pub fn to_acp_content_block(block: ContentBlock) -> Option<acp::ContentBlock> {
    match block {
        ContentBlock::Text { text } => Some(acp::ContentBlock::Text(acp::TextContent::new(text))),
        ContentBlock::Image { source } => match source {
            ImageSourceWire::Base64 { data, media_type } => {
                Some(acp::ContentBlock::Image(acp::ImageContent::new(data, media_type)))
            }
            ImageSourceWire::Url { url } => Some(acp::ContentBlock::ResourceLink(
                acp::ResourceLink::new(url.clone(), url),
            )),
        },
        ContentBlock::Audio { data, media_type } => {
            Some(acp::ContentBlock::Audio(acp::AudioContent::new(data, media_type)))
        }
        ContentBlock::ResourceLink { uri, .. } => {
            Some(acp::ContentBlock::ResourceLink(acp::ResourceLink::new(uri.clone(), uri)))
        }
        ContentBlock::Resource { .. } | ContentBlock::Thinking { .. } | ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. } => None,
    }
}

/// Converts an agent-originated content block (tool call output, chunk
/// content) into the unified model. Best-effort: any ACP content kind not
/// named here collapses to a `Text` block carrying its debug form rather
/// than being dropped, since tool-result content must never silently
/// vanish (§3 tool-call invariant).
pub fn from_acp_content_block(block: acp::ContentBlock) -> ContentBlock {
    match block {
        acp::ContentBlock::Text(text) => ContentBlock::Text { text: text.text },
        acp::ContentBlock::Image(image) => ContentBlock::Image {
            source: ImageSourceWire::Base64 {
                data: image.data,
                media_type: image.mime_type,
            },
        },
        acp::ContentBlock::Audio(audio) => ContentBlock::Audio {
            data: audio.data,
            media_type: audio.mime_type,
        },
        acp::ContentBlock::ResourceLink(link) => ContentBlock::ResourceLink {
            uri: link.uri,
            media_type: link.mime_type,
        },
        other => ContentBlock::Text {
            text: format!("{other:?}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_message_chunk_yields_assistant_text() {
        let update = acp::SessionUpdate::AgentMessageChunk(acp::AgentMessageChunk {
            content: acp::ContentBlock::Text(acp::TextContent::new("hi")),
        });
        match normalize_session_update(update) {
            EventKind::AssistantText { text } => assert_eq!(text, "hi"),
            other => panic!("expected assistant text, got {other:?}"),
        }
    }

    #[test]
    fn non_terminal_tool_call_update_downgrades_to_log() {
        let update = acp::ToolCallUpdate {
            tool_call_id: acp::ToolCallId::new("c1"),
            fields: acp::ToolCallUpdateFields {
                status: Some(acp::ToolCallStatus::InProgress),
                ..Default::default()
            },
        };
        match normalize_tool_call_update(update) {
            EventKind::Log { .. } => {}
            other => panic!("expected log, got {other:?}"),
        }
    }

    #[test]
    fn terminal_tool_call_update_yields_tool_result() {
        let update = acp::ToolCallUpdate {
            tool_call_id: acp::ToolCallId::new("c1"),
            fields: acp::ToolCallUpdateFields {
                status: Some(acp::ToolCallStatus::Completed),
                ..Default::default()
            },
        };
        match normalize_tool_call_update(update) {
            EventKind::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                assert_eq!(tool_use_id, "c1");
                assert!(content.is_empty());
                assert!(!is_error);
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    /// Scenario D (spec §8): a `tool_call` update whose `title` is non-empty
    /// names the event after the title, never the `kind`, and passes
    /// `rawInput` straight through as the normalized `ToolUse` input.
    #[test]
    fn tool_call_uses_title_over_kind_and_passes_raw_input() {
        let tool_call = acp::ToolCall {
            tool_call_id: acp::ToolCallId::new("c1"),
            title: Some("Read input file".to_string()),
            kind: acp::ToolKind::Read,
            status: Some(acp::ToolCallStatus::Pending),
            content: Vec::new(),
            locations: Vec::new(),
            raw_input: Some(serde_json::json!({"path": "/r/x"})),
            raw_output: None,
        };
        match normalize_session_update(acp::SessionUpdate::ToolCall(tool_call)) {
            EventKind::ToolUse { id, name, input, .. } => {
                assert_eq!(id, "c1");
                assert_eq!(name, "Read input file");
                assert_eq!(input, serde_json::json!({"path": "/r/x"}));
            }
            other => panic!("expected tool use, got {other:?}"),
        }
    }

    #[test]
    fn agent_thought_chunk_yields_assistant_thinking() {
        let update = acp::SessionUpdate::AgentThoughtChunk(acp::AgentThoughtChunk {
            content: acp::ContentBlock::Text(acp::TextContent::new("pondering")),
        });
        match normalize_session_update(update) {
            EventKind::AssistantThinking { text } => assert_eq!(text, "pondering"),
            other => panic!("expected assistant thinking, got {other:?}"),
        }
    }

    #[test]
    fn user_message_chunk_yields_user_text() {
        let update = acp::SessionUpdate::UserMessageChunk(acp::UserMessageChunk {
            content: acp::ContentBlock::Text(acp::TextContent::new("hello from user")),
        });
        match normalize_session_update(update) {
            EventKind::UserText { text } => assert_eq!(text, "hello from user"),
            other => panic!("expected user text, got {other:?}"),
        }
    }

    #[test]
    fn plan_yields_plan_event() {
        let update = acp::SessionUpdate::Plan(acp::Plan {
            entries: Vec::new(),
        });
        match normalize_session_update(update) {
            EventKind::Plan { .. } => {}
            other => panic!("expected plan, got {other:?}"),
        }
    }

    #[test]
    fn available_commands_update_yields_available_commands() {
        let update = acp::SessionUpdate::AvailableCommandsUpdate(acp::AvailableCommandsUpdate {
            available_commands: Vec::new(),
        });
        match normalize_session_update(update) {
            EventKind::AvailableCommands { .. } => {}
            other => panic!("expected available commands, got {other:?}"),
        }
    }

    #[test]
    fn current_mode_update_yields_mode_update() {
        let update = acp::SessionUpdate::CurrentModeUpdate(acp::CurrentModeUpdate {
            current_mode_id: acp::SessionModeId::new("mode-1"),
        });
        match normalize_session_update(update) {
            EventKind::ModeUpdate { mode_id } => assert_eq!(mode_id, "mode-1"),
            other => panic!("expected mode update, got {other:?}"),
        }
    }
}
