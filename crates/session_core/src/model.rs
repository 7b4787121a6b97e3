//! The unified data model (§3): every backend adapter speaks its own wire
//! dialect internally but exchanges only these types with the rest of the
//! workspace. Tagged unions follow the teacher's `CodexEvent` /
//! `AppNotification` shape (`#[serde(tag = "type", rename_all =
//! "snake_case")]`) rather than a structural-sniffing decoder.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which wire dialect a session's backend speaks.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Claude,
    Codex,
    Acp,
}

/// Lifecycle state of a [`Session`]. *Spawning → Initializing → Ready →
/// (Turn-active ⇄ Ready)\* → Terminating → Terminated*.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Spawning,
    Initializing,
    Ready,
    TurnActive,
    Terminating,
    Terminated,
}

/// What a session's backend declares it can do, used by the facade (C7) to
/// reject unsupported commands before they ever reach the adapter.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct BackendCapabilities {
    pub supports_model_change: bool,
    pub supports_permission_mode_change: bool,
    pub supports_reasoning_effort: bool,
    pub supports_config_options: bool,
    pub supports_hooks: bool,
}

impl BackendCapabilities {
    pub fn for_backend(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Claude => Self {
                supports_model_change: true,
                supports_permission_mode_change: true,
                supports_reasoning_effort: false,
                supports_config_options: false,
                supports_hooks: true,
            },
            BackendKind::Codex => Self {
                supports_model_change: true,
                supports_permission_mode_change: false,
                supports_reasoning_effort: true,
                supports_config_options: false,
                supports_hooks: false,
            },
            BackendKind::Acp => Self {
                supports_model_change: false,
                supports_permission_mode_change: false,
                supports_reasoning_effort: false,
                supports_config_options: false,
                supports_hooks: false,
            },
        }
    }
}

/// Snapshot of session-scoped configuration. The resolved id, once set,
/// never changes — it is what later `resume` calls feed back in.
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    pub local_id: String,
    pub resolved_id: Option<String>,
    pub backend: BackendKind,
    pub cwd: std::path::PathBuf,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    pub reasoning_effort: Option<String>,
    pub phase: SessionPhase,
}

impl SessionMetadata {
    pub fn new(local_id: impl Into<String>, backend: BackendKind, cwd: std::path::PathBuf) -> Self {
        Self {
            local_id: local_id.into(),
            resolved_id: None,
            backend,
            cwd,
            model: None,
            permission_mode: None,
            reasoning_effort: None,
            phase: SessionPhase::Spawning,
        }
    }

    /// Sets the resolved id. Panics if called twice with a different value —
    /// callers must only invoke this once, at the end of initialization.
    pub fn set_resolved_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        if let Some(existing) = &self.resolved_id {
            debug_assert_eq!(existing, &id, "resolved session id must not change once set");
            return;
        }
        self.resolved_id = Some(id);
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One agent-invoked operation, tracked for the §3 invariant that every
/// `ToolResult` must reference a previously announced `tool_use_id`.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub tool_use_id: String,
    pub name: String,
    pub input: Value,
    pub output: Option<Value>,
    pub status: ToolCallStatus,
    pub parent_tool_use_id: Option<String>,
    pub affected_paths: Vec<std::path::PathBuf>,
}

/// §3 content block tagged union. The round-trip law in §8 (`from_json
/// (to_json(b)) == b`) holds because every variant serializes through serde
/// with no custom `Serialize`/`Deserialize` impls to drift out of sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSourceWire,
    },
    Audio {
        data: String,
        media_type: String,
    },
    ResourceLink {
        uri: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    Resource {
        uri: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        contents: String,
    },
    Thinking {
        text: String,
        signature: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<ContentBlock>,
        is_error: bool,
    },
}

/// Source of an image content block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSourceWire {
    Base64 { data: String, media_type: String },
    Url { url: String },
}

/// §3 normalized event tagged union. Every event carries session id,
/// sequence number, timestamp, and a provider tag, per §3 and the ordering
/// guarantee in §5 (sequence numbers strictly increase within one session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub session_id: String,
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub provider: BackendKind,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    SystemInit {
        model: Option<String>,
        tools: Vec<String>,
    },
    AssistantText {
        text: String,
    },
    AssistantThinking {
        text: String,
    },
    UserText {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
        parent_tool_use_id: Option<String>,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<ContentBlock>,
        is_error: bool,
    },
    TurnResult {
        subtype: String,
        num_turns: Option<u64>,
        cost_usd: Option<f64>,
        usage: Option<Value>,
    },
    StreamDelta {
        text: String,
    },
    ConfigOptions {
        options: Value,
    },
    AvailableCommands {
        commands: Value,
    },
    ModeUpdate {
        mode_id: String,
    },
    Plan {
        entries: Value,
    },
    PermissionOutcomeEcho {
        request_id: String,
        decision: String,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    Error {
        message: String,
        detail: Option<Value>,
    },
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// §3 command tagged union, flowing consumer → facade → adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    SendMessage { text: String },
    SendContent { blocks: Vec<ContentBlock> },
    Interrupt,
    Kill,
    SetModel { model: String },
    SetPermissionMode { mode: String },
    SetReasoningEffort { effort: String },
    SetConfigOption { id: String, value: Value },
    PermissionResponse {
        request_id: String,
        decision: PermissionDecision,
        extras: Option<Value>,
    },
}

/// The unified permission decision vocabulary (§4.6), mapped per backend by
/// [`crate::permission`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDecision {
    AllowOnce,
    AllowForSession,
    AllowAlways,
    Deny,
    CancelTurn,
}

/// A server-originated approval request (§3). Exactly one response is
/// expected; late or duplicate responses are silently dropped by the
/// dispatcher in [`crate::permission`].
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub request_id: String,
    pub tool_name: String,
    pub input: Value,
    pub tool_use_id: Option<String>,
    pub extensions: PermissionExtensions,
}

/// Backend-specific extension data carried alongside a [`PermissionRequest`]
/// so adapters don't need a shared mega-struct of optional fields.
#[derive(Debug, Clone, Default)]
pub struct PermissionExtensions {
    pub codex_proposed_execpolicy_amendment: Option<Value>,
    pub acp_permission_options: Option<Value>,
    pub acp_blocked_path: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TransportStatus {
    Connecting,
    Connected,
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_block_text_round_trips() {
        let block = ContentBlock::Text {
            text: "hello".to_string(),
        };
        let json = serde_json::to_value(&block).unwrap();
        let back: ContentBlock = serde_json::from_value(json).unwrap();
        assert_eq!(block, back);
    }

    #[test]
    fn content_block_tool_result_round_trips_with_nested_blocks() {
        let block = ContentBlock::ToolResult {
            tool_use_id: "tu_1".to_string(),
            content: vec![ContentBlock::Text {
                text: "done".to_string(),
            }],
            is_error: false,
        };
        let json = serde_json::to_value(&block).unwrap();
        let back: ContentBlock = serde_json::from_value(json).unwrap();
        assert_eq!(block, back);
    }

    #[test]
    fn resolved_id_is_stable_once_set() {
        let mut meta = SessionMetadata::new("local-1", BackendKind::Codex, "/tmp".into());
        meta.set_resolved_id("thread-1");
        assert_eq!(meta.resolved_id.as_deref(), Some("thread-1"));
    }
}
