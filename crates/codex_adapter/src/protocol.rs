//! Wire types for the Codex app-server JSON-RPC dialect (§4.4.2), grounded
//! on the teacher's `codex::mcp::protocol` (`ThreadStartParams`,
//! `ThreadResumeParams`, `TurnStartParams`, `TurnInput`,
//! `TurnInterruptParams`), generalized from the teacher's coarse
//! `AppNotification` bucket (`TaskComplete`/`Item`/`Error`/`Raw`) into the
//! full per-method notification set the spec names: `thread/started`,
//! `turn/started`, `thread/tokenUsage/updated`, `item/started`,
//! `item/completed`, `turn/completed`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "initialized";
pub const METHOD_CONFIG_READ: &str = "config/read";
pub const METHOD_CONFIG_REQUIREMENTS_READ: &str = "config/requirementsRead";
pub const METHOD_THREAD_START: &str = "thread/start";
pub const METHOD_THREAD_RESUME: &str = "thread/resume";
pub const METHOD_TURN_START: &str = "turn/start";
pub const METHOD_TURN_INTERRUPT: &str = "turn/interrupt";

pub const NOTIFICATION_THREAD_STARTED: &str = "thread/started";
pub const NOTIFICATION_TURN_STARTED: &str = "turn/started";
pub const NOTIFICATION_TOKEN_USAGE_UPDATED: &str = "thread/tokenUsage/updated";
pub const NOTIFICATION_ITEM_STARTED: &str = "item/started";
pub const NOTIFICATION_ITEM_COMPLETED: &str = "item/completed";
pub const NOTIFICATION_TURN_COMPLETED: &str = "turn/completed";

pub const SERVER_REQUEST_COMMAND_APPROVAL: &str = "item/commandExecution/requestApproval";
pub const SERVER_REQUEST_FILE_CHANGE_APPROVAL: &str = "item/fileChange/requestApproval";
pub const SERVER_REQUEST_USER_INPUT: &str = "item/tool/requestUserInput";

#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub client_info: ClientInfo,
    pub protocol_version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStartParams {
    pub cwd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResumeParams {
    pub thread_id: String,
    pub cwd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TurnInput {
    Text {
        text: String,
    },
    LocalImage {
        path: String,
    },
    Image {
        url: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStartParams {
    pub thread_id: String,
    pub input: Vec<TurnInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnInterruptParams {
    pub thread_id: String,
    pub turn_id: String,
}

/// The `decision` field a client sends back in response to a server-issued
/// approval request. Already covered by `session_core::permission`'s wire
/// types for the value shape; this just names the params envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalResponseParams {
    pub decision: Value,
}

/// `item/started` / `item/completed` carry an `item` object whose own
/// `type` distinguishes the kinds named in §4.4.2.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Item {
    AgentMessage {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        text: String,
    },
    Reasoning {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        summary: Option<String>,
        #[serde(default)]
        content: Option<String>,
    },
    Plan {
        #[serde(default)]
        entries: Value,
    },
    CommandExecution {
        id: String,
        #[serde(default)]
        command: Option<String>,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        aggregated_output: Option<String>,
        #[serde(default)]
        exit_code: Option<i64>,
    },
    FileChange {
        id: String,
        #[serde(default)]
        changes: Value,
        #[serde(default)]
        status: Option<String>,
    },
    McpToolCall {
        id: String,
        #[serde(default)]
        server: Option<String>,
        #[serde(default)]
        tool: Option<String>,
        #[serde(default)]
        arguments: Option<Value>,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        status: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl Item {
    /// The item id, used as the normalized `ToolUse`/`ToolResult` id. Agent
    /// messages and reasoning blocks have no stable id of their own on every
    /// Codex version, so this returns `None` for those — they never produce
    /// `ToolUse`/`ToolResult` events anyway.
    pub fn item_id(&self) -> Option<&str> {
        match self {
            Item::AgentMessage { id, .. } => id.as_deref(),
            Item::Reasoning { id, .. } => id.as_deref(),
            Item::CommandExecution { id, .. } => Some(id),
            Item::FileChange { id, .. } => Some(id),
            Item::McpToolCall { id, .. } => Some(id),
            Item::Plan { .. } | Item::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemNotification {
    pub thread_id: String,
    #[serde(default)]
    pub turn_id: Option<String>,
    pub item: Item,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStartedNotification {
    pub thread_id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsageNotification {
    pub thread_id: String,
    #[serde(default)]
    pub usage: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnCompletedNotification {
    pub thread_id: String,
    pub turn_id: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub usage: Option<Value>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
}

/// Shape of the three server-originated approval requests (§4.4.2). The
/// field set is the union of all three; unused fields stay `None` for a
/// given request kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequestParams {
    pub thread_id: String,
    #[serde(default)]
    pub turn_id: Option<String>,
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub changes: Option<Value>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default, rename = "proposedExecpolicyAmendment")]
    pub proposed_execpolicy_amendment: Option<Value>,
}
