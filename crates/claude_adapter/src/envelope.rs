//! Claude's envelope-then-payload structure (§4.4.1), modelled as two
//! layered tagged unions per §9 ("avoid a single mega-enum"): an outer
//! [`ClientMessage`] / [`AgentMessage`] envelope carrying a `type` tag, and
//! an inner `payload` whose shape depends on that tag.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages this adapter sends to the `claude` child.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "control_request")]
    ControlRequest {
        id: String,
        payload: ControlRequestPayload,
    },
    #[serde(rename = "session.create")]
    SessionCreate { payload: Value },
    #[serde(rename = "user.message")]
    UserMessage { payload: UserMessagePayload },
    #[serde(rename = "session.interrupt")]
    SessionInterrupt,
    #[serde(rename = "callback.response")]
    CallbackResponse {
        id: String,
        payload: Value,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlRequestPayload {
    Initialize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserMessagePayload {
    pub content: Vec<session_core::ContentBlock>,
}

/// Messages received from the `claude` child.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AgentMessage {
    #[serde(rename = "session.created")]
    SessionCreated {
        id: Option<String>,
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    #[serde(rename = "sdk.message")]
    SdkMessage { payload: Value },
    #[serde(rename = "callback.request")]
    CallbackRequest { id: String, payload: CallbackRequestPayload },
    #[serde(rename = "control_response")]
    ControlResponse { id: Option<String>, payload: Value },
    #[serde(rename = "error")]
    Error { message: String, detail: Option<Value> },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackRequestPayload {
    pub callback_type: String,
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
    pub tool_use_id: Option<String>,
    pub suggestions: Option<Value>,
    pub blocked_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_created_decodes() {
        let raw = r#"{"type":"session.created","id":"req-1","sessionId":"s1"}"#;
        let msg: AgentMessage = serde_json::from_str(raw).unwrap();
        match msg {
            AgentMessage::SessionCreated { session_id, .. } => assert_eq!(session_id, "s1"),
            _ => panic!("expected session.created"),
        }
    }

    #[test]
    fn callback_request_can_use_tool_decodes() {
        let raw = r#"{"type":"callback.request","id":"cb-1","payload":{"callback_type":"can_use_tool","tool_name":"Bash","tool_input":{"command":"ls"},"tool_use_id":"tu_1"}}"#;
        let msg: AgentMessage = serde_json::from_str(raw).unwrap();
        match msg {
            AgentMessage::CallbackRequest { payload, .. } => {
                assert_eq!(payload.callback_type, "can_use_tool");
                assert_eq!(payload.tool_name.as_deref(), Some("Bash"));
            }
            _ => panic!("expected callback.request"),
        }
    }

    #[test]
    fn unrecognized_type_falls_back_to_unknown() {
        let raw = r#"{"type":"something_new","foo":"bar"}"#;
        let msg: AgentMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(msg, AgentMessage::Unknown));
    }
}
