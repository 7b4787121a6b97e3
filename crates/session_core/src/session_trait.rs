//! The common *Session* contract (§4.4) every backend adapter implements.
//! `session_core` depends on no adapter crate; each adapter crate depends on
//! `session_core` and implements this trait, keeping the dependency arrow
//! pointing one way.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::model::{ContentBlock, Event, PermissionRequest};

/// One live conversation with one agent. Implementations own their
/// `supervisor::Supervisor` and `transport::JsonRpcClient` (or, for the ACP
/// adapter, the `agent-client-protocol` connection) internally.
#[async_trait(?Send)]
pub trait Session {
    /// Hands the caller a fresh receiver for this session's event stream.
    /// Multiple calls each get an independent receiver (broadcast
    /// semantics); a receiver created after events have already been
    /// emitted only sees events from that point forward.
    fn events(&self) -> mpsc::UnboundedReceiver<Event>;

    /// Hands the caller a fresh receiver for this session's permission
    /// request stream.
    fn permission_requests(&self) -> mpsc::UnboundedReceiver<PermissionRequest>;

    async fn send_text(&self, text: String) -> Result<(), SessionError>;

    async fn send_content(&self, blocks: Vec<ContentBlock>) -> Result<(), SessionError>;

    async fn interrupt(&self) -> Result<(), SessionError>;

    /// Idempotent: a second call is a no-op rather than an error.
    async fn kill(&self) -> Result<(), SessionError>;

    async fn set_model(&self, model: String) -> Result<(), SessionError>;

    /// Fails with `Unsupported` on any non-Claude session.
    async fn set_permission_mode(&self, mode: String) -> Result<(), SessionError>;

    /// Fails with `Unsupported` on any non-Codex session.
    async fn set_reasoning_effort(&self, effort: String) -> Result<(), SessionError>;

    /// Fails with `Unsupported` unless the connected agent actually
    /// documents an out-of-band config channel (§4.4.3 Open Question 1
    /// resolution: never fabricated).
    async fn set_config_option(&self, id: String, value: serde_json::Value) -> Result<(), SessionError>;

    /// `None` until the backend handshake resolves it; stable thereafter.
    fn resolved_session_id(&self) -> Option<String>;

    async fn respond_permission(
        &self,
        request_id: String,
        decision: crate::model::PermissionDecision,
        extras: Option<serde_json::Value>,
    ) -> Result<(), SessionError>;
}
