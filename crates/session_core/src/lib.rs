//! Unified data model, permission dispatcher, and transport facade shared
//! by the `claude_adapter`, `codex_adapter`, and `acp_adapter` crates.
//! `session_core` depends on `transport` and `supervisor` only — never on a
//! specific adapter — so the dependency graph stays a fan-out from this
//! crate rather than a cycle.

pub mod error;
pub mod facade;
pub mod model;
pub mod permission;
pub mod sequence;
pub mod session_trait;

pub use error::SessionError;
pub use facade::EventTransport;
pub use model::{
    BackendCapabilities, BackendKind, Command, ContentBlock, Event, EventKind, ImageSourceWire,
    LogLevel, PermissionDecision, PermissionExtensions, PermissionRequest, SessionMetadata,
    SessionPhase, ToolCall, ToolCallStatus, TransportStatus,
};
pub use permission::PermissionDispatcher;
pub use sequence::SequenceAllocator;
pub use session_trait::Session;
