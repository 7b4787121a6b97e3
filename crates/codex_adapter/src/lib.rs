//! Codex backend adapter (§4.4.2): a `codex app-server` JSON-RPC session,
//! built on a process that may be shared across several threads/sessions,
//! implementing the common `session_core::Session` contract.

mod content_input;
mod error;
mod normalize;
mod process;
mod protocol;
mod session;

pub use content_input::{content_blocks_to_turn_input, ContentInputGuard};
pub use error::CodexAdapterError;
pub use process::{CodexAppServerPool, CodexAppServerProcess, CodexProcessSpec};
pub use session::{CodexSession, CodexSessionBuilder};
