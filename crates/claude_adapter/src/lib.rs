//! Claude backend adapter (§4.4.1): a persistent `claude --input-format
//! stream-json` duplex session implementing the common `session_core::Session`
//! contract.

mod envelope;
mod error;
mod normalize;
mod session;

pub use envelope::{AgentMessage, CallbackRequestPayload, ClientMessage};
pub use error::ClaudeAdapterError;
pub use normalize::normalize_sdk_message;
pub use session::{ClaudeSession, ClaudeSessionBuilder};
