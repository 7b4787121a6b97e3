//! ACP backend adapter (§4.4.3): an Agent Client Protocol v1 session,
//! built on the real `agent-client-protocol` crate, implementing the
//! common `session_core::Session` contract.

mod client_impl;
mod error;
mod fs_policy;
mod normalize;
mod session;
mod terminal;

pub use client_impl::AcpClient;
pub use error::AcpAdapterError;
pub use fs_policy::{PathPolicy, PathPolicyDisposition};
pub use session::{AcpSession, AcpSessionBuilder};
pub use terminal::TerminalManager;
