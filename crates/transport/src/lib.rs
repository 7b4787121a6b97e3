//! Line-delimited JSON-RPC 2.0 transport over child-process stdio.
//!
//! This crate implements the Line Framer and JSON-RPC Client shared by every
//! backend adapter: bounded-memory line reading with CRLF tolerance and a
//! per-line byte cap, and request/response correlation over an
//! already-connected duplex stream. Adapters layer their own envelope and
//! method-name semantics on top; this crate knows nothing about Claude,
//! Codex, or ACP specifically.

mod error;
mod framer;
mod jsonrpc;

pub use error::{RequestId, TransportError};
pub use framer::{decode_line, BoundedLine, LineReader, LineWriter};
pub use jsonrpc::{JsonRpcClient, JsonRpcTasks, Notification, ServerRequest};

/// Default per-line byte cap, matching the teacher's ingest default.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;
