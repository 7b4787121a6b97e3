//! §7 error taxonomy. Kinds, not type names: each adapter's own error enum
//! (see `claude_adapter`/`codex_adapter`/`acp_adapter`) converts into this
//! one at the `Session` trait boundary, so the facade and consumers never
//! need to know which backend produced a failure.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("failed to spawn backend executable: {0}")]
    SpawnError(#[from] supervisor::SupervisorError),

    #[error("initialization handshake did not complete within {0:?}")]
    InitTimeout(std::time::Duration),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("backend returned a JSON-RPC error {code}: {message}")]
    JsonRpcError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("operation attempted after session close")]
    SessionClosed,

    #[error("connection closed unexpectedly")]
    ConnectionClosed,

    #[error("{command} is not supported by this backend")]
    Unsupported { command: String },

    #[error("path {path} is outside the session's allowed roots")]
    PathPolicyViolation { path: PathBuf },

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("failed writing temp file for image input: {0}")]
    TempIoError(#[source] std::io::Error),
}

impl From<transport::TransportError> for SessionError {
    fn from(err: transport::TransportError) -> Self {
        match err {
            transport::TransportError::ConnectionClosed => SessionError::ConnectionClosed,
            transport::TransportError::Timeout { .. } => {
                SessionError::Timeout(std::time::Duration::default())
            }
            transport::TransportError::Remote {
                code, message, data, ..
            } => SessionError::JsonRpcError { code, message, data },
            transport::TransportError::Decode(err) => {
                SessionError::ProtocolError(err.to_string())
            }
            transport::TransportError::UnexpectedResponseShape { reason, .. } => {
                SessionError::ProtocolError(reason)
            }
            transport::TransportError::Io(err) => SessionError::ProtocolError(err.to_string()),
        }
    }
}
