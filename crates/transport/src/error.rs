/// A JSON-RPC request id. The wire representation is always a JSON number;
/// callers never see string ids.
pub type RequestId = u64;

/// Errors surfaced by the JSON-RPC client (C2).
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("failed to spawn transport I/O task: {0}")]
    Io(#[from] std::io::Error),

    #[error("the peer closed the connection")]
    ConnectionClosed,

    #[error("request {id} timed out waiting for a response")]
    Timeout { id: RequestId },

    #[error("peer returned a JSON-RPC error for request {id}: {message} (code {code})")]
    Remote {
        id: RequestId,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("failed to decode peer response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("response for request {id} did not match the expected shape: {reason}")]
    UnexpectedResponseShape { id: RequestId, reason: String },
}
