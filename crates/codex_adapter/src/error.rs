#[derive(thiserror::Error, Debug)]
pub enum CodexAdapterError {
    #[error("failed to spawn codex app-server: {0}")]
    Spawn(#[from] supervisor::SupervisorError),

    #[error("initialization handshake did not complete within {0:?}")]
    InitTimeout(std::time::Duration),

    #[error("codex reported an error: {0}")]
    AgentError(String),

    #[error("transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("failed writing temp file for image input: {0}")]
    TempIo(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<CodexAdapterError> for session_core::SessionError {
    fn from(err: CodexAdapterError) -> Self {
        match err {
            CodexAdapterError::Spawn(inner) => session_core::SessionError::SpawnError(inner),
            CodexAdapterError::InitTimeout(d) => session_core::SessionError::InitTimeout(d),
            CodexAdapterError::AgentError(msg) => session_core::SessionError::ProtocolError(msg),
            CodexAdapterError::Transport(inner) => inner.into(),
            CodexAdapterError::TempIo(err) => session_core::SessionError::TempIoError(err),
            CodexAdapterError::InvalidRequest(msg) => session_core::SessionError::ProtocolError(msg),
        }
    }
}
