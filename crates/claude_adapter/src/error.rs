#[derive(thiserror::Error, Debug)]
pub enum ClaudeAdapterError {
    #[error("failed to spawn claude process: {0}")]
    Spawn(#[from] supervisor::SupervisorError),

    #[error("initialization handshake did not complete within {0:?}")]
    InitTimeout(std::time::Duration),

    #[error("claude reported an error: {0}")]
    AgentError(String),

    #[error("transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<ClaudeAdapterError> for session_core::SessionError {
    fn from(err: ClaudeAdapterError) -> Self {
        match err {
            ClaudeAdapterError::Spawn(inner) => session_core::SessionError::SpawnError(inner),
            ClaudeAdapterError::InitTimeout(d) => session_core::SessionError::InitTimeout(d),
            ClaudeAdapterError::AgentError(msg) => session_core::SessionError::ProtocolError(msg),
            ClaudeAdapterError::Transport(inner) => inner.into(),
            ClaudeAdapterError::InvalidRequest(msg) => session_core::SessionError::ProtocolError(msg),
        }
    }
}
