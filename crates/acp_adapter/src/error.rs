#[derive(thiserror::Error, Debug)]
pub enum AcpAdapterError {
    #[error("failed to spawn acp agent process: {0}")]
    Spawn(#[from] supervisor::SupervisorError),

    #[error("initialization handshake did not complete within {0:?}")]
    InitTimeout(std::time::Duration),

    #[error("agent reported an error: {0}")]
    AgentError(String),

    #[error("acp worker thread is gone")]
    WorkerGone,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("path {path} is outside the session's allowed roots")]
    PathPolicyViolation { path: std::path::PathBuf },
}

impl From<AcpAdapterError> for session_core::SessionError {
    fn from(err: AcpAdapterError) -> Self {
        match err {
            AcpAdapterError::Spawn(inner) => session_core::SessionError::SpawnError(inner),
            AcpAdapterError::InitTimeout(d) => session_core::SessionError::InitTimeout(d),
            AcpAdapterError::AgentError(msg) => session_core::SessionError::ProtocolError(msg),
            AcpAdapterError::WorkerGone => session_core::SessionError::ConnectionClosed,
            AcpAdapterError::InvalidRequest(msg) => session_core::SessionError::ProtocolError(msg),
            AcpAdapterError::PathPolicyViolation { path } => {
                session_core::SessionError::PathPolicyViolation { path }
            }
        }
    }
}
