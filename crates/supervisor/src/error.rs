use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("failed to spawn backend process at {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backend binary {0} could not be resolved (checked builder override, env var, PATH)")]
    BinaryNotFound(String),

    #[error("child process stdin was already taken")]
    MissingStdin,

    #[error("child process stdout was already taken")]
    MissingStdout,

    #[error("child process stderr was already taken")]
    MissingStderr,

    #[error("failed waiting on child process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("failed to kill child process: {0}")]
    Kill(#[source] std::io::Error),
}
