//! Process Supervisor (C3): owns a backend child process end to end — spawn,
//! stdio wiring, stderr capture as a structured log stream, and teardown.
//!
//! Grounded on the teacher's `claude_code::process::run_command` /
//! `codex::mcp::jsonrpc::JsonRpcTransport::spawn_mcp` pair: both set
//! `kill_on_drop(true)` on the `Command`, retry spawn on a transient
//! `ExecutableFileBusy`, and tee stderr into a side channel rather than
//! discarding it. This crate generalizes that into a reusable handle shared
//! by all three backend adapters, adding a binary-discovery precedence chain
//! (explicit override, then env var, then bare name on `PATH`) mirrored from
//! `claude_code::client::resolve_binary`.

mod error;
mod process;

pub use error::SupervisorError;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_KILL_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// One line the backend wrote to its stderr stream, delivered as a
/// structured log event rather than mirrored to the supervising process's
/// own stderr.
#[derive(Debug, Clone)]
pub struct StderrLine {
    pub line_number: usize,
    pub text: String,
}

/// Builder for a [`Supervisor`]. Mirrors the `ClaudeClientBuilder` /
/// `CodexClientBuilder` shape: a `Default`-able struct with chained setters,
/// resolved at `spawn` time rather than eagerly validated.
#[derive(Debug, Clone, Default)]
pub struct SupervisorBuilder {
    binary_override: Option<PathBuf>,
    binary_env_var: Option<String>,
    default_binary_name: Option<String>,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    ignore_sigpipe: Option<bool>,
    kill_grace_period: Option<Duration>,
}

impl SupervisorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binary_override(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_override = Some(path.into());
        self
    }

    pub fn binary_env_var(mut self, name: impl Into<String>) -> Self {
        self.binary_env_var = Some(name.into());
        self
    }

    pub fn default_binary_name(mut self, name: impl Into<String>) -> Self {
        self.default_binary_name = Some(name.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Default `true` on Unix: see [`process::apply_sigpipe_policy`].
    pub fn ignore_sigpipe(mut self, ignore: bool) -> Self {
        self.ignore_sigpipe = Some(ignore);
        self
    }

    pub fn kill_grace_period(mut self, duration: Duration) -> Self {
        self.kill_grace_period = Some(duration);
        self
    }

    fn resolve_binary(&self) -> Result<PathBuf, SupervisorError> {
        if let Some(path) = &self.binary_override {
            return Ok(path.clone());
        }
        if let Some(var) = &self.binary_env_var {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    return Ok(PathBuf::from(value));
                }
            }
        }
        self.default_binary_name
            .clone()
            .map(PathBuf::from)
            .ok_or_else(|| SupervisorError::BinaryNotFound("<unset>".to_string()))
    }

    /// Spawns the backend process and returns a live [`Supervisor`] handle
    /// plus the raw stdin/stdout pipes for the caller's transport layer.
    pub async fn spawn(self) -> Result<(Supervisor, ChildStdin, ChildStdout), SupervisorError> {
        let binary = self.resolve_binary()?;
        let ignore_sigpipe = self.ignore_sigpipe.unwrap_or(true);
        let kill_grace_period = self.kill_grace_period.unwrap_or(DEFAULT_KILL_GRACE_PERIOD);

        let mut command = Command::new(&binary);
        command.args(&self.args);
        command.kill_on_drop(true);
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }
        process::apply_sigpipe_policy(&mut command, ignore_sigpipe);

        let mut child = process::spawn_with_retry(&mut command, &binary).await?;

        let stdin = child.stdin.take().ok_or(SupervisorError::MissingStdin)?;
        let stdout = child.stdout.take().ok_or(SupervisorError::MissingStdout)?;
        let stderr = child.stderr.take().ok_or(SupervisorError::MissingStderr)?;

        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        let stderr_task = tokio::spawn(stderr_pump(stderr, stderr_tx));

        let supervisor = Supervisor {
            binary,
            child,
            kill_grace_period,
            stderr_task: Some(stderr_task),
            stderr_rx: Some(stderr_rx),
        };

        Ok((supervisor, stdin, stdout))
    }
}

async fn stderr_pump(stderr: tokio::process::ChildStderr, tx: mpsc::UnboundedSender<StderrLine>) {
    let mut reader = BufReader::new(stderr).lines();
    let mut line_number = 0usize;
    loop {
        match reader.next_line().await {
            Ok(Some(text)) => {
                line_number += 1;
                if tx.send(StderrLine { line_number, text }).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "error reading backend stderr, stopping capture");
                break;
            }
        }
    }
}

/// A live backend process. Dropping it aborts the stderr-capture task and
/// best-effort kills the child, matching the teacher's
/// `JsonRpcTransport::Drop` cleanup.
pub struct Supervisor {
    binary: PathBuf,
    child: Child,
    kill_grace_period: Duration,
    stderr_task: Option<JoinHandle<()>>,
    stderr_rx: Option<mpsc::UnboundedReceiver<StderrLine>>,
}

impl Supervisor {
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Takes ownership of the stderr-line receiver. Can only be called once;
    /// subsequent calls return `None`.
    pub fn take_stderr_lines(&mut self) -> Option<mpsc::UnboundedReceiver<StderrLine>> {
        self.stderr_rx.take()
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Waits for the child to exit on its own, up to the configured grace
    /// period, then force-kills it. Callers that support a cooperative
    /// shutdown handshake (closing stdin, or an adapter-level `shutdown`
    /// request) should perform that first; this is the backstop.
    pub async fn terminate(&mut self) -> Result<std::process::ExitStatus, SupervisorError> {
        match tokio::time::timeout(self.kill_grace_period, self.child.wait()).await {
            Ok(result) => result.map_err(SupervisorError::Wait),
            Err(_) => {
                debug!(
                    binary = %self.binary.display(),
                    "backend did not exit within grace period, sending kill"
                );
                self.child.start_kill().map_err(SupervisorError::Kill)?;
                self.child.wait().await.map_err(SupervisorError::Wait)
            }
        }
    }

    /// Waits for the child to exit without a timeout.
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus, SupervisorError> {
        self.child.wait().await.map_err(SupervisorError::Wait)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        let _ = self.child.start_kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binary_resolution_prefers_override_over_env_and_default() {
        std::env::set_var("SUPERVISOR_TEST_BINARY", "/from/env");
        let builder = SupervisorBuilder::new()
            .binary_override("/from/override")
            .binary_env_var("SUPERVISOR_TEST_BINARY")
            .default_binary_name("fallback-bin");
        assert_eq!(
            builder.resolve_binary().unwrap(),
            PathBuf::from("/from/override")
        );
        std::env::remove_var("SUPERVISOR_TEST_BINARY");
    }

    #[tokio::test]
    async fn spawn_and_terminate_a_real_child() {
        let (mut supervisor, _stdin, _stdout) = SupervisorBuilder::new()
            .binary_override("/bin/sh")
            .args(["-c", "sleep 5"])
            .kill_grace_period(Duration::from_millis(50))
            .spawn()
            .await
            .unwrap();

        let status = supervisor.terminate().await.unwrap();
        assert!(!status.success());
    }
}
