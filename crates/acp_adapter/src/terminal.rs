//! Host-side terminal manager backing the ACP `terminal/*` client methods
//! (§4.4.3). Each created terminal is a real child process whose combined
//! stdout/stderr is captured into a bounded buffer by a background reader
//! task, mirroring the aggregated-output shape Codex's `commandExecution`
//! item already uses (`codex_adapter::protocol::Item::CommandExecution`)
//! rather than inventing a second output representation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const MAX_BUFFERED_OUTPUT_BYTES: usize = 1_000_000;

struct TerminalState {
    child: Child,
    output: Arc<Mutex<Vec<u8>>>,
    truncated: Arc<AtomicBool>,
    reader_task: Option<JoinHandle<()>>,
}

/// Tracks terminals created via `terminal/create` for one session. Released
/// terminals are killed if still running, so a consumer that forgets to
/// call `terminal/release` never leaks a child process past `kill()`.
#[derive(Default)]
pub struct TerminalManager {
    terminals: Mutex<HashMap<String, TerminalState>>,
    next_id: AtomicUsize,
}

impl TerminalManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("term_{n}")
    }

    pub async fn register(&self, id: String, mut child: Child) {
        let output = Arc::new(Mutex::new(Vec::new()));
        let truncated = Arc::new(AtomicBool::new(false));

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_buf = output.clone();
        let out_truncated = truncated.clone();
        let reader_task = tokio::spawn(async move {
            pump(stdout, stderr, out_buf, out_truncated).await;
        });

        self.terminals.lock().await.insert(
            id,
            TerminalState {
                child,
                output,
                truncated,
                reader_task: Some(reader_task),
            },
        );
    }

    pub async fn output(&self, id: &str) -> Option<(String, bool, Option<i32>)> {
        let mut terminals = self.terminals.lock().await;
        let state = terminals.get_mut(id)?;
        let buf = state.output.lock().await;
        let text = String::from_utf8_lossy(&buf).into_owned();
        let truncated = state.truncated.load(Ordering::SeqCst);
        let exit_code = state.child.try_wait().ok().flatten().and_then(|s| s.code());
        Some((text, truncated, exit_code))
    }

    pub async fn wait_for_exit(&self, id: &str) -> Option<Option<i32>> {
        let mut terminals = self.terminals.lock().await;
        let state = terminals.get_mut(id)?;
        let status = state.child.wait().await.ok()?;
        Some(status.code())
    }

    pub async fn kill(&self, id: &str) {
        let mut terminals = self.terminals.lock().await;
        if let Some(state) = terminals.get_mut(id) {
            let _ = state.child.start_kill();
        }
    }

    pub async fn release(&self, id: &str) {
        let mut terminals = self.terminals.lock().await;
        if let Some(mut state) = terminals.remove(id) {
            if let Some(task) = state.reader_task.take() {
                task.abort();
            }
            let _ = state.child.start_kill();
        }
    }

    /// Kills and releases every tracked terminal; called from `kill()` on
    /// the owning session so no child process outlives it.
    pub async fn release_all(&self) {
        let mut terminals = self.terminals.lock().await;
        for (_, mut state) in terminals.drain() {
            if let Some(task) = state.reader_task.take() {
                task.abort();
            }
            let _ = state.child.start_kill();
        }
    }
}

async fn pump(
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
    output: Arc<Mutex<Vec<u8>>>,
    truncated: Arc<AtomicBool>,
) {
    let mut handles = Vec::new();
    if let Some(mut stdout) = stdout {
        let output = output.clone();
        let truncated = truncated.clone();
        handles.push(tokio::spawn(async move {
            pump_one(&mut stdout, output, truncated).await;
        }));
    }
    if let Some(mut stderr) = stderr {
        handles.push(tokio::spawn(async move {
            pump_one(&mut stderr, output, truncated).await;
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

async fn pump_one(
    reader: &mut (impl tokio::io::AsyncRead + Unpin),
    output: Arc<Mutex<Vec<u8>>>,
    truncated: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let mut out = output.lock().await;
                if out.len() + n > MAX_BUFFERED_OUTPUT_BYTES {
                    let remaining = MAX_BUFFERED_OUTPUT_BYTES.saturating_sub(out.len());
                    out.extend_from_slice(&buf[..remaining.min(n)]);
                    truncated.store(true, Ordering::SeqCst);
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[tokio::test]
    async fn captures_stdout_and_reports_exit_code() {
        let manager = TerminalManager::new();
        let id = manager.allocate_id();
        let mut cmd = tokio::process::Command::new("/bin/sh");
        cmd.args(["-c", "echo hello"]);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        let child = cmd.spawn().unwrap();
        manager.register(id.clone(), child).await;

        manager.wait_for_exit(&id).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let (text, truncated, exit_code) = manager.output(&id).await.unwrap();
        assert!(text.contains("hello"));
        assert!(!truncated);
        assert_eq!(exit_code, Some(0));
    }

    #[tokio::test]
    async fn release_kills_a_still_running_terminal() {
        let manager = TerminalManager::new();
        let id = manager.allocate_id();
        let mut cmd = tokio::process::Command::new("/bin/sh");
        cmd.args(["-c", "sleep 30"]);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        let child = cmd.spawn().unwrap();
        manager.register(id.clone(), child).await;

        manager.release(&id).await;
        assert!(manager.output(&id).await.is_none());
    }
}
