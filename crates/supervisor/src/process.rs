//! Spawn-retry helper, ported from the teacher's
//! `claude_code::process::spawn_with_retry` / `codex::mcp::jsonrpc`'s spawn
//! loop: both retry with a capped exponential backoff when the OS reports
//! `ExecutableFileBusy` (raw errno 26, `ETXTBSY`) — a transient condition
//! seen when a just-written binary is still being closed by another
//! process. Generalized here to `tokio::time::sleep` since every caller in
//! this workspace spawns from async context.

use std::path::Path;
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::error::SupervisorError;

const MAX_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_millis(2);
const MAX_BACKOFF: Duration = Duration::from_millis(50);

pub(crate) async fn spawn_with_retry(
    command: &mut Command,
    binary: &Path,
) -> Result<Child, SupervisorError> {
    let mut backoff = INITIAL_BACKOFF;
    for attempt in 0..MAX_ATTEMPTS {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) => {
                let is_busy = matches!(source.kind(), std::io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy && attempt + 1 < MAX_ATTEMPTS {
                    tracing::debug!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "backend binary busy, retrying spawn"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
                    continue;
                }
                return Err(SupervisorError::Spawn {
                    binary: binary.to_path_buf(),
                    source,
                });
            }
        }
    }

    unreachable!("spawn_with_retry should return before exhausting retries")
}

/// Sets `SIGPIPE` to `SIG_IGN` in the child before `exec`. Backend CLIs are
/// not written expecting to run with a parent that closes their stdout/stdin
/// pipes mid-write; without this, a backend that writes after we've stopped
/// reading is killed by the default `SIGPIPE` disposition it inherits from
/// this process instead of seeing the write fail with `EPIPE`. No-op when
/// the supervisor is configured with `ignore_sigpipe(false)`, and on
/// non-Unix targets where the signal doesn't exist.
#[cfg(unix)]
pub(crate) fn apply_sigpipe_policy(command: &mut Command, ignore: bool) {
    if !ignore {
        return;
    }
    use std::os::unix::process::CommandExt;
    unsafe {
        command.pre_exec(|| {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub(crate) fn apply_sigpipe_policy(_command: &mut Command, _ignore: bool) {}
