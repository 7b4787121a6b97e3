//! End-to-end drive of spec.md §8 Scenario F ("child crash") through a
//! real `CodexSession` and a fixture app-server that exits mid-turn
//! without responding to `turn/start`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use codex_adapter::CodexSessionBuilder;
use session_core::{Session, SessionError};

const FIXTURE: &str = r#"#!/usr/bin/env python3
import json
import sys

def send(obj):
    sys.stdout.write(json.dumps(obj) + "\n")
    sys.stdout.flush()

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    msg = json.loads(line)
    method = msg.get("method")
    if method == "initialize":
        send({"jsonrpc": "2.0", "id": msg.get("id"), "result": {"ready": True}})
    elif method == "initialized":
        continue
    elif method in ("config/read", "config/requirementsRead"):
        send({"jsonrpc": "2.0", "id": msg.get("id"), "result": {}})
    elif method == "thread/start":
        send({"jsonrpc": "2.0", "id": msg.get("id"), "result": {"threadId": "thread-1"}})
    elif method == "turn/start":
        # Simulate a crash mid-turn: exit without ever responding.
        sys.exit(1)
"#;

fn write_fixture() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let script_path = dir.path().join("fake-codex-app-server");
    fs::write(&script_path, FIXTURE).expect("write fixture");
    let mut perms = fs::metadata(&script_path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script_path, perms).expect("chmod");
    (dir, script_path)
}

#[tokio::test]
async fn scenario_f_pending_turn_completes_with_connection_closed() {
    let (_dir, script) = write_fixture();

    let session = CodexSessionBuilder::new()
        .binary(script)
        .working_dir("/tmp")
        .create("local-1", None)
        .await
        .expect("handshake completes");

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        session.send_text("do something".to_string()),
    )
    .await
    .expect("send_text resolves once the connection closes");

    assert!(matches!(result, Err(SessionError::ConnectionClosed)));

    // Subsequent commands fail with SessionClosed only after an explicit
    // kill(); a bare child crash surfaces as ConnectionClosed on the call
    // that raced it, per spec.md §8 Scenario F.
    session.kill().await.expect("kill is idempotent and clean");
    let err = session
        .send_text("another message".to_string())
        .await
        .expect_err("session is closed after kill");
    assert!(matches!(err, SessionError::SessionClosed));
}
