//! End-to-end drive of spec.md §8 Scenario E ("interrupt convergence")
//! through a real `CodexSession` and a fixture app-server process.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use codex_adapter::CodexSessionBuilder;
use session_core::{EventKind, Session};

const FIXTURE: &str = r#"#!/usr/bin/env python3
import json
import sys
import threading
import time

def send(obj):
    sys.stdout.write(json.dumps(obj) + "\n")
    sys.stdout.flush()

state = {"cancelled": False}

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
        req_id = msg.get("id")
        turn_id = f"turn-{req_id}"
        send({"jsonrpc": "2.0", "id": req_id, "result": {"turnId": turn_id}})
        # Never emit turn/completed on our own -- only once interrupted.
    elif method == "turn/interrupt":
        params = msg.get("params", {})
        send({"jsonrpc": "2.0", "id": msg.get("id"), "result": {"ok": True}})
        send({
            "jsonrpc": "2.0",
            "method": "turn/completed",
            "params": {
                "threadId": params.get("threadId"),
                "turnId": params.get("turnId"),
                "subtype": "interrupted",
            },
        })
    elif method == "exit":
        break
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
async fn scenario_e_interrupt_converges_to_interrupted_turn_result() {
    let (_dir, script) = write_fixture();

    let session = CodexSessionBuilder::new()
        .binary(script)
        .working_dir("/tmp")
        .create("local-1", None)
        .await
        .expect("handshake completes");

    let mut events = session.events();
    session.send_text("start a long task".to_string()).await.expect("send_text");

    session.interrupt().await.expect("interrupt succeeds");

    let turn_result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel open");
            if let EventKind::TurnResult { subtype, .. } = event.kind {
                return subtype;
            }
        }
    })
    .await
    .expect("TurnResult within grace window");
    assert_eq!(turn_result, "interrupted");

    // A subsequent send_text still succeeds: the session stays usable.
    session
        .send_text("follow-up message".to_string())
        .await
        .expect("session remains usable after interrupt");

    session.kill().await.expect("kill is clean");
}
