//! End-to-end drive of spec.md §8 Scenario B and C (Codex permission with
//! and without a persistent-allow amendment) through a real `CodexSession`
//! talking to a fixture app-server over actual pipes. The fixture is a
//! small Python script standing in for `codex app-server`, mirroring the
//! teacher's `codex::mcp::test_support::write_fake_app_server` pattern.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use codex_adapter::CodexSessionBuilder;
use serde_json::Value;
use session_core::{PermissionDecision, PermissionRequest, Session};

const FIXTURE: &str = r#"#!/usr/bin/env python3
import json
import sys
import threading
import time

def send(obj):
    sys.stdout.write(json.dumps(obj) + "\n")
    sys.stdout.flush()

def handle_turn(req_id, params, with_amendment):
    thread_id = params["threadId"]
    turn_id = f"turn-{req_id}"

    def worker():
        time.sleep(0.02)
        approval = {
            "jsonrpc": "2.0",
            "id": 9000 + req_id,
            "method": "item/commandExecution/requestApproval",
            "params": {
                "threadId": thread_id,
                "turnId": turn_id,
                "itemId": f"item-{req_id}",
                "command": "rm -rf /tmp/x",
            },
        }
        if with_amendment:
            approval["params"]["proposedExecpolicyAmendment"] = [{"pattern": "rm -rf /tmp/*"}]
        send(approval)

    threading.Thread(target=worker, daemon=True).start()
    send({"jsonrpc": "2.0", "id": req_id, "result": {"turnId": turn_id, "accepted": True}})

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
        params = msg.get("params", {})
        with_amendment = "no-amendment" not in params.get("input", [{}])[0].get("text", "")
        handle_turn(msg.get("id"), params, with_amendment)
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

async fn next_permission_request(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<PermissionRequest>,
) -> PermissionRequest {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("permission request within timeout")
        .expect("permission channel open")
}

#[tokio::test]
async fn scenario_b_persistent_allow_with_amendment() {
    let (_dir, script) = write_fixture();

    let session = CodexSessionBuilder::new()
        .binary(script)
        .working_dir("/tmp")
        .create("local-1", None)
        .await
        .expect("handshake completes");

    let mut permissions = session.permission_requests();
    session.send_text("please clean up".to_string()).await.expect("send_text");

    let request = next_permission_request(&mut permissions).await;
    assert_eq!(request.tool_name, "commandExecution");
    let amendment = request
        .extensions
        .codex_proposed_execpolicy_amendment
        .clone()
        .expect("amendment present");
    assert_eq!(
        amendment,
        Value::Array(vec![serde_json::json!({"pattern": "rm -rf /tmp/*"})])
    );

    session
        .respond_permission(request.request_id.clone(), PermissionDecision::AllowAlways, None)
        .await
        .expect("respond");

    session.kill().await.expect("kill is clean");
}

#[tokio::test]
async fn scenario_c_persistent_allow_falls_back_without_amendment() {
    let (_dir, script) = write_fixture();

    let session = CodexSessionBuilder::new()
        .binary(script)
        .working_dir("/tmp")
        .create("local-1", None)
        .await
        .expect("handshake completes");

    let mut permissions = session.permission_requests();
    let mut events = session.events();
    session
        .send_text("no-amendment please clean up".to_string())
        .await
        .expect("send_text");

    let request = next_permission_request(&mut permissions).await;
    assert!(request.extensions.codex_proposed_execpolicy_amendment.is_none());

    session
        .respond_permission(request.request_id.clone(), PermissionDecision::AllowAlways, None)
        .await
        .expect("respond");

    let downgrade_logged = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel open");
            if let session_core::EventKind::Log { level, message } = event.kind {
                if level == session_core::LogLevel::Info {
                    return message;
                }
            }
        }
    })
    .await
    .expect("downgrade log within timeout");
    assert!(downgrade_logged.to_lowercase().contains("amendment") || downgrade_logged.to_lowercase().contains("downgrad"));

    session.kill().await.expect("kill is clean");
}
