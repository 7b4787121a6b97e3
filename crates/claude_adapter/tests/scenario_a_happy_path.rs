//! End-to-end drive of spec.md §8 Scenario A ("Claude happy path") through a
//! real `ClaudeSession` talking to a fixture child process over actual
//! pipes, rather than unit-testing `normalize_sdk_message` in isolation.
//! Mirrors the teacher's `codex::mcp::test_support::write_fake_app_server`
//! pattern: a tiny Python script stands in for the agent binary.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use claude_adapter::ClaudeSessionBuilder;
use session_core::{EventKind, Session};

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
    mtype = msg.get("type")
    if mtype == "control_request":
        send({"type": "session.created", "id": msg.get("id"), "sessionId": "s1"})
        send({
            "type": "sdk.message",
            "payload": {
                "type": "system",
                "subtype": "init",
                "model": "claude-sonnet-4-5",
                "tools": ["Read", "Bash"],
            },
        })
    elif mtype == "user.message":
        send({
            "type": "sdk.message",
            "payload": {
                "type": "assistant",
                "message": {"content": [{"type": "text", "text": "Hello!"}]},
            },
        })
        send({
            "type": "sdk.message",
            "payload": {
                "type": "result",
                "subtype": "success",
                "num_turns": 1,
                "total_cost_usd": 0.001,
            },
        })
"#;

fn write_fixture() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let script_path = dir.path().join("fake-claude");
    fs::write(&script_path, FIXTURE).expect("write fixture");
    let mut perms = fs::metadata(&script_path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script_path, perms).expect("chmod");
    (dir, script_path)
}

#[tokio::test]
async fn scenario_a_claude_happy_path_end_to_end() {
    let (_dir, script) = write_fixture();

    let session = ClaudeSessionBuilder::new()
        .binary(script)
        .working_dir("/tmp")
        .create("local-1", None)
        .await
        .expect("handshake completes");

    assert_eq!(session.resolved_session_id().as_deref(), Some("s1"));

    let mut events = session.events();
    session.send_text("hi".to_string()).await.expect("send_text");

    let mut seen = Vec::new();
    for _ in 0..2 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event within timeout")
            .expect("event channel open");
        seen.push(event.kind);
    }

    assert!(matches!(seen[0], EventKind::AssistantText { .. }));
    match &seen[0] {
        EventKind::AssistantText { text } => assert_eq!(text, "Hello!"),
        _ => unreachable!(),
    }
    match &seen[1] {
        EventKind::TurnResult {
            num_turns,
            cost_usd,
            ..
        } => {
            assert_eq!(*num_turns, Some(1));
            assert_eq!(*cost_usd, Some(0.001));
        }
        other => panic!("expected TurnResult, got {other:?}"),
    }

    session.kill().await.expect("kill is clean");
}
