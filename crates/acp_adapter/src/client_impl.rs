//! Implements `agent_client_protocol::Client` — the methods the agent
//! calls back into us for (§4.4.3: "the adapter must implement these
//! against the host filesystem and a terminal manager, applying the
//! safety policy of §7"). Grounded on the `Client` impl in
//! `crafter-station-crafter-code`'s `acp/client.rs`: same method set,
//! same request/response type shapes, same pattern of matching
//! `ToolCallContent` variants in `session_notification`.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use agent_client_protocol as acp;
use async_trait::async_trait;
use session_core::permission::{acp_extensions, AcpPermissionOption, PermissionOutcome};
use session_core::PermissionDecision;

use crate::fs_policy::PathPolicy;
use crate::normalize;
use crate::session::AcpSession;
use crate::terminal::TerminalManager;

fn acp_err(code: i32, message: impl Into<String>) -> acp::Error {
    acp::Error::new(code, message.into())
}

const PATH_POLICY_VIOLATION_CODE: i32 = -32001;

/// Converts one ACP permission-option kind into the snake_case vocabulary
/// [`session_core::permission::map_acp_decision`] matches against (§4.6:
/// "allow_once, allow_always, reject_once, reject_always"). Anything the
/// schema adds later falls back to `"unknown"` rather than panicking.
fn permission_option_kind_str(kind: &acp::PermissionOptionKind) -> &'static str {
    match kind {
        acp::PermissionOptionKind::AllowOnce => "allow_once",
        acp::PermissionOptionKind::AllowAlways => "allow_always",
        acp::PermissionOptionKind::RejectOnce => "reject_once",
        acp::PermissionOptionKind::RejectAlways => "reject_always",
        #[allow(unreachable_patterns)]
        _ => "unknown",
    }
}

pub struct AcpClient {
    pub(crate) session: Arc<AcpSession>,
    pub(crate) fs_policy: PathPolicy,
    pub(crate) terminals: Arc<TerminalManager>,
    fs_request_seq: AtomicU64,
}

impl AcpClient {
    pub fn new(session: Arc<AcpSession>, fs_policy: PathPolicy, terminals: Arc<TerminalManager>) -> Self {
        Self {
            session,
            fs_policy,
            terminals,
            fs_request_seq: AtomicU64::new(0),
        }
    }

    /// Enforces §7 for one path. Returns `Ok(())` when the operation may
    /// proceed (either the path was already inside the allowed roots, or a
    /// raised permission request came back approved).
    async fn enforce_path_policy(&self, tool_name: &str, path: &Path) -> Result<(), acp::Error> {
        if self.fs_policy.contains(path) {
            return Ok(());
        }

        if self.fs_policy.deny_immediately() {
            return Err(acp_err(
                PATH_POLICY_VIOLATION_CODE,
                format!("path {} is outside the session's allowed roots", path.display()),
            ));
        }

        let request_id = format!("acp-fs-{}", self.fs_request_seq.fetch_add(1, Ordering::SeqCst));
        let request = session_core::PermissionRequest {
            request_id: request_id.clone(),
            tool_name: tool_name.to_string(),
            input: serde_json::json!({ "path": path.display().to_string() }),
            tool_use_id: None,
            extensions: acp_extensions(serde_json::Value::Null, Some(path.to_path_buf())),
        };

        let rx = self.session.permission_dispatcher().register(request_id.clone()).await;
        self.session.publish_permission_request(request).await;

        let outcome = rx.await.unwrap_or(PermissionOutcome::SessionClosed);
        match outcome {
            PermissionOutcome::Decided {
                decision: PermissionDecision::Deny | PermissionDecision::CancelTurn,
                ..
            }
            | PermissionOutcome::SessionClosed => Err(acp_err(
                PATH_POLICY_VIOLATION_CODE,
                format!("access to {} was denied", path.display()),
            )),
            PermissionOutcome::Decided { .. } => Ok(()),
        }
    }
}

#[async_trait(?Send)]
impl acp::Client for AcpClient {
    async fn request_permission(
        &self,
        args: acp::RequestPermissionRequest,
    ) -> acp::Result<acp::RequestPermissionResponse> {
        let request_id = format!("acp-perm-{}", args.tool_call.tool_call_id);
        let options: Vec<AcpPermissionOption> = args
            .options
            .iter()
            .map(|o| AcpPermissionOption {
                option_id: o.option_id.to_string(),
                kind: permission_option_kind_str(&o.kind).to_string(),
            })
            .collect();

        let tool_name = args
            .tool_call
            .fields
            .title
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| args.tool_call.fields.kind.as_ref().map(|k| format!("{k:?}").to_lowercase()))
            .unwrap_or_else(|| "tool_call".to_string());

        let normalized = session_core::PermissionRequest {
            request_id: request_id.clone(),
            tool_name,
            input: serde_json::to_value(&args.tool_call.fields).unwrap_or(serde_json::Value::Null),
            tool_use_id: Some(args.tool_call.tool_call_id.to_string()),
            extensions: acp_extensions(
                serde_json::to_value(&args.options).unwrap_or(serde_json::Value::Null),
                None,
            ),
        };

        let rx = self.session.permission_dispatcher().register(request_id.clone()).await;
        self.session.publish_permission_request(normalized).await;

        // No request-level timeout here: §6 bounds only small control calls
        // and the turn/prompt calls, not this reverse-direction wait. A
        // session `kill()` resolves every outstanding registration via
        // `close_all`, same as the Claude/Codex adapters.
        let outcome = rx.await.unwrap_or(PermissionOutcome::SessionClosed);
        let decision = match outcome {
            PermissionOutcome::Decided { decision, .. } => decision,
            PermissionOutcome::SessionClosed => PermissionDecision::CancelTurn,
        };

        let mapped = session_core::permission::map_acp_decision(decision, &options);
        if let Some(notice) = mapped.downgrade {
            self.session.emit_log(notice.level, notice.message).await;
        }

        match mapped.wire {
            session_core::permission::AcpOutcomeWire::Selected { option_id } => {
                Ok(acp::RequestPermissionResponse::new(
                    acp::RequestPermissionOutcome::Selected(acp::SelectedPermissionOutcome::new(
                        acp::PermissionOptionId::new(option_id),
                    )),
                ))
            }
            session_core::permission::AcpOutcomeWire::Cancelled => Ok(acp::RequestPermissionResponse::new(
                acp::RequestPermissionOutcome::Cancelled,
            )),
        }
    }

    async fn session_notification(&self, args: acp::SessionNotification) -> acp::Result<()> {
        let kind = normalize::normalize_session_update(args.update);
        self.session.emit(kind).await;
        Ok(())
    }

    async fn read_text_file(&self, args: acp::ReadTextFileRequest) -> acp::Result<acp::ReadTextFileResponse> {
        let path = Path::new(&args.path);
        self.enforce_path_policy("fs/read_text_file", path).await?;

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| acp_err(-32002, format!("failed to read {}: {err}", path.display())))?;

        let content = match (args.line, args.limit) {
            (Some(line), limit) => {
                let start = (line as usize).saturating_sub(1);
                let lines: Vec<&str> = content.lines().collect();
                let end = limit.map(|n| (start + n as usize).min(lines.len())).unwrap_or(lines.len());
                lines.get(start..end).map(|slice| slice.join("\n")).unwrap_or_default()
            }
            (None, Some(limit)) => content.lines().take(limit as usize).collect::<Vec<_>>().join("\n"),
            (None, None) => content,
        };

        Ok(acp::ReadTextFileResponse::new(content))
    }

    async fn write_text_file(&self, args: acp::WriteTextFileRequest) -> acp::Result<acp::WriteTextFileResponse> {
        let path = Path::new(&args.path);
        self.enforce_path_policy("fs/write_text_file", path).await?;

        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        tokio::fs::write(path, &args.content)
            .await
            .map_err(|err| acp_err(-32003, format!("failed to write {}: {err}", path.display())))?;

        Ok(acp::WriteTextFileResponse::new())
    }

    async fn create_terminal(&self, args: acp::CreateTerminalRequest) -> acp::Result<acp::CreateTerminalResponse> {
        if let Some(cwd) = &args.cwd {
            self.enforce_path_policy("terminal/create", Path::new(cwd)).await?;
        }

        let mut cmd = tokio::process::Command::new(&args.command);
        cmd.args(&args.args);
        for env_var in &args.env {
            cmd.env(&env_var.name, &env_var.value);
        }
        if let Some(cwd) = &args.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|err| acp_err(-32004, format!("failed to spawn terminal command: {err}")))?;

        let terminal_id = self.terminals.allocate_id();
        self.terminals.register(terminal_id.clone(), child).await;

        Ok(acp::CreateTerminalResponse::new(terminal_id))
    }

    async fn terminal_output(&self, args: acp::TerminalOutputRequest) -> acp::Result<acp::TerminalOutputResponse> {
        let terminal_id = args.terminal_id.to_string();
        let (output, truncated, exit_code) = self
            .terminals
            .output(&terminal_id)
            .await
            .ok_or_else(|| acp_err(-32005, "unknown terminal id"))?;

        let mut response = acp::TerminalOutputResponse::new(output, truncated);
        if let Some(code) = exit_code {
            response = response.exit_status(acp::TerminalExitStatus::new().exit_code(Some(code as u32)));
        }
        Ok(response)
    }

    async fn wait_for_terminal_exit(
        &self,
        args: acp::WaitForTerminalExitRequest,
    ) -> acp::Result<acp::WaitForTerminalExitResponse> {
        let terminal_id = args.terminal_id.to_string();
        let exit_code = self
            .terminals
            .wait_for_exit(&terminal_id)
            .await
            .ok_or_else(|| acp_err(-32005, "unknown terminal id"))?;

        Ok(acp::WaitForTerminalExitResponse::new(
            acp::TerminalExitStatus::new().exit_code(exit_code.map(|c| c as u32)),
        ))
    }

    async fn kill_terminal_command(
        &self,
        args: acp::KillTerminalCommandRequest,
    ) -> acp::Result<acp::KillTerminalCommandResponse> {
        self.terminals.kill(&args.terminal_id.to_string()).await;
        Ok(acp::KillTerminalCommandResponse::new())
    }

    async fn release_terminal(&self, args: acp::ReleaseTerminalRequest) -> acp::Result<acp::ReleaseTerminalResponse> {
        self.terminals.release(&args.terminal_id.to_string()).await;
        Ok(acp::ReleaseTerminalResponse::new())
    }
}
