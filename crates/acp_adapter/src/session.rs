//! An ACP agent-as-session (§4.4.3), implementing the common
//! `session_core::Session` contract on top of the real
//! `agent-client-protocol` crate. Grounded on `RefoundAI-ralph`'s
//! `acp/connection.rs` for the spawn → initialize → `session/new` →
//! prompt lifecycle, generalized from that file's one-shot
//! run-to-completion shape into a long-lived session: a dedicated OS
//! thread runs a current-thread Tokio runtime plus a `LocalSet` (the
//! connection's futures are `!Send`) for the whole session lifetime, and
//! the public, `Send`-friendly `AcpSession` talks to it over channels.

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_client_protocol as acp;
use async_trait::async_trait;
use serde_json::Value;
use session_core::{
    BackendKind, ContentBlock, Event, EventKind, PermissionDecision, PermissionDispatcher,
    PermissionRequest, Session, SessionError, SessionMetadata, SessionPhase, SequenceAllocator,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};

use crate::client_impl::AcpClient;
use crate::error::AcpAdapterError;
use crate::fs_policy::PathPolicy;
use crate::normalize;
use crate::terminal::TerminalManager;

const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

enum WorkerCommand {
    Prompt(Vec<ContentBlock>, oneshot::Sender<Result<(), AcpAdapterError>>),
    Interrupt(oneshot::Sender<()>),
    Kill(oneshot::Sender<()>),
}

struct WorkerReady {
    session_id: String,
}

#[derive(Default)]
pub struct AcpSessionBuilder {
    binary_override: Option<PathBuf>,
    args: Vec<String>,
    env: std::collections::BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    init_timeout: Option<Duration>,
    fs_policy: Option<PathPolicy>,
}

impl AcpSessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_override = Some(path.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
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

    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = Some(timeout);
        self
    }

    /// Defaults to a policy rooted at the working directory when omitted.
    pub fn fs_policy(mut self, policy: PathPolicy) -> Self {
        self.fs_policy = Some(policy);
        self
    }

    pub async fn create(
        self,
        local_id: impl Into<String>,
        initial_prompt: Option<String>,
    ) -> Result<Arc<AcpSession>, AcpAdapterError> {
        let local_id = local_id.into();
        let cwd = self.working_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let init_timeout = self.init_timeout.unwrap_or(DEFAULT_INIT_TIMEOUT);
        let fs_policy = self.fs_policy.clone().unwrap_or_else(|| PathPolicy::new(cwd.clone()));

        let metadata = SessionMetadata::new(local_id, BackendKind::Acp, cwd.clone());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WorkerCommand>();

        let session = Arc::new(AcpSession {
            metadata: Mutex::new(metadata),
            command_tx: cmd_tx,
            event_listeners: Arc::new(Mutex::new(Vec::new())),
            permission_dispatcher: PermissionDispatcher::new(),
            permission_listeners: Arc::new(Mutex::new(Vec::new())),
            sequence: SequenceAllocator::new(),
            killed: AtomicBool::new(false),
            session_id: Mutex::new(None),
        });

        let (ready_tx, ready_rx) = oneshot::channel::<Result<WorkerReady, AcpAdapterError>>();
        let spec = WorkerSpec {
            binary_override: self.binary_override,
            args: self.args,
            env: self.env,
            cwd,
        };
        let session_for_worker = session.clone();
        std::thread::Builder::new()
            .name("acp-worker".to_string())
            .spawn(move || worker_main(spec, fs_policy, session_for_worker, cmd_rx, ready_tx))
            .map_err(|err| AcpAdapterError::AgentError(format!("failed to spawn acp worker thread: {err}")))?;

        let ready = tokio::time::timeout(init_timeout, ready_rx)
            .await
            .map_err(|_| AcpAdapterError::InitTimeout(init_timeout))?
            .map_err(|_| AcpAdapterError::WorkerGone)??;

        {
            let mut meta = session.metadata.lock().await;
            meta.set_resolved_id(ready.session_id.clone());
            meta.phase = SessionPhase::Ready;
        }
        *session.session_id.lock().await = Some(ready.session_id);

        if let Some(prompt) = initial_prompt {
            session.send_text(prompt).await.map_err(|e| match e {
                SessionError::ProtocolError(m) => AcpAdapterError::AgentError(m),
                other => AcpAdapterError::AgentError(other.to_string()),
            })?;
        }

        Ok(session)
    }
}

struct WorkerSpec {
    binary_override: Option<PathBuf>,
    args: Vec<String>,
    env: std::collections::BTreeMap<String, String>,
    cwd: PathBuf,
}

pub struct AcpSession {
    metadata: Mutex<SessionMetadata>,
    command_tx: mpsc::UnboundedSender<WorkerCommand>,
    event_listeners: Arc<Mutex<Vec<mpsc::UnboundedSender<Event>>>>,
    permission_dispatcher: PermissionDispatcher,
    permission_listeners: Arc<Mutex<Vec<mpsc::UnboundedSender<PermissionRequest>>>>,
    sequence: SequenceAllocator,
    killed: AtomicBool,
    session_id: Mutex<Option<String>>,
}

impl AcpSession {
    pub(crate) fn permission_dispatcher(&self) -> &PermissionDispatcher {
        &self.permission_dispatcher
    }

    pub(crate) async fn publish_permission_request(&self, request: PermissionRequest) {
        let mut listeners = self.permission_listeners.lock().await;
        listeners.retain(|tx| tx.send(request.clone()).is_ok());
    }

    pub(crate) async fn emit(&self, kind: EventKind) {
        let session_id = self
            .session_id
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| "pending".to_string());
        let event = Event {
            session_id,
            sequence: self.sequence.next(),
            timestamp_ms: current_time_ms(),
            provider: BackendKind::Acp,
            kind,
        };
        let mut listeners = self.event_listeners.lock().await;
        listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) async fn emit_log(&self, level: session_core::LogLevel, message: impl Into<String>) {
        self.emit(EventKind::Log {
            level,
            message: message.into(),
        })
        .await;
    }
}

fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Runs for the lifetime of one ACP session on its own OS thread: spawns
/// the agent, drives the handshake, then services `WorkerCommand`s until
/// `Kill`. Everything in here touches `!Send` connection state, which is
/// why it cannot live on the shared multi-thread runtime the rest of the
/// workspace uses.
fn worker_main(
    spec: WorkerSpec,
    fs_policy: PathPolicy,
    session: Arc<AcpSession>,
    mut cmd_rx: mpsc::UnboundedReceiver<WorkerCommand>,
    ready_tx: oneshot::Sender<Result<WorkerReady, AcpAdapterError>>,
) {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            let _ = ready_tx.send(Err(AcpAdapterError::AgentError(format!(
                "failed to build acp worker runtime: {err}"
            ))));
            return;
        }
    };

    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, async move {
        let mut supervisor_builder = supervisor::SupervisorBuilder::new()
            .binary_override(spec.binary_override.clone().unwrap_or_else(|| PathBuf::from("acp-agent")))
            .args(spec.args.clone())
            .working_dir(spec.cwd.clone());
        for (key, value) in &spec.env {
            supervisor_builder = supervisor_builder.env(key.clone(), value.clone());
        }
        let supervisor_result = supervisor_builder.spawn().await;

        let (mut supervisor, stdin, stdout) = match supervisor_result {
            Ok(parts) => parts,
            Err(err) => {
                let _ = ready_tx.send(Err(AcpAdapterError::Spawn(err)));
                return;
            }
        };

        let terminals = Arc::new(TerminalManager::new());
        let client = AcpClient::new(session.clone(), fs_policy, terminals.clone());

        let outgoing = stdin.compat_write();
        let incoming = stdout.compat();
        let (connection, io_fut) =
            acp::ClientSideConnection::new(client, outgoing, incoming, |fut| {
                tokio::task::spawn_local(fut);
            });
        tokio::task::spawn_local(io_fut);
        let connection = Rc::new(connection);

        let init_request = acp::InitializeRequest::new(1).client_capabilities(acp::ClientCapabilities {
            fs: acp::FileSystemCapability {
                read_text_file: true,
                write_text_file: true,
            },
            terminal: true,
        });
        if let Err(err) = connection.initialize(init_request).await {
            let _ = ready_tx.send(Err(AcpAdapterError::AgentError(err.to_string())));
            return;
        }

        let cwd_str = spec.cwd.to_string_lossy().into_owned();
        let new_session = match connection
            .new_session(acp::NewSessionRequest::new(cwd_str))
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                let _ = ready_tx.send(Err(AcpAdapterError::AgentError(err.to_string())));
                return;
            }
        };
        let session_id = new_session.session_id.to_string();
        session
            .emit(EventKind::SystemInit {
                model: None,
                tools: Vec::new(),
            })
            .await;

        if ready_tx
            .send(Ok(WorkerReady {
                session_id: session_id.clone(),
            }))
            .is_err()
        {
            return;
        }

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                WorkerCommand::Prompt(blocks, reply) => {
                    let content: Vec<acp::ContentBlock> = blocks
                        .into_iter()
                        .filter_map(normalize::to_acp_content_block)
                        .collect();
                    if content.is_empty() {
                        let _ = reply.send(Ok(()));
                        continue;
                    }
                    let connection = connection.clone();
                    let session = session.clone();
                    let session_id = session_id.clone();
                    tokio::task::spawn_local(async move {
                        let result = connection
                            .prompt(acp::PromptRequest::new(session_id, content))
                            .await;
                        match result {
                            Ok(resp) => {
                                session
                                    .emit(EventKind::TurnResult {
                                        subtype: stop_reason_subtype(&resp.stop_reason),
                                        num_turns: None,
                                        cost_usd: None,
                                        usage: None,
                                    })
                                    .await;
                            }
                            Err(err) => {
                                session
                                    .emit(EventKind::Error {
                                        message: err.to_string(),
                                        detail: None,
                                    })
                                    .await;
                            }
                        }
                    });
                    let _ = reply.send(Ok(()));
                }
                WorkerCommand::Interrupt(reply) => {
                    let _ = connection.cancel(acp::CancelNotification::new(session_id.clone())).await;
                    let _ = reply.send(());
                }
                WorkerCommand::Kill(reply) => {
                    terminals.release_all().await;
                    let _ = reply.send(());
                    break;
                }
            }
        }

        let _ = supervisor.terminate().await;
    });
}

fn stop_reason_subtype(stop_reason: &acp::StopReason) -> String {
    match stop_reason {
        acp::StopReason::EndTurn => "success".to_string(),
        acp::StopReason::Cancelled => "interrupted".to_string(),
        other => format!("{other:?}").to_lowercase(),
    }
}

#[async_trait(?Send)]
impl Session for AcpSession {
    fn events(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listeners = self.event_listeners.clone();
        tokio::spawn(async move {
            listeners.lock().await.push(tx);
        });
        rx
    }

    fn permission_requests(&self) -> mpsc::UnboundedReceiver<PermissionRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listeners = self.permission_listeners.clone();
        tokio::spawn(async move {
            listeners.lock().await.push(tx);
        });
        rx
    }

    async fn send_text(&self, text: String) -> Result<(), SessionError> {
        self.send_content(vec![ContentBlock::Text { text }]).await
    }

    async fn send_content(&self, blocks: Vec<ContentBlock>) -> Result<(), SessionError> {
        if self.killed.load(Ordering::SeqCst) {
            return Err(SessionError::SessionClosed);
        }
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(WorkerCommand::Prompt(blocks, tx))
            .map_err(|_| SessionError::ConnectionClosed)?;
        rx.await.map_err(|_| SessionError::ConnectionClosed)?.map_err(SessionError::from)
    }

    async fn interrupt(&self) -> Result<(), SessionError> {
        if self.killed.load(Ordering::SeqCst) {
            return Err(SessionError::SessionClosed);
        }
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(WorkerCommand::Interrupt(tx))
            .map_err(|_| SessionError::ConnectionClosed)?;
        let _ = rx.await;
        Ok(())
    }

    async fn kill(&self) -> Result<(), SessionError> {
        if self.killed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.permission_dispatcher.close_all().await;
        let (tx, rx) = oneshot::channel();
        if self.command_tx.send(WorkerCommand::Kill(tx)).is_ok() {
            let _ = rx.await;
        }
        let mut meta = self.metadata.lock().await;
        meta.phase = SessionPhase::Terminated;
        Ok(())
    }

    async fn set_model(&self, _model: String) -> Result<(), SessionError> {
        Err(SessionError::Unsupported {
            command: "set_model".to_string(),
        })
    }

    async fn set_permission_mode(&self, _mode: String) -> Result<(), SessionError> {
        Err(SessionError::Unsupported {
            command: "set_permission_mode".to_string(),
        })
    }

    async fn set_reasoning_effort(&self, _effort: String) -> Result<(), SessionError> {
        Err(SessionError::Unsupported {
            command: "set_reasoning_effort".to_string(),
        })
    }

    async fn set_config_option(&self, _id: String, _value: Value) -> Result<(), SessionError> {
        // §9 Open Question 1: the ACP v1 schema here does not define
        // `session/set_config_option`; refuse rather than fabricate it.
        Err(SessionError::Unsupported {
            command: "set_config_option".to_string(),
        })
    }

    fn resolved_session_id(&self) -> Option<String> {
        self.session_id.try_lock().ok().and_then(|g| g.clone())
    }

    async fn respond_permission(
        &self,
        request_id: String,
        decision: PermissionDecision,
        extras: Option<Value>,
    ) -> Result<(), SessionError> {
        self.permission_dispatcher.respond(&request_id, decision, extras).await;
        Ok(())
    }
}
