//! A persistent, duplex `claude --input-format stream-json` session.
//!
//! This generalizes the teacher's `claude_code::client::ClaudeClient`, which
//! only ever runs one-shot `--print` invocations (spawn, write whole
//! prompt, read whole output, exit), into the long-lived conversation the
//! spec requires: one child process stays alive for the life of the
//! session, a `control_request`/`session.created` handshake brings it to
//! `Ready`, and subsequent turns are driven by writing `user.message`
//! envelopes and reading `sdk.message` frames as they stream in. The
//! builder shape (`ClaudeSessionBuilder`, `Default` + chained setters,
//! `CLAUDE_CODE_PATH` env fallback to the bare `claude` name) is carried
//! over from `ClaudeClientBuilder`/`resolve_binary` unchanged.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use session_core::{
    BackendKind, ContentBlock, Event, EventKind, PermissionDecision,
    PermissionDispatcher, PermissionExtensions, PermissionRequest, Session, SessionError,
    SessionMetadata, SessionPhase, SequenceAllocator,
};
use supervisor::{Supervisor, SupervisorBuilder};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use transport::{decode_line, BoundedLine, LineReader, LineWriter, DEFAULT_MAX_LINE_BYTES};

use crate::envelope::{AgentMessage, CallbackRequestPayload, ClientMessage, ControlRequestPayload};
use crate::error::ClaudeAdapterError;
use crate::normalize::normalize_sdk_message;

const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct ClaudeSessionBuilder {
    binary_override: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    init_timeout: Option<Duration>,
    model: Option<String>,
    permission_mode: Option<String>,
}

impl ClaudeSessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_override = Some(path.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = Some(timeout);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn permission_mode(mut self, mode: impl Into<String>) -> Self {
        self.permission_mode = Some(mode.into());
        self
    }

    pub async fn create(
        self,
        local_id: impl Into<String>,
        initial_prompt: Option<String>,
    ) -> Result<Arc<ClaudeSession>, ClaudeAdapterError> {
        let local_id = local_id.into();
        let cwd = self.working_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let init_timeout = self.init_timeout.unwrap_or(DEFAULT_INIT_TIMEOUT);

        let mut builder = SupervisorBuilder::new()
            .binary_env_var("CLAUDE_CODE_PATH")
            .default_binary_name("claude")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--input-format")
            .arg("stream-json")
            .arg("--permission-prompt-tool")
            .arg("stdio")
            .working_dir(&cwd)
            .env("DISABLE_AUTOUPDATER", "1");
        if let Some(binary) = &self.binary_override {
            builder = builder.binary_override(binary.clone());
        }
        for (k, v) in &self.env {
            builder = builder.env(k, v);
        }

        let (mut supervisor, stdin, stdout) = builder.spawn().await?;
        let stderr_lines = supervisor.take_stderr_lines();

        let (writer_tx, writer_rx) = mpsc::unbounded_channel::<Value>();
        let writer_task = tokio::spawn(writer_task(stdin, writer_rx));

        let metadata = SessionMetadata::new(local_id.clone(), BackendKind::Claude, cwd);

        let session = Arc::new(ClaudeSession {
            metadata: Mutex::new(metadata),
            supervisor: Mutex::new(Some(supervisor)),
            writer: writer_tx,
            pending_control: Arc::new(Mutex::new(HashMap::new())),
            handshake: Arc::new(Mutex::new(None)),
            event_listeners: Arc::new(Mutex::new(Vec::new())),
            permission_dispatcher: PermissionDispatcher::new(),
            permission_listeners: Arc::new(Mutex::new(Vec::new())),
            sequence: SequenceAllocator::new(),
            killed: AtomicBool::new(false),
            tasks: Mutex::new(vec![writer_task]),
        });

        let (session_created_tx, session_created_rx) = oneshot::channel();
        let (system_init_tx, system_init_rx) = oneshot::channel();
        {
            let mut handshake = session.handshake.lock().await;
            *handshake = Some(HandshakeSlots {
                session_created: Some(session_created_tx),
                system_init: Some(system_init_tx),
            });
        }

        let reader_task = tokio::spawn(reader_task(stdout, session.clone()));
        if let Some(stderr_lines) = stderr_lines {
            let stderr_task = tokio::spawn(stderr_log_task(stderr_lines, session.clone()));
            session.tasks.lock().await.push(stderr_task);
        }
        session.tasks.lock().await.push(reader_task);

        session
            .send_envelope(ClientMessage::ControlRequest {
                id: "init-1".to_string(),
                payload: ControlRequestPayload::Initialize,
            })
            .await?;

        let handshake_result = tokio::time::timeout(init_timeout, async {
            let sid = session_created_rx
                .await
                .map_err(|_| ClaudeAdapterError::InitTimeout(init_timeout))?;
            let init = system_init_rx
                .await
                .map_err(|_| ClaudeAdapterError::InitTimeout(init_timeout))?;
            Ok::<_, ClaudeAdapterError>((sid, init))
        })
        .await
        .map_err(|_| ClaudeAdapterError::InitTimeout(init_timeout))??;

        let (session_id, (model, _tools)) = handshake_result;
        {
            let mut meta = session.metadata.lock().await;
            meta.set_resolved_id(session_id);
            meta.model = model.or(self.model);
            meta.permission_mode = self.permission_mode;
            meta.phase = SessionPhase::Ready;
        }

        if let Some(prompt) = initial_prompt {
            session.send_text(prompt).await.map_err(|e| match e {
                SessionError::ProtocolError(m) => ClaudeAdapterError::AgentError(m),
                other => ClaudeAdapterError::AgentError(other.to_string()),
            })?;
        }

        Ok(session)
    }
}

struct HandshakeSlots {
    session_created: Option<oneshot::Sender<String>>,
    system_init: Option<oneshot::Sender<(Option<String>, Vec<String>)>>,
}

pub struct ClaudeSession {
    metadata: Mutex<SessionMetadata>,
    supervisor: Mutex<Option<Supervisor>>,
    writer: mpsc::UnboundedSender<Value>,
    pending_control: Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value, ClaudeAdapterError>>>>>,
    handshake: Arc<Mutex<Option<HandshakeSlots>>>,
    event_listeners: Arc<Mutex<Vec<mpsc::UnboundedSender<Event>>>>,
    permission_dispatcher: PermissionDispatcher,
    permission_listeners: Arc<Mutex<Vec<mpsc::UnboundedSender<PermissionRequest>>>>,
    sequence: SequenceAllocator,
    killed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClaudeSession {
    async fn send_envelope(&self, message: ClientMessage) -> Result<(), ClaudeAdapterError> {
        let value = serde_json::to_value(&message)
            .map_err(|e| ClaudeAdapterError::InvalidRequest(e.to_string()))?;
        self.writer
            .send(value)
            .map_err(|_| ClaudeAdapterError::Transport(transport::TransportError::ConnectionClosed))
    }

    async fn emit(&self, kind: EventKind) {
        let session_id = self
            .metadata
            .lock()
            .await
            .resolved_id
            .clone()
            .unwrap_or_default();
        let event = Event {
            session_id,
            sequence: self.sequence.next(),
            timestamp_ms: current_time_ms(),
            provider: BackendKind::Claude,
            kind,
        };
        let mut listeners = self.event_listeners.lock().await;
        listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    async fn emit_log(&self, level: session_core::LogLevel, message: impl Into<String>) {
        self.emit(EventKind::Log {
            level,
            message: message.into(),
        })
        .await;
    }

    async fn handle_agent_message(self: &Arc<Self>, message: AgentMessage) {
        match message {
            AgentMessage::SessionCreated { id, session_id } => {
                if let Some(id) = id {
                    let mut pending = self.pending_control.lock().await;
                    if let Some(tx) = pending.remove(&id) {
                        let _ = tx.send(Ok(json!({"sessionId": session_id.clone()})));
                    }
                }
                let mut handshake = self.handshake.lock().await;
                if let Some(slots) = handshake.as_mut() {
                    if let Some(tx) = slots.session_created.take() {
                        let _ = tx.send(session_id);
                    }
                }
            }
            AgentMessage::SdkMessage { payload } => {
                let is_system_init = payload.get("type").and_then(Value::as_str) == Some("system")
                    && payload.get("subtype").and_then(Value::as_str) == Some("init");
                if is_system_init {
                    let model = payload
                        .get("model")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    let tools = payload
                        .get("tools")
                        .and_then(Value::as_array)
                        .map(|arr| {
                            arr.iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default();
                    let mut handshake = self.handshake.lock().await;
                    if let Some(slots) = handshake.as_mut() {
                        if let Some(tx) = slots.system_init.take() {
                            let _ = tx.send((model, tools));
                        }
                    }
                }
                for kind in normalize_sdk_message(&payload) {
                    self.emit(kind).await;
                }
            }
            AgentMessage::CallbackRequest { id, payload } => {
                self.handle_permission_request(id, payload).await;
            }
            AgentMessage::ControlResponse { id, payload } => {
                if let Some(id) = id {
                    let mut pending = self.pending_control.lock().await;
                    if let Some(tx) = pending.remove(&id) {
                        let _ = tx.send(Ok(payload));
                    }
                }
            }
            AgentMessage::Error { message, detail } => {
                self.emit(EventKind::Error { message, detail }).await;
            }
            AgentMessage::Unknown => {
                debug!("unrecognized claude envelope type, ignoring per forward-compat policy");
            }
        }
    }

    async fn handle_permission_request(self: &Arc<Self>, id: String, payload: CallbackRequestPayload) {
        if payload.callback_type != "can_use_tool" {
            debug!(callback_type = %payload.callback_type, "ignoring unrecognized callback type");
            return;
        }

        let request = PermissionRequest {
            request_id: id.clone(),
            tool_name: payload.tool_name.clone().unwrap_or_default(),
            input: payload.tool_input.clone().unwrap_or(Value::Null),
            tool_use_id: payload.tool_use_id.clone(),
            extensions: PermissionExtensions::default(),
        };

        let rx = self.permission_dispatcher.register(id.clone()).await;
        {
            let mut listeners = self.permission_listeners.lock().await;
            listeners.retain(|tx| tx.send(request.clone()).is_ok());
        }

        let session = self.clone();
        tokio::spawn(async move {
            let outcome = rx.await.unwrap_or(session_core::permission::PermissionOutcome::SessionClosed);
            session.reply_permission(id, outcome).await;
        });
    }

    async fn reply_permission(
        &self,
        id: String,
        outcome: session_core::permission::PermissionOutcome,
    ) {
        let (decision, extras) = match outcome {
            session_core::permission::PermissionOutcome::Decided { decision, extras } => {
                (decision, extras)
            }
            session_core::permission::PermissionOutcome::SessionClosed => {
                (PermissionDecision::CancelTurn, None)
            }
        };
        let updated_input = extras.as_ref().and_then(|v| v.get("updated_input")).cloned();
        let mapped = session_core::permission::map_claude_decision(decision, updated_input);
        if let Some(notice) = mapped.downgrade {
            self.emit_log(notice.level, notice.message).await;
        }
        let payload = match serde_json::to_value(&mapped.wire) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "failed to serialize claude permission reply");
                return;
            }
        };
        let _ = self
            .send_envelope(ClientMessage::CallbackResponse { id, payload })
            .await;
    }

    async fn fail_all(&self) {
        self.permission_dispatcher.close_all().await;
        let mut pending = self.pending_control.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(ClaudeAdapterError::Transport(
                transport::TransportError::ConnectionClosed,
            )));
        }
    }
}

async fn writer_task(stdin: tokio::process::ChildStdin, mut rx: mpsc::UnboundedReceiver<Value>) {
    let mut writer = LineWriter::new(stdin);
    while let Some(value) = rx.recv().await {
        if let Err(err) = writer.write_value(&value).await {
            warn!(error = %err, "failed writing to claude stdin, stopping");
            break;
        }
    }
}

async fn reader_task(stdout: tokio::process::ChildStdout, session: Arc<ClaudeSession>) {
    let mut reader = LineReader::new(stdout, DEFAULT_MAX_LINE_BYTES);
    while let Some(line) = reader.next_line().await {
        match line {
            BoundedLine::Line { bytes, .. } => {
                let Some(decoded) = decode_line(&bytes) else {
                    continue;
                };
                match decoded {
                    Ok(value) => match serde_json::from_value::<AgentMessage>(value) {
                        Ok(message) => session.handle_agent_message(message).await,
                        Err(err) => debug!(error = %err, "failed to decode claude envelope, skipping"),
                    },
                    Err(err) => debug!(error = %err, "failed to parse claude line as JSON, skipping"),
                }
            }
            BoundedLine::LineTooLong { line_number, .. } => {
                warn!(line_number, "discarded oversized claude output line");
            }
            BoundedLine::Io { .. } => break,
        }
    }
    session.fail_all().await;
}

async fn stderr_log_task(
    mut lines: mpsc::UnboundedReceiver<supervisor::StderrLine>,
    session: Arc<ClaudeSession>,
) {
    while let Some(line) = lines.recv().await {
        session
            .emit_log(session_core::LogLevel::Debug, line.text)
            .await;
    }
}

fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait(?Send)]
impl Session for ClaudeSession {
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
        if self.killed.load(Ordering::SeqCst) {
            return Err(SessionError::SessionClosed);
        }
        self.send_envelope(ClientMessage::UserMessage {
            payload: crate::envelope::UserMessagePayload {
                content: vec![ContentBlock::Text { text }],
            },
        })
        .await
        .map_err(Into::into)
    }

    async fn send_content(&self, blocks: Vec<ContentBlock>) -> Result<(), SessionError> {
        if self.killed.load(Ordering::SeqCst) {
            return Err(SessionError::SessionClosed);
        }
        self.send_envelope(ClientMessage::UserMessage {
            payload: crate::envelope::UserMessagePayload { content: blocks },
        })
        .await
        .map_err(Into::into)
    }

    async fn interrupt(&self) -> Result<(), SessionError> {
        if self.killed.load(Ordering::SeqCst) {
            return Err(SessionError::SessionClosed);
        }
        self.send_envelope(ClientMessage::SessionInterrupt)
            .await
            .map_err(Into::into)
    }

    async fn kill(&self) -> Result<(), SessionError> {
        if self.killed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.fail_all().await;
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        let mut supervisor = self.supervisor.lock().await;
        if let Some(mut supervisor) = supervisor.take() {
            let _ = supervisor.terminate().await;
        }
        let mut meta = self.metadata.lock().await;
        meta.phase = SessionPhase::Terminated;
        Ok(())
    }

    async fn set_model(&self, model: String) -> Result<(), SessionError> {
        let mut meta = self.metadata.lock().await;
        meta.model = Some(model);
        Ok(())
    }

    async fn set_permission_mode(&self, mode: String) -> Result<(), SessionError> {
        let mut meta = self.metadata.lock().await;
        meta.permission_mode = Some(mode);
        Ok(())
    }

    async fn set_reasoning_effort(&self, _effort: String) -> Result<(), SessionError> {
        Err(SessionError::Unsupported {
            command: "set_reasoning_effort".to_string(),
        })
    }

    async fn set_config_option(&self, _id: String, _value: Value) -> Result<(), SessionError> {
        Err(SessionError::Unsupported {
            command: "set_config_option".to_string(),
        })
    }

    fn resolved_session_id(&self) -> Option<String> {
        self.metadata.try_lock().ok().and_then(|m| m.resolved_id.clone())
    }

    async fn respond_permission(
        &self,
        request_id: String,
        decision: PermissionDecision,
        extras: Option<Value>,
    ) -> Result<(), SessionError> {
        self.permission_dispatcher
            .respond(&request_id, decision, extras)
            .await;
        Ok(())
    }
}
