//! A Codex thread-as-session (§4.4.2), implementing the common
//! `session_core::Session` contract on top of a [`CodexAppServerProcess`]
//! that may be shared with other sessions. Generalizes the teacher's
//! `codex::mcp::client::CodexAppServer` (a fire-and-forget
//! `thread_start`/`turn_start`/`turn_interrupt` call surface) into the
//! stateful per-thread session the spec requires: one `turn/start` at a
//! time, permission requests dispatched through the shared
//! `PermissionDispatcher`, and temp image files cleaned up once their turn
//! resolves.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use session_core::{
    BackendKind, ContentBlock, Event, EventKind, PermissionDecision, PermissionDispatcher,
    PermissionRequest, Session, SessionError, SessionMetadata, SessionPhase, SequenceAllocator,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use transport::{Notification, ServerRequest};

use crate::content_input::{content_blocks_to_turn_input, ContentInputGuard};
use crate::error::CodexAdapterError;
use crate::normalize;
use crate::process::{CodexAppServerPool, CodexAppServerProcess, CodexProcessSpec};
use crate::protocol::{
    ItemNotification, ThreadResumeParams, ThreadStartParams, ThreadStartedNotification,
    TokenUsageNotification, TurnCompletedNotification, TurnInterruptParams, TurnStartParams,
    ApprovalRequestParams, METHOD_THREAD_RESUME, METHOD_THREAD_START, METHOD_TURN_INTERRUPT,
    METHOD_TURN_START, NOTIFICATION_ITEM_COMPLETED, NOTIFICATION_ITEM_STARTED,
    NOTIFICATION_THREAD_STARTED, NOTIFICATION_TOKEN_USAGE_UPDATED, NOTIFICATION_TURN_COMPLETED,
    NOTIFICATION_TURN_STARTED, SERVER_REQUEST_COMMAND_APPROVAL,
    SERVER_REQUEST_FILE_CHANGE_APPROVAL, SERVER_REQUEST_USER_INPUT,
};

const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
pub struct CodexSessionBuilder {
    pool: Option<Arc<CodexAppServerPool>>,
    binary_override: Option<PathBuf>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    init_timeout: Option<Duration>,
    model: Option<String>,
    effort: Option<String>,
    resume_thread_id: Option<String>,
}

impl CodexSessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shares an existing app-server process pool, matching the glossary's
    /// "Codex shares a single app-server process across sessions". When
    /// omitted, the builder creates a fresh single-process pool of its own.
    pub fn pool(mut self, pool: Arc<CodexAppServerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_override = Some(path.into());
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

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.effort = Some(effort.into());
        self
    }

    /// Resumes an existing thread via `thread/resume` instead of opening a
    /// new one via `thread/start`.
    pub fn resume(mut self, thread_id: impl Into<String>) -> Self {
        self.resume_thread_id = Some(thread_id.into());
        self
    }

    pub async fn create(
        self,
        local_id: impl Into<String>,
        initial_prompt: Option<String>,
    ) -> Result<Arc<CodexSession>, CodexAdapterError> {
        let local_id = local_id.into();
        let cwd = self.working_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let init_timeout = self.init_timeout.unwrap_or(DEFAULT_INIT_TIMEOUT);

        let pool = self.pool.clone().unwrap_or_else(|| Arc::new(CodexAppServerPool::new()));
        let spec = CodexProcessSpec {
            binary_override: self.binary_override.clone(),
            env: self.env.clone(),
        };
        let process = pool.acquire(&spec).await?;

        let cwd_str = cwd.to_string_lossy().into_owned();
        let response = if let Some(thread_id) = &self.resume_thread_id {
            process
                .client()
                .request_with_timeout(
                    METHOD_THREAD_RESUME,
                    serde_json::to_value(ThreadResumeParams {
                        thread_id: thread_id.clone(),
                        cwd: cwd_str,
                        model: self.model.clone(),
                    })
                    .expect("ThreadResumeParams always serializes"),
                    init_timeout,
                )
                .await?
        } else {
            process
                .client()
                .request_with_timeout(
                    METHOD_THREAD_START,
                    serde_json::to_value(ThreadStartParams {
                        cwd: cwd_str,
                        model: self.model.clone(),
                    })
                    .expect("ThreadStartParams always serializes"),
                    init_timeout,
                )
                .await?
        };

        let thread_id = response
            .get("threadId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CodexAdapterError::AgentError("thread/start response missing threadId".to_string()))?;

        let metadata = SessionMetadata::new(local_id, BackendKind::Codex, cwd);

        let notification_rx = process.client().listen_notifications().await;
        let server_request_rx = process.client().listen_server_requests().await;

        let session = Arc::new(CodexSession {
            metadata: Mutex::new(metadata),
            process,
            thread_id: thread_id.clone(),
            active_turn_id: Mutex::new(None),
            turn_guards: Mutex::new(HashMap::new()),
            event_listeners: Arc::new(Mutex::new(Vec::new())),
            permission_dispatcher: PermissionDispatcher::new(),
            permission_listeners: Arc::new(Mutex::new(Vec::new())),
            sequence: SequenceAllocator::new(),
            killed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });

        let notification_task = tokio::spawn(notification_task(session.clone(), notification_rx));
        let server_request_task = tokio::spawn(server_request_task(session.clone(), server_request_rx));
        session.tasks.lock().await.push(notification_task);
        session.tasks.lock().await.push(server_request_task);

        {
            let mut meta = session.metadata.lock().await;
            meta.set_resolved_id(thread_id);
            meta.model = self.model;
            meta.reasoning_effort = self.effort;
            meta.phase = SessionPhase::Ready;
        }

        if let Some(prompt) = initial_prompt {
            session.send_text(prompt).await.map_err(|e| match e {
                SessionError::ProtocolError(m) => CodexAdapterError::AgentError(m),
                other => CodexAdapterError::AgentError(other.to_string()),
            })?;
        }

        Ok(session)
    }
}

pub struct CodexSession {
    metadata: Mutex<SessionMetadata>,
    process: Arc<CodexAppServerProcess>,
    thread_id: String,
    active_turn_id: Mutex<Option<String>>,
    turn_guards: Mutex<HashMap<String, ContentInputGuard>>,
    event_listeners: Arc<Mutex<Vec<mpsc::UnboundedSender<Event>>>>,
    permission_dispatcher: PermissionDispatcher,
    permission_listeners: Arc<Mutex<Vec<mpsc::UnboundedSender<PermissionRequest>>>>,
    sequence: SequenceAllocator,
    killed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CodexSession {
    async fn emit(&self, kind: EventKind) {
        let event = Event {
            session_id: self.thread_id.clone(),
            sequence: self.sequence.next(),
            timestamp_ms: current_time_ms(),
            provider: BackendKind::Codex,
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

    async fn emit_all(&self, kinds: Vec<EventKind>) {
        for kind in kinds {
            self.emit(kind).await;
        }
    }

    async fn handle_notification(self: &Arc<Self>, note: Notification) {
        match note.method.as_str() {
            NOTIFICATION_THREAD_STARTED => {
                let Ok(parsed) = serde_json::from_value::<ThreadStartedNotification>(note.params) else {
                    return;
                };
                if parsed.thread_id != self.thread_id {
                    return;
                }
                self.emit_all(normalize::normalize_thread_started(&parsed)).await;
            }
            NOTIFICATION_TURN_STARTED => {
                // No normalized event for this one (§4.5 maps it implicitly
                // via the later item/turn events); the turn id is already
                // captured from `turn/start`'s own response.
            }
            NOTIFICATION_ITEM_STARTED => {
                let Ok(parsed) = serde_json::from_value::<ItemNotification>(note.params) else {
                    return;
                };
                if parsed.thread_id != self.thread_id {
                    return;
                }
                self.emit_all(normalize::normalize_item_started(&parsed)).await;
            }
            NOTIFICATION_ITEM_COMPLETED => {
                let Ok(parsed) = serde_json::from_value::<ItemNotification>(note.params) else {
                    return;
                };
                if parsed.thread_id != self.thread_id {
                    return;
                }
                self.emit_all(normalize::normalize_item_completed(&parsed)).await;
            }
            NOTIFICATION_TOKEN_USAGE_UPDATED => {
                let Ok(parsed) = serde_json::from_value::<TokenUsageNotification>(note.params) else {
                    return;
                };
                if parsed.thread_id != self.thread_id {
                    return;
                }
                self.emit_all(normalize::normalize_token_usage(&parsed)).await;
            }
            NOTIFICATION_TURN_COMPLETED => {
                let Ok(parsed) = serde_json::from_value::<TurnCompletedNotification>(note.params) else {
                    return;
                };
                if parsed.thread_id != self.thread_id {
                    return;
                }
                {
                    let mut active = self.active_turn_id.lock().await;
                    if active.as_deref() == Some(parsed.turn_id.as_str()) {
                        *active = None;
                    }
                }
                self.turn_guards.lock().await.remove(&parsed.turn_id);
                self.emit_all(normalize::normalize_turn_completed(&parsed)).await;
            }
            other => {
                debug!(method = %other, "unrecognized codex notification, ignoring per forward-compat policy");
            }
        }
    }

    async fn handle_server_request(self: &Arc<Self>, req: ServerRequest) {
        let tool_name = match req.method.as_str() {
            SERVER_REQUEST_COMMAND_APPROVAL => "commandExecution",
            SERVER_REQUEST_FILE_CHANGE_APPROVAL => "fileChange",
            SERVER_REQUEST_USER_INPUT => "requestUserInput",
            other => {
                debug!(method = %other, "unrecognized codex server request, ignoring");
                return;
            }
        };

        let Ok(params) = serde_json::from_value::<ApprovalRequestParams>(req.params.clone()) else {
            let _ = self.process.client().respond_error(req.id, -32602, "invalid approval request params", None);
            return;
        };
        if params.thread_id != self.thread_id {
            return;
        }

        let request_id = req.id.to_string();
        let request = PermissionRequest {
            request_id: request_id.clone(),
            tool_name: tool_name.to_string(),
            input: req.params.clone(),
            tool_use_id: params.item_id.clone(),
            extensions: session_core::permission::codex_extensions(params.proposed_execpolicy_amendment.clone()),
        };
        let rx = self.permission_dispatcher.register(request_id.clone()).await;
        {
            let mut listeners = self.permission_listeners.lock().await;
            listeners.retain(|tx| tx.send(request.clone()).is_ok());
        }

        let session = self.clone();
        let proposed_amendment = params.proposed_execpolicy_amendment.clone();
        tokio::spawn(async move {
            let outcome = rx.await.unwrap_or(session_core::permission::PermissionOutcome::SessionClosed);
            session.reply_permission(req.id, outcome, proposed_amendment).await;
        });
    }

    async fn reply_permission(
        &self,
        id: transport::RequestId,
        outcome: session_core::permission::PermissionOutcome,
        proposed_amendment: Option<Value>,
    ) {
        let decision = match outcome {
            session_core::permission::PermissionOutcome::Decided { decision, .. } => decision,
            session_core::permission::PermissionOutcome::SessionClosed => PermissionDecision::CancelTurn,
        };
        let mapped = session_core::permission::map_codex_decision(decision, proposed_amendment.as_ref());
        if let Some(notice) = mapped.downgrade {
            self.emit_log(notice.level, notice.message).await;
        }
        let decision_value = match serde_json::to_value(&mapped.wire) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "failed to serialize codex decision");
                return;
            }
        };
        let _ = self.process.client().respond(id, json!({ "decision": decision_value }));
    }

    async fn start_turn(&self, inputs: Vec<crate::protocol::TurnInput>, guard: ContentInputGuard) -> Result<(), SessionError> {
        if self.killed.load(Ordering::SeqCst) {
            return Err(SessionError::SessionClosed);
        }
        let (model, effort) = {
            let meta = self.metadata.lock().await;
            (meta.model.clone(), meta.reasoning_effort.clone())
        };
        let params = TurnStartParams {
            thread_id: self.thread_id.clone(),
            input: inputs,
            model,
            effort,
            config: BTreeMap::new(),
        };
        let response = self
            .process
            .client()
            .request(METHOD_TURN_START, serde_json::to_value(params).expect("TurnStartParams always serializes"))
            .await
            .map_err(CodexAdapterError::from)?;

        let turn_id = response
            .get("turnId")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(turn_id) = turn_id {
            *self.active_turn_id.lock().await = Some(turn_id.clone());
            self.turn_guards.lock().await.insert(turn_id, guard);
        }
        Ok(())
    }
}

async fn notification_task(session: Arc<CodexSession>, mut rx: mpsc::UnboundedReceiver<Notification>) {
    while let Some(note) = rx.recv().await {
        session.handle_notification(note).await;
    }
}

async fn server_request_task(session: Arc<CodexSession>, mut rx: mpsc::UnboundedReceiver<ServerRequest>) {
    while let Some(req) = rx.recv().await {
        session.handle_server_request(req).await;
    }
}

fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait(?Send)]
impl Session for CodexSession {
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
        let (inputs, guard) = content_blocks_to_turn_input(blocks)
            .await
            .map_err(CodexAdapterError::into_session_error)?;
        self.start_turn(inputs, guard).await
    }

    async fn interrupt(&self) -> Result<(), SessionError> {
        if self.killed.load(Ordering::SeqCst) {
            return Err(SessionError::SessionClosed);
        }
        let turn_id = self.active_turn_id.lock().await.clone();
        let Some(turn_id) = turn_id else {
            // §4.4.4: interrupt before any turn is a no-op.
            return Ok(());
        };
        self.process
            .client()
            .request(
                METHOD_TURN_INTERRUPT,
                serde_json::to_value(TurnInterruptParams {
                    thread_id: self.thread_id.clone(),
                    turn_id,
                })
                .expect("TurnInterruptParams always serializes"),
            )
            .await
            .map_err(CodexAdapterError::from)?;
        Ok(())
    }

    async fn kill(&self) -> Result<(), SessionError> {
        if self.killed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.permission_dispatcher.close_all().await;
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        self.turn_guards.lock().await.clear();
        let mut meta = self.metadata.lock().await;
        meta.phase = SessionPhase::Terminated;
        Ok(())
    }

    async fn set_model(&self, model: String) -> Result<(), SessionError> {
        let mut meta = self.metadata.lock().await;
        meta.model = Some(model);
        Ok(())
    }

    async fn set_permission_mode(&self, _mode: String) -> Result<(), SessionError> {
        Err(SessionError::Unsupported {
            command: "set_permission_mode".to_string(),
        })
    }

    async fn set_reasoning_effort(&self, effort: String) -> Result<(), SessionError> {
        let mut meta = self.metadata.lock().await;
        meta.reasoning_effort = Some(effort);
        Ok(())
    }

    async fn set_config_option(&self, _id: String, _value: Value) -> Result<(), SessionError> {
        Err(SessionError::Unsupported {
            command: "set_config_option".to_string(),
        })
    }

    fn resolved_session_id(&self) -> Option<String> {
        Some(self.thread_id.clone())
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

impl CodexAdapterError {
    fn into_session_error(self) -> SessionError {
        self.into()
    }
}
