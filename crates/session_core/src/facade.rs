//! Transport Facade (C7): the consumer-facing object. One `EventTransport`
//! per active session. Validates commands against the session's declared
//! `BackendCapabilities` before they ever reach the adapter, generalizing
//! the teacher's per-backend ad hoc checks into one table-driven gate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::error::SessionError;
use crate::model::{BackendCapabilities, Command, Event, PermissionRequest, TransportStatus};
use crate::session_trait::Session;

/// The public, backend-agnostic handle a consumer holds for the lifetime of
/// one session.
pub struct EventTransport<S: Session> {
    session: Arc<S>,
    capabilities: BackendCapabilities,
    status_tx: watch::Sender<TransportStatus>,
    status_rx: watch::Receiver<TransportStatus>,
    disposed: AtomicBool,
}

impl<S: Session> EventTransport<S> {
    pub fn new(session: Arc<S>, capabilities: BackendCapabilities) -> Self {
        let (status_tx, status_rx) = watch::channel(TransportStatus::Connecting);
        Self {
            session,
            capabilities,
            status_tx,
            status_rx,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn mark_connected(&self) {
        let _ = self.status_tx.send(TransportStatus::Connected);
    }

    pub fn mark_disconnected(&self) {
        let _ = self.status_tx.send(TransportStatus::Disconnected);
    }

    pub fn events(&self) -> mpsc::UnboundedReceiver<Event> {
        self.session.events()
    }

    pub fn permission_requests(&self) -> mpsc::UnboundedReceiver<PermissionRequest> {
        self.session.permission_requests()
    }

    pub fn status(&self) -> watch::Receiver<TransportStatus> {
        self.status_rx.clone()
    }

    /// Validates the command against this session's capabilities, then
    /// dispatches it to the adapter. See §4.7: reject commands whose type
    /// is not supported by the backend with `Unsupported`.
    pub async fn send(&self, command: Command) -> Result<(), SessionError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SessionError::SessionClosed);
        }

        self.validate(&command)?;

        match command {
            Command::SendMessage { text } => self.session.send_text(text).await,
            Command::SendContent { blocks } => self.session.send_content(blocks).await,
            Command::Interrupt => self.session.interrupt().await,
            Command::Kill => {
                let result = self.session.kill().await;
                self.disposed.store(true, Ordering::SeqCst);
                self.mark_disconnected();
                result
            }
            Command::SetModel { model } => self.session.set_model(model).await,
            Command::SetPermissionMode { mode } => self.session.set_permission_mode(mode).await,
            Command::SetReasoningEffort { effort } => {
                self.session.set_reasoning_effort(effort).await
            }
            Command::SetConfigOption { id, value } => {
                self.session.set_config_option(id, value).await
            }
            Command::PermissionResponse {
                request_id,
                decision,
                extras,
            } => {
                self.session
                    .respond_permission(request_id, decision, extras)
                    .await
            }
        }
    }

    fn validate(&self, command: &Command) -> Result<(), SessionError> {
        let (supported, name) = match command {
            Command::SetModel { .. } => (self.capabilities.supports_model_change, "set_model"),
            Command::SetPermissionMode { .. } => (
                self.capabilities.supports_permission_mode_change,
                "set_permission_mode",
            ),
            Command::SetReasoningEffort { .. } => (
                self.capabilities.supports_reasoning_effort,
                "set_reasoning_effort",
            ),
            Command::SetConfigOption { .. } => {
                (self.capabilities.supports_config_options, "set_config_option")
            }
            _ => (true, ""),
        };

        if supported {
            Ok(())
        } else {
            Err(SessionError::Unsupported {
                command: name.to_string(),
            })
        }
    }

    /// Idempotent: a second call after the first is a no-op.
    pub async fn dispose(&self) -> Result<(), SessionError> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.mark_disconnected();
        self.session.kill().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackendKind, PermissionDecision};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct StubSession {
        killed: StdMutex<bool>,
    }

    #[async_trait(?Send)]
    impl Session for StubSession {
        fn events(&self) -> mpsc::UnboundedReceiver<Event> {
            mpsc::unbounded_channel().1
        }

        fn permission_requests(&self) -> mpsc::UnboundedReceiver<PermissionRequest> {
            mpsc::unbounded_channel().1
        }

        async fn send_text(&self, _text: String) -> Result<(), SessionError> {
            Ok(())
        }

        async fn send_content(
            &self,
            _blocks: Vec<crate::model::ContentBlock>,
        ) -> Result<(), SessionError> {
            Ok(())
        }

        async fn interrupt(&self) -> Result<(), SessionError> {
            Ok(())
        }

        async fn kill(&self) -> Result<(), SessionError> {
            *self.killed.lock().unwrap() = true;
            Ok(())
        }

        async fn set_model(&self, _model: String) -> Result<(), SessionError> {
            Ok(())
        }

        async fn set_permission_mode(&self, _mode: String) -> Result<(), SessionError> {
            Ok(())
        }

        async fn set_reasoning_effort(&self, _effort: String) -> Result<(), SessionError> {
            Ok(())
        }

        async fn set_config_option(
            &self,
            _id: String,
            _value: serde_json::Value,
        ) -> Result<(), SessionError> {
            Ok(())
        }

        fn resolved_session_id(&self) -> Option<String> {
            None
        }

        async fn respond_permission(
            &self,
            _request_id: String,
            _decision: PermissionDecision,
            _extras: Option<serde_json::Value>,
        ) -> Result<(), SessionError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn unsupported_command_is_rejected_before_reaching_the_session() {
        let session = Arc::new(StubSession {
            killed: StdMutex::new(false),
        });
        let capabilities = BackendCapabilities::for_backend(BackendKind::Acp);
        let transport = EventTransport::new(session, capabilities);

        let err = transport
            .send(Command::SetModel {
                model: "whatever".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn dispose_is_idempotent() {
        let session = Arc::new(StubSession {
            killed: StdMutex::new(false),
        });
        let capabilities = BackendCapabilities::for_backend(BackendKind::Claude);
        let transport = EventTransport::new(session.clone(), capabilities);

        transport.dispose().await.unwrap();
        transport.dispose().await.unwrap();
        assert!(*session.killed.lock().unwrap());
    }

    #[tokio::test]
    async fn send_after_dispose_fails_with_session_closed() {
        let session = Arc::new(StubSession {
            killed: StdMutex::new(false),
        });
        let capabilities = BackendCapabilities::for_backend(BackendKind::Claude);
        let transport = EventTransport::new(session, capabilities);

        transport.dispose().await.unwrap();
        let err = transport
            .send(Command::SendMessage {
                text: "hi".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::SessionClosed));
    }
}
