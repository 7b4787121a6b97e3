//! Permission Dispatcher (C6): correlates server-originated approval
//! requests with consumer responses, and centralizes the §4.6 decision
//! mapping as a single exhaustive function rather than duplicating the
//! table per adapter. This is a direct fix of the source pattern flagged in
//! §9 ("three independent decision vocabularies... centralize the mapping
//! table as a single function with exhaustive variants; do not duplicate per
//! adapter") — the teacher itself still pays this cost today, defining
//! `McpError` once in `mcp.rs` and again in `mcp/client.rs`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::info;

use crate::model::{BackendKind, LogLevel, PermissionDecision, PermissionExtensions};

/// The wire-shaped reply a Claude adapter must send back through
/// `callback.response`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum ClaudePermissionReply {
    Allow {
        #[serde(skip_serializing_if = "Option::is_none")]
        updated_input: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        updated_permissions: Option<Value>,
    },
    Deny {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        interrupt: Option<bool>,
    },
}

/// The wire-shaped `decision` field a Codex adapter must send.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(untagged)]
pub enum CodexDecisionWire {
    Simple(&'static str),
    ExecpolicyAmendment {
        #[serde(rename = "acceptWithExecpolicyAmendment")]
        accept_with_execpolicy_amendment: ExecpolicyAmendmentBody,
    },
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecpolicyAmendmentBody {
    pub execpolicy_amendment: Value,
}

/// The wire-shaped `session/request_permission` outcome an ACP adapter must
/// send.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AcpOutcomeWire {
    Selected { #[serde(rename = "optionId")] option_id: String },
    Cancelled,
}

/// Result of mapping a unified decision onto one backend's wire shape.
/// Carries an optional [`DowngradeNotice`] when the dispatcher silently
/// substituted a weaker decision than the one requested (§4.6 invariant 1).
pub struct MappedReply<T> {
    pub wire: T,
    pub downgrade: Option<DowngradeNotice>,
}

pub struct DowngradeNotice {
    pub level: LogLevel,
    pub message: String,
}

/// Maps a unified decision to the Claude `callback.response` payload shape.
pub fn map_claude_decision(
    decision: PermissionDecision,
    updated_input: Option<Value>,
) -> MappedReply<ClaudePermissionReply> {
    match decision {
        PermissionDecision::AllowOnce => MappedReply {
            wire: ClaudePermissionReply::Allow {
                updated_input,
                updated_permissions: None,
            },
            downgrade: None,
        },
        PermissionDecision::AllowForSession => MappedReply {
            wire: ClaudePermissionReply::Deny {
                message: Some("allow_for_session is not supported by this backend".to_string()),
                interrupt: None,
            },
            downgrade: Some(DowngradeNotice {
                level: LogLevel::Info,
                message: "allow_for_session has no Claude equivalent; denied".to_string(),
            }),
        },
        PermissionDecision::AllowAlways => MappedReply {
            wire: ClaudePermissionReply::Allow {
                updated_input,
                updated_permissions: Some(Value::Array(Vec::new())),
            },
            downgrade: None,
        },
        PermissionDecision::Deny => MappedReply {
            wire: ClaudePermissionReply::Deny {
                message: None,
                interrupt: None,
            },
            downgrade: None,
        },
        PermissionDecision::CancelTurn => MappedReply {
            wire: ClaudePermissionReply::Deny {
                message: None,
                interrupt: Some(true),
            },
            downgrade: None,
        },
    }
}

/// Maps a unified decision to the Codex `decision` field, downgrading
/// `allow_always` to `allow_once` when no execpolicy amendment was proposed
/// (§4.6 invariant 1, Scenario C).
pub fn map_codex_decision(
    decision: PermissionDecision,
    proposed_execpolicy_amendment: Option<&Value>,
) -> MappedReply<CodexDecisionWire> {
    match decision {
        PermissionDecision::AllowOnce => MappedReply {
            wire: CodexDecisionWire::Simple("accept"),
            downgrade: None,
        },
        PermissionDecision::AllowForSession => MappedReply {
            wire: CodexDecisionWire::Simple("acceptForSession"),
            downgrade: None,
        },
        PermissionDecision::AllowAlways => match proposed_execpolicy_amendment {
            Some(amendment) => MappedReply {
                wire: CodexDecisionWire::ExecpolicyAmendment {
                    accept_with_execpolicy_amendment: ExecpolicyAmendmentBody {
                        execpolicy_amendment: amendment.clone(),
                    },
                },
                downgrade: None,
            },
            None => MappedReply {
                wire: CodexDecisionWire::Simple("accept"),
                downgrade: Some(DowngradeNotice {
                    level: LogLevel::Info,
                    message: "allow_always requested with no proposed execpolicy amendment; downgraded to allow_once".to_string(),
                }),
            },
        },
        PermissionDecision::Deny => MappedReply {
            wire: CodexDecisionWire::Simple("decline"),
            downgrade: None,
        },
        PermissionDecision::CancelTurn => MappedReply {
            wire: CodexDecisionWire::Simple("cancel"),
            downgrade: None,
        },
    }
}

/// One ACP permission option as offered by the agent, preserved verbatim
/// under `acp.permissionOptions` on the normalized request.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AcpPermissionOption {
    #[serde(rename = "optionId")]
    pub option_id: String,
    pub kind: String,
}

/// Maps a unified decision to the ACP `optionId`/`outcome` response shape,
/// selecting among the agent-offered options (§4.6) and downgrading
/// `allow_always` when the agent never offered it.
pub fn map_acp_decision(
    decision: PermissionDecision,
    options: &[AcpPermissionOption],
) -> MappedReply<AcpOutcomeWire> {
    let find = |kind: &str| options.iter().find(|o| o.kind == kind).map(|o| o.option_id.clone());

    match decision {
        PermissionDecision::CancelTurn => MappedReply {
            wire: AcpOutcomeWire::Cancelled,
            downgrade: None,
        },
        PermissionDecision::Deny => {
            let option_id = find("reject_once")
                .or_else(|| find("reject_always"))
                .unwrap_or_default();
            MappedReply {
                wire: AcpOutcomeWire::Selected { option_id },
                downgrade: None,
            }
        }
        PermissionDecision::AllowOnce => {
            let option_id = find("allow_once").unwrap_or_default();
            MappedReply {
                wire: AcpOutcomeWire::Selected { option_id },
                downgrade: None,
            }
        }
        PermissionDecision::AllowForSession => match find("allow_always") {
            Some(option_id) => MappedReply {
                wire: AcpOutcomeWire::Selected { option_id },
                downgrade: None,
            },
            None => {
                let option_id = find("allow_once").unwrap_or_default();
                MappedReply {
                    wire: AcpOutcomeWire::Selected { option_id },
                    downgrade: Some(DowngradeNotice {
                        level: LogLevel::Info,
                        message: "allow_for_session requested but agent offered no allow_always option; downgraded to allow_once".to_string(),
                    }),
                }
            }
        },
        PermissionDecision::AllowAlways => match find("allow_always") {
            Some(option_id) => MappedReply {
                wire: AcpOutcomeWire::Selected { option_id },
                downgrade: None,
            },
            None => {
                let option_id = find("allow_once").unwrap_or_default();
                MappedReply {
                    wire: AcpOutcomeWire::Selected { option_id },
                    downgrade: Some(DowngradeNotice {
                        level: LogLevel::Info,
                        message: "allow_always requested but agent offered no allow_always option; downgraded to allow_once".to_string(),
                    }),
                }
            }
        },
    }
}

type PendingPermissions = Arc<Mutex<HashMap<String, oneshot::Sender<PermissionOutcome>>>>;

/// What a pending permission request resolves to once `respond` is called,
/// or once the dispatcher is closed by session termination.
#[derive(Debug, Clone)]
pub enum PermissionOutcome {
    Decided {
        decision: PermissionDecision,
        extras: Option<Value>,
    },
    SessionClosed,
}

/// Owns the table of request-id → response slot (§9: "a dedicated
/// `PermissionDispatcher` owning a table of request-id → response slot,
/// with a thin public `PermissionRequest` handle that calls back into the
/// dispatcher"), replacing the teacher's completer-held-inside-request-
/// object pattern.
#[derive(Clone, Default)]
pub struct PermissionDispatcher {
    pending: PendingPermissions,
}

impl PermissionDispatcher {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers a new pending request and returns the receiver the adapter
    /// should await for its resolution.
    pub async fn register(&self, request_id: impl Into<String>) -> oneshot::Receiver<PermissionOutcome> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.into(), tx);
        rx
    }

    /// Resolves a pending request. A second call for the same id, or a call
    /// for an id never registered (or already resolved), is a silent no-op
    /// per §8 property 6.
    pub async fn respond(
        &self,
        request_id: &str,
        decision: PermissionDecision,
        extras: Option<Value>,
    ) {
        let mut pending = self.pending.lock().await;
        if let Some(tx) = pending.remove(request_id) {
            let _ = tx.send(PermissionOutcome::Decided { decision, extras });
        } else {
            info!(request_id, "duplicate or unknown permission response ignored");
        }
    }

    /// Resolves every outstanding request as cancelled, per §4.6 invariant 3
    /// and the §8 Scenario F close semantics.
    pub async fn close_all(&self) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(PermissionOutcome::SessionClosed);
        }
    }
}

/// Extensions a Codex adapter attaches to a normalized permission request,
/// kept distinct from [`PermissionExtensions`]'s generic `Value` fields so
/// callers constructing one in adapter code get type checking.
pub fn codex_extensions(proposed_execpolicy_amendment: Option<Value>) -> PermissionExtensions {
    PermissionExtensions {
        codex_proposed_execpolicy_amendment: proposed_execpolicy_amendment,
        acp_permission_options: None,
        acp_blocked_path: None,
    }
}

pub fn acp_extensions(options: Value, blocked_path: Option<std::path::PathBuf>) -> PermissionExtensions {
    PermissionExtensions {
        codex_proposed_execpolicy_amendment: None,
        acp_permission_options: Some(options),
        acp_blocked_path: blocked_path,
    }
}

/// Backend tag carried alongside a dispatch so callers can assert which
/// mapping function was used without re-deriving it from the session.
pub fn backend_for(kind: BackendKind) -> BackendKind {
    kind
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn codex_allow_always_downgrades_without_amendment() {
        let mapped = map_codex_decision(PermissionDecision::AllowAlways, None);
        assert!(mapped.downgrade.is_some());
        match mapped.wire {
            CodexDecisionWire::Simple(s) => assert_eq!(s, "accept"),
            _ => panic!("expected simple accept"),
        }
    }

    #[test]
    fn codex_allow_always_uses_amendment_when_present() {
        let amendment = json!([{"pattern": "rm -rf /tmp/*"}]);
        let mapped = map_codex_decision(PermissionDecision::AllowAlways, Some(&amendment));
        assert!(mapped.downgrade.is_none());
        match mapped.wire {
            CodexDecisionWire::ExecpolicyAmendment {
                accept_with_execpolicy_amendment,
            } => assert_eq!(accept_with_execpolicy_amendment.execpolicy_amendment, amendment),
            _ => panic!("expected amendment variant"),
        }
    }

    #[test]
    fn acp_allow_always_downgrades_when_not_offered() {
        let options = vec![
            AcpPermissionOption { option_id: "o1".into(), kind: "allow_once".into() },
            AcpPermissionOption { option_id: "o2".into(), kind: "reject_once".into() },
        ];
        let mapped = map_acp_decision(PermissionDecision::AllowAlways, &options);
        assert!(mapped.downgrade.is_some());
        match mapped.wire {
            AcpOutcomeWire::Selected { option_id } => assert_eq!(option_id, "o1"),
            _ => panic!("expected selected"),
        }
    }

    #[tokio::test]
    async fn second_response_is_a_no_op() {
        let dispatcher = PermissionDispatcher::new();
        let rx = dispatcher.register("req-1").await;
        dispatcher.respond("req-1", PermissionDecision::AllowOnce, None).await;
        dispatcher.respond("req-1", PermissionDecision::Deny, None).await;

        let outcome = rx.await.unwrap();
        match outcome {
            PermissionOutcome::Decided { decision, .. } => {
                assert_eq!(decision, PermissionDecision::AllowOnce)
            }
            _ => panic!("expected decided"),
        }
    }

    #[tokio::test]
    async fn close_all_resolves_pending_as_session_closed() {
        let dispatcher = PermissionDispatcher::new();
        let rx = dispatcher.register("req-1").await;
        dispatcher.close_all().await;
        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, PermissionOutcome::SessionClosed));
    }
}
