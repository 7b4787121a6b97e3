//! The shared Codex app-server process (§4.4.2, and the glossary's "Codex
//! shares a single app-server process across sessions"). Grounded on the
//! teacher's `codex::mcp::app::AppRuntimePool`, which reuses a running
//! named runtime rather than spawning a new one on every `start()` call —
//! here generalized from a pool of distinct named runtime *configurations*
//! to a pool of one process per resolved binary, since every thread this
//! adapter opens against the same `codex` binary shares one app-server.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use transport::JsonRpcClient;

use crate::error::CodexAdapterError;
use crate::protocol::{ClientInfo, InitializeParams, METHOD_CONFIG_READ, METHOD_CONFIG_REQUIREMENTS_READ, METHOD_INITIALIZE, METHOD_INITIALIZED};

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Identifies which binary (and env overlay) a process should be shared
/// across. Two sessions with an identical spec reuse the same process.
#[derive(Debug, Clone, Default)]
pub struct CodexProcessSpec {
    pub binary_override: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl CodexProcessSpec {
    fn pool_key(&self) -> String {
        let binary = self
            .binary_override
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "codex".to_string());
        let env = self
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        format!("{binary}|{env}")
    }
}

/// One live `codex app-server` process, past its `initialize`/`initialized`
/// handshake and ready to accept `thread/start` calls from any number of
/// sessions.
pub struct CodexAppServerProcess {
    client: JsonRpcClient,
    supervisor: Mutex<Option<supervisor::Supervisor>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CodexAppServerProcess {
    pub fn client(&self) -> &JsonRpcClient {
        &self.client
    }

    /// Best-effort graceful-then-forceful shutdown, matching
    /// `JsonRpcTransport::shutdown`'s `shutdown` + `exit` pair followed by a
    /// timed kill on the teacher side.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        let mut supervisor = self.supervisor.lock().await;
        if let Some(mut supervisor) = supervisor.take() {
            let _ = supervisor.terminate().await;
        }
    }

    async fn spawn(spec: &CodexProcessSpec) -> Result<Arc<Self>, CodexAdapterError> {
        let mut builder = supervisor::SupervisorBuilder::new()
            .binary_env_var("CODEX_PATH")
            .default_binary_name("codex")
            .arg("app-server");
        if let Some(binary) = &spec.binary_override {
            builder = builder.binary_override(binary.clone());
        }
        for (k, v) in &spec.env {
            builder = builder.env(k, v);
        }

        let (supervisor, stdin, stdout) = builder.spawn().await?;
        let (client, tasks) = JsonRpcClient::spawn(stdout, stdin, transport::DEFAULT_MAX_LINE_BYTES);

        client
            .request(
                METHOD_INITIALIZE,
                serde_json::to_value(InitializeParams {
                    client_info: ClientInfo {
                        name: "agent-session-core".to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                    protocol_version: PROTOCOL_VERSION.to_string(),
                })
                .expect("InitializeParams always serializes"),
            )
            .await?;
        client.notify(METHOD_INITIALIZED, json!({}))?;

        // Best-effort: a server that doesn't implement these simply errors,
        // which we don't surface — neither call affects session behavior,
        // they only let the host inspect the agent's declared policy.
        let _ = client.request(METHOD_CONFIG_READ, json!({})).await;
        let _ = client.request(METHOD_CONFIG_REQUIREMENTS_READ, json!({})).await;

        Ok(Arc::new(Self {
            client,
            supervisor: Mutex::new(Some(supervisor)),
            tasks: Mutex::new(vec![tasks.reader, tasks.writer]),
        }))
    }
}

/// Pool of shared app-server processes keyed by resolved binary + env.
#[derive(Default)]
pub struct CodexAppServerPool {
    processes: Mutex<HashMap<String, Arc<CodexAppServerProcess>>>,
}

impl CodexAppServerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing process for this spec if one is still alive,
    /// otherwise spawns and registers a new one.
    pub async fn acquire(&self, spec: &CodexProcessSpec) -> Result<Arc<CodexAppServerProcess>, CodexAdapterError> {
        let key = spec.pool_key();
        let mut processes = self.processes.lock().await;
        if let Some(existing) = processes.get(&key) {
            if !existing.client.is_closed() {
                return Ok(existing.clone());
            }
        }
        let process = CodexAppServerProcess::spawn(spec).await?;
        processes.insert(key, process.clone());
        Ok(process)
    }
}
