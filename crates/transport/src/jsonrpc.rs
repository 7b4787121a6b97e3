//! JSON-RPC 2.0 client (C2) running over an already-connected duplex byte
//! stream (typically a child process's stdio pipes, owned by the
//! `supervisor` crate).
//!
//! The pending-request table and the writer/reader task split are lifted
//! directly from the teacher's `codex::mcp::jsonrpc::JsonRpcTransport`:
//! requests register a `oneshot::Sender` keyed by a `u64` id before the
//! request line is written, and the reader task resolves it when a response
//! with a matching id arrives. Notifications and server-originated requests
//! (JSON-RPC requests sent the other way, e.g. permission callbacks) are
//! fanned out to every registered listener rather than delivered to a single
//! consumer, generalizing the teacher's `NotificationHook` sink list from a
//! single backend-specific event type to the unified transport-level
//! envelope.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{RequestId, TransportError};
use crate::framer::{decode_line, BoundedLine, LineReader, LineWriter};

/// A JSON-RPC notification received from the peer (no `id`).
#[derive(Debug, Clone)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

/// A JSON-RPC request the peer sent to us (has an `id`; we owe it a
/// response). Used for server-originated calls such as permission callbacks.
#[derive(Debug, Clone)]
pub struct ServerRequest {
    pub id: RequestId,
    pub method: String,
    pub params: Value,
}

type PendingRequests = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<Value, TransportError>>>>>;
type ListenerRegistry<T> = Arc<Mutex<Vec<mpsc::UnboundedSender<T>>>>;

/// A connected JSON-RPC 2.0 client. Cloning shares the same underlying
/// writer task and pending-request table.
#[derive(Clone)]
pub struct JsonRpcClient {
    writer: mpsc::UnboundedSender<Value>,
    pending: PendingRequests,
    notification_listeners: ListenerRegistry<Notification>,
    server_request_listeners: ListenerRegistry<ServerRequest>,
    next_id: Arc<AtomicU64>,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

/// Join handles for the background reader/writer tasks, kept separate from
/// [`JsonRpcClient`] so the client itself stays `Clone`.
pub struct JsonRpcTasks {
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

impl JsonRpcClient {
    /// Spawns the reader and writer tasks over the given duplex halves and
    /// returns a client handle plus the task handles (owned by the caller,
    /// typically dropped into a `Supervisor` so they abort alongside the
    /// child process).
    pub fn spawn<R, W>(reader: R, writer: W, max_line_bytes: usize) -> (Self, JsonRpcTasks)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel::<Value>();
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let notification_listeners: ListenerRegistry<Notification> = Arc::new(Mutex::new(Vec::new()));
        let server_request_listeners: ListenerRegistry<ServerRequest> = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let writer_task = tokio::spawn(writer_task(writer, writer_rx));
        let reader_task = tokio::spawn(reader_task(
            reader,
            max_line_bytes,
            pending.clone(),
            notification_listeners.clone(),
            server_request_listeners.clone(),
            closed.clone(),
        ));

        let client = Self {
            writer: writer_tx,
            pending,
            notification_listeners,
            server_request_listeners,
            next_id: Arc::new(AtomicU64::new(1)),
            closed,
        };

        (
            client,
            JsonRpcTasks {
                reader: reader_task,
                writer: writer_task,
            },
        )
    }

    fn allocate_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Sends a request and awaits the matching response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let envelope = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        if self.writer.send(envelope).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(TransportError::ConnectionClosed);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectionClosed),
        }
    }

    /// Sends a request with a caller-supplied timeout.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: std::time::Duration,
    ) -> Result<Value, TransportError> {
        match tokio::time::timeout(timeout, self.request(method, params)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout { id: 0 }),
        }
    }

    /// Sends a notification (no response expected).
    pub fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
        let envelope = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.writer
            .send(envelope)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Replies to a server-originated request (e.g. a permission callback)
    /// with a success result.
    pub fn respond(&self, id: RequestId, result: Value) -> Result<(), TransportError> {
        let envelope = json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        });
        self.writer
            .send(envelope)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Replies to a server-originated request with an error.
    pub fn respond_error(
        &self,
        id: RequestId,
        code: i64,
        message: &str,
        data: Option<Value>,
    ) -> Result<(), TransportError> {
        let mut error = json!({ "code": code, "message": message });
        if let Some(data) = data {
            error["data"] = data;
        }
        let envelope = json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": error,
        });
        self.writer
            .send(envelope)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Registers a new notification listener. The returned receiver gets
    /// every notification sent after this call.
    pub async fn listen_notifications(&self) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.notification_listeners.lock().await.push(tx);
        rx
    }

    /// Registers a new server-request listener.
    pub async fn listen_server_requests(&self) -> mpsc::UnboundedReceiver<ServerRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.server_request_listeners.lock().await.push(tx);
        rx
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn writer_task<W>(writer: W, mut rx: mpsc::UnboundedReceiver<Value>)
where
    W: AsyncWrite + Unpin,
{
    let mut line_writer = LineWriter::new(writer);
    while let Some(value) = rx.recv().await {
        if let Err(err) = line_writer.write_value(&value).await {
            warn!(error = %err, "transport writer failed, stopping writer task");
            break;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn reader_task<R>(
    reader: R,
    max_line_bytes: usize,
    pending: PendingRequests,
    notification_listeners: ListenerRegistry<Notification>,
    server_request_listeners: ListenerRegistry<ServerRequest>,
    closed: Arc<std::sync::atomic::AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    let mut line_reader = LineReader::new(reader, max_line_bytes);

    while let Some(line) = line_reader.next_line().await {
        match line {
            BoundedLine::Line { bytes, .. } => {
                let Some(decoded) = decode_line(&bytes) else {
                    continue;
                };
                match decoded {
                    Ok(value) => {
                        dispatch(
                            value,
                            &pending,
                            &notification_listeners,
                            &server_request_listeners,
                        )
                        .await
                    }
                    Err(err) => debug!(error = %err, "failed to decode JSON-RPC line, skipping"),
                }
            }
            BoundedLine::LineTooLong {
                line_number,
                observed_bytes,
                max_line_bytes,
            } => {
                warn!(
                    line_number,
                    observed_bytes, max_line_bytes, "discarded oversized JSON-RPC line"
                );
            }
            BoundedLine::Io { line_number } => {
                warn!(line_number, "I/O error reading JSON-RPC stream, closing");
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    let mut pending = pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(TransportError::ConnectionClosed));
    }
}

async fn dispatch(
    value: Value,
    pending: &PendingRequests,
    notification_listeners: &ListenerRegistry<Notification>,
    server_request_listeners: &ListenerRegistry<ServerRequest>,
) {
    let Some(obj) = value.as_object() else {
        debug!("ignoring non-object JSON-RPC message");
        return;
    };

    if obj.contains_key("result") || obj.contains_key("error") {
        let Some(id) = parse_id(obj.get("id")) else {
            debug!("ignoring response with non-numeric id");
            return;
        };
        let mut pending = pending.lock().await;
        let Some(tx) = pending.remove(&id) else {
            debug!(id, "received response for unknown request id");
            return;
        };
        if let Some(error) = obj.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            let data = error.get("data").cloned();
            let _ = tx.send(Err(TransportError::Remote { id, code, message, data }));
        } else {
            let result = obj.get("result").cloned().unwrap_or(Value::Null);
            let _ = tx.send(Ok(result));
        }
        return;
    }

    let Some(method) = obj.get("method").and_then(Value::as_str) else {
        debug!("ignoring JSON-RPC message with no method");
        return;
    };
    let params = obj.get("params").cloned().unwrap_or(Value::Null);

    match obj.get("id") {
        Some(id_value) => {
            let Some(id) = parse_id(Some(id_value)) else {
                debug!(method, "ignoring server request with non-numeric id");
                return;
            };
            let server_request = ServerRequest {
                id,
                method: method.to_string(),
                params,
            };
            let mut listeners = server_request_listeners.lock().await;
            listeners.retain(|tx| tx.send(server_request.clone()).is_ok());
        }
        None => {
            let notification = Notification {
                method: method.to_string(),
                params,
            };
            let mut listeners = notification_listeners.lock().await;
            listeners.retain(|tx| tx.send(notification.clone()).is_ok());
        }
    }
}

fn parse_id(value: Option<&Value>) -> Option<RequestId> {
    match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn request_resolves_on_matching_response() {
        let (client_io, mut peer_io) = duplex(4096);
        let (read_half, write_half) = tokio::io::split(client_io);
        let (client, _tasks) = JsonRpcClient::spawn(read_half, write_half, 64 * 1024);

        let peer = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let mut buf = vec![0u8; 4096];
            let n = peer_io.read(&mut buf).await.unwrap();
            let sent: Value = serde_json::from_slice(&buf[..n]).unwrap();
            let id = sent["id"].as_u64().unwrap();
            let response = format!("{{\"jsonrpc\":\"2.0\",\"id\":{id},\"result\":{{\"ok\":true}}}}\n");
            peer_io.write_all(response.as_bytes()).await.unwrap();
        });

        let result = client.request("ping", json!({})).await.unwrap();
        assert_eq!(result, json!({"ok": true}));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn closed_connection_drains_pending_with_error() {
        let (client_io, peer_io) = duplex(4096);
        let (read_half, write_half) = tokio::io::split(client_io);
        let (client, _tasks) = JsonRpcClient::spawn(read_half, write_half, 64 * 1024);

        drop(peer_io);

        let err = client.request("ping", json!({})).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }
}
