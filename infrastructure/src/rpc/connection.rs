//! The bidirectional JSON-RPC connection.
//!
//! A single reader task owns the frame source and demultiplexes inbound
//! traffic: responses complete the matching pending outbound call, inbound
//! requests are dispatched concurrently to the registered handler, and
//! notifications are dispatched inline. Outbound operations may be issued
//! by any number of tasks; they serialize only at the writer lock, which
//! keeps per-session update ordering intact.

use crate::rpc::protocol::{
    self, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JsonRpcResponseOut, MessageKind,
    RpcErrorObject, classify_message,
};
use crate::rpc::transport::{FrameSink, FrameSource};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Errors surfaced to outbound callers.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("peer returned error (code {code}): {message}")]
    Rpc { code: i64, message: String },
}

/// Error a request handler may return; mapped onto the wire error object.
#[derive(Debug, Clone)]
pub struct RpcHandlerError {
    pub code: i64,
    pub message: String,
}

impl RpcHandlerError {
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: protocol::METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
        }
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self {
            code: protocol::INVALID_PARAMS,
            message: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            code: protocol::INTERNAL_ERROR,
            message: detail.into(),
        }
    }

    pub fn session_not_found(session_id: &str) -> Self {
        Self {
            code: protocol::SESSION_NOT_FOUND,
            message: format!("Unknown session: {session_id}"),
        }
    }
}

/// Local side of the connection: answers inbound requests and
/// notifications, and is told when the transport goes away.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcHandlerError>;

    async fn handle_notification(&self, method: &str, params: Value);

    /// Shutdown hook; runs once when the inbound loop terminates.
    async fn on_close(&self);
}

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<Result<Value, RpcErrorObject>>>>;

/// A bidirectional JSON-RPC 2.0 connection over one transport.
pub struct Connection {
    writer: Mutex<Box<dyn FrameSink>>,
    pending: PendingMap,
    next_id: AtomicU64,
    handler: OnceLock<Arc<dyn InboundHandler>>,
    closed: CancellationToken,
}

impl Connection {
    pub fn new(sink: Box<dyn FrameSink>) -> Arc<Self> {
        Arc::new(Self {
            writer: Mutex::new(sink),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            handler: OnceLock::new(),
            closed: CancellationToken::new(),
        })
    }

    /// Install the inbound handler. Must be called before [`run`](Self::run).
    pub fn set_handler(&self, handler: Arc<dyn InboundHandler>) {
        if self.handler.set(handler).is_err() {
            warn!("inbound handler already set, ignoring");
        }
    }

    /// A token cancelled when the inbound loop terminates.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Run the inbound loop until the peer closes or the transport fails,
    /// then tear down: fail every pending call, signal closure, and run
    /// the handler's shutdown hook.
    pub async fn run(self: Arc<Self>, mut source: Box<dyn FrameSource>) {
        loop {
            let frame = match source.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("peer closed the transport");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "transport read failed");
                    break;
                }
            };

            let value: Value = match serde_json::from_str(&frame) {
                Ok(v) => v,
                Err(e) => {
                    // A malformed frame carries no recoverable id; answer
                    // with a null-id parse error per JSON-RPC and move on.
                    warn!(error = %e, "malformed frame");
                    self.respond(JsonRpcResponseOut::err(
                        Value::Null,
                        protocol::PARSE_ERROR,
                        "Parse error",
                    ))
                    .await;
                    continue;
                }
            };

            match classify_message(&value) {
                MessageKind::Response => self.deliver_response(value).await,

                MessageKind::IncomingRequest { id } => {
                    let method = value
                        .get("method")
                        .and_then(|m| m.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let params = value
                        .get("params")
                        .cloned()
                        .unwrap_or(Value::Object(Default::default()));

                    let Some(handler) = self.handler.get().cloned() else {
                        warn!(method = %method, "request before handler installed");
                        self.respond(JsonRpcResponseOut::err(
                            id,
                            protocol::INTERNAL_ERROR,
                            "No handler installed",
                        ))
                        .await;
                        continue;
                    };

                    // Handlers run concurrently with each other and with
                    // outbound calls; a slow prompt must not block the
                    // reader from delivering reverse-RPC responses.
                    let conn = Arc::clone(&self);
                    tokio::spawn(async move {
                        let response = match handler.handle_request(&method, params).await {
                            Ok(result) => JsonRpcResponseOut::ok(id, result),
                            Err(e) => JsonRpcResponseOut::err(id, e.code, e.message),
                        };
                        conn.respond(response).await;
                    });
                }

                MessageKind::Notification => {
                    let method = value
                        .get("method")
                        .and_then(|m| m.as_str())
                        .unwrap_or_default()
                        .to_string();
                    if method.is_empty() {
                        debug!("dropping message with neither id nor method");
                        continue;
                    }
                    let params = value
                        .get("params")
                        .cloned()
                        .unwrap_or(Value::Object(Default::default()));
                    if let Some(handler) = self.handler.get() {
                        handler.handle_notification(&method, params).await;
                    }
                }
            }
        }

        // Teardown: every pending outbound call fails with Closed (their
        // senders drop here), then the shutdown hook runs.
        self.pending.lock().await.clear();
        self.closed.cancel();
        if let Some(handler) = self.handler.get() {
            handler.on_close().await;
        }
    }

    async fn deliver_response(&self, value: Value) {
        let Some(id) = value.get("id").and_then(|v| v.as_u64()) else {
            warn!("response with non-integer id, dropping");
            return;
        };
        let response: JsonRpcResponse = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                warn!(id, error = %e, "unparseable response");
                return;
            }
        };

        let sender = self.pending.lock().await.remove(&id);
        match sender {
            Some(tx) => {
                let outcome = match response.error {
                    Some(err) => Err(err),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                };
                let _ = tx.send(outcome);
            }
            None => {
                // Late responses to cancelled or unknown calls are dropped.
                warn!(id, "response with no pending request, dropping");
            }
        }
    }

    /// Outbound request; awaits the correlated response.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = JsonRpcRequest::new(id, method, params);
        if let Err(e) = self.send_json(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        tokio::select! {
            outcome = rx => match outcome {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(err)) => Err(ConnectionError::Rpc {
                    code: err.code,
                    message: err.message,
                }),
                // Sender dropped during teardown.
                Err(_) => Err(ConnectionError::Closed),
            },
            _ = tokio::time::sleep(timeout) => {
                self.pending.lock().await.remove(&id);
                // Best-effort: tell the peer to abandon the linked work.
                let _ = self
                    .notify("cancel", Some(serde_json::json!({"id": id})))
                    .await;
                Err(ConnectionError::Timeout(timeout))
            }
        }
    }

    /// Outbound notification; no response expected.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let notification = JsonRpcNotification::new(method, params);
        self.send_json(&notification).await
    }

    /// Write a response frame for an inbound request.
    pub async fn respond(&self, response: JsonRpcResponseOut) {
        if let Err(e) = self.send_json(&response).await {
            debug!(error = %e, "failed to write response");
        }
    }

    async fn send_json<T: serde::Serialize>(&self, payload: &T) -> Result<(), ConnectionError> {
        let frame = serde_json::to_string(payload).map_err(|e| ConnectionError::Rpc {
            code: protocol::INTERNAL_ERROR,
            message: format!("serialization failed: {e}"),
        })?;
        let mut writer = self.writer.lock().await;
        writer
            .send_frame(&frame)
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    /// Number of requests awaiting a response. Exposed for tests and
    /// teardown assertions.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::transport::{StreamSink, StreamSource};
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

    /// A scripted peer driving the far end of a duplex pipe.
    struct Peer {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Peer {
        async fn recv(&mut self) -> Option<Value> {
            let mut line = String::new();
            loop {
                line.clear();
                let n = self.reader.read_line(&mut line).await.ok()?;
                if n == 0 {
                    return None;
                }
                if !line.trim().is_empty() {
                    return serde_json::from_str(line.trim()).ok();
                }
            }
        }

        async fn send(&mut self, value: Value) {
            let mut frame = value.to_string();
            frame.push('\n');
            self.writer.write_all(frame.as_bytes()).await.unwrap();
        }

        async fn close(mut self) {
            self.writer.shutdown().await.unwrap();
        }
    }

    /// Handler that records notifications and echoes request params.
    struct EchoHandler {
        notifications: StdMutex<Vec<(String, Value)>>,
        closed: StdMutex<bool>,
    }

    impl EchoHandler {
        fn new() -> Self {
            Self {
                notifications: StdMutex::new(Vec::new()),
                closed: StdMutex::new(false),
            }
        }
    }

    #[async_trait]
    impl InboundHandler for EchoHandler {
        async fn handle_request(
            &self,
            method: &str,
            params: Value,
        ) -> Result<Value, RpcHandlerError> {
            match method {
                "echo" => Ok(json!({"echo": params})),
                other => Err(RpcHandlerError::method_not_found(other)),
            }
        }

        async fn handle_notification(&self, method: &str, params: Value) {
            self.notifications
                .lock()
                .unwrap()
                .push((method.to_string(), params));
        }

        async fn on_close(&self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    fn wire() -> (Arc<Connection>, Arc<EchoHandler>, Peer, tokio::task::JoinHandle<()>) {
        let (near, far) = tokio::io::duplex(64 * 1024);
        let (near_read, near_write) = tokio::io::split(near);
        let (far_read, far_write) = tokio::io::split(far);

        let conn = Connection::new(Box::new(StreamSink::new(near_write)));
        let handler = Arc::new(EchoHandler::new());
        conn.set_handler(handler.clone());

        let run_conn = conn.clone();
        let run = tokio::spawn(async move {
            run_conn
                .run(Box::new(StreamSource::new(BufReader::new(near_read))))
                .await;
        });

        let peer = Peer {
            reader: BufReader::new(far_read),
            writer: far_write,
        };
        (conn, handler, peer, run)
    }

    #[tokio::test]
    async fn call_receives_matching_response() {
        let (conn, _handler, mut peer, _run) = wire();

        let call = tokio::spawn({
            let conn = conn.clone();
            async move {
                conn.call("read_text_file", Some(json!({"path": "/a"})), Duration::from_secs(5))
                    .await
            }
        });

        let request = peer.recv().await.unwrap();
        assert_eq!(request["method"], "read_text_file");
        let id = request["id"].as_u64().unwrap();
        peer.send(json!({"jsonrpc": "2.0", "id": id, "result": {"content": "hi"}}))
            .await;

        let result = call.await.unwrap().unwrap();
        assert_eq!(result["content"], "hi");
        assert_eq!(conn.pending_count().await, 0);
    }

    #[tokio::test]
    async fn outbound_ids_are_distinct_and_monotone() {
        let (conn, _handler, mut peer, _run) = wire();

        for _ in 0..3 {
            let conn = conn.clone();
            tokio::spawn(async move {
                let _ = conn.call("ping", None, Duration::from_secs(5)).await;
            });
        }

        let mut ids = Vec::new();
        for _ in 0..3 {
            let request = peer.recv().await.unwrap();
            ids.push(request["id"].as_u64().unwrap());
        }
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 3);
    }

    #[tokio::test]
    async fn error_response_maps_to_rpc_error() {
        let (conn, _handler, mut peer, _run) = wire();

        let call = tokio::spawn({
            let conn = conn.clone();
            async move { conn.call("bad", None, Duration::from_secs(5)).await }
        });

        let request = peer.recv().await.unwrap();
        let id = request["id"].as_u64().unwrap();
        peer.send(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": "Method not found: bad"}
        }))
        .await;

        let err = call.await.unwrap().unwrap_err();
        match err {
            ConnectionError::Rpc { code, .. } => assert_eq!(code, -32601),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn inbound_request_is_answered() {
        let (_conn, _handler, mut peer, _run) = wire();

        peer.send(json!({
            "jsonrpc": "2.0",
            "id": "r1",
            "method": "echo",
            "params": {"x": 1}
        }))
        .await;

        let response = peer.recv().await.unwrap();
        assert_eq!(response["id"], "r1");
        assert_eq!(response["result"]["echo"]["x"], 1);
    }

    #[tokio::test]
    async fn unknown_method_gets_method_not_found() {
        let (_conn, _handler, mut peer, _run) = wire();

        peer.send(json!({"jsonrpc": "2.0", "id": 5, "method": "fork_session"}))
            .await;

        let response = peer.recv().await.unwrap();
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn malformed_frame_gets_parse_error() {
        let (_conn, _handler, mut peer, _run) = wire();

        peer.writer.write_all(b"{not json}\n").await.unwrap();

        let response = peer.recv().await.unwrap();
        assert_eq!(response["error"]["code"], -32700);
        assert_eq!(response["id"], Value::Null);
    }

    #[tokio::test]
    async fn notifications_are_dispatched_without_response() {
        let (_conn, handler, mut peer, _run) = wire();

        peer.send(json!({
            "jsonrpc": "2.0",
            "method": "cancel",
            "params": {"session_id": "session-1"}
        }))
        .await;
        // Follow with a request so we can observe ordering.
        peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "echo", "params": {}}))
            .await;

        let response = peer.recv().await.unwrap();
        assert_eq!(response["id"], 1);

        let notifications = handler.notifications.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].0, "cancel");
    }

    #[tokio::test]
    async fn unsolicited_response_is_dropped() {
        let (conn, _handler, mut peer, _run) = wire();

        peer.send(json!({"jsonrpc": "2.0", "id": 999, "result": {}}))
            .await;
        // The connection keeps working afterwards.
        peer.send(json!({"jsonrpc": "2.0", "id": 2, "method": "echo", "params": {}}))
            .await;
        let response = peer.recv().await.unwrap();
        assert_eq!(response["id"], 2);
        assert_eq!(conn.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_sends_cancel_and_clears_pending() {
        let (conn, _handler, mut peer, _run) = wire();

        let call = tokio::spawn({
            let conn = conn.clone();
            async move {
                conn.call("slow", None, Duration::from_millis(100)).await
            }
        });

        let request = peer.recv().await.unwrap();
        let id = request["id"].as_u64().unwrap();

        // No response arrives; the call times out and a best-effort
        // cancel notification goes out carrying the request id.
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, ConnectionError::Timeout(_)));

        let cancel = peer.recv().await.unwrap();
        assert_eq!(cancel["method"], "cancel");
        assert_eq!(cancel["params"]["id"], id);
        assert_eq!(conn.pending_count().await, 0);

        // A late response for the abandoned id is discarded silently.
        peer.send(json!({"jsonrpc": "2.0", "id": id, "result": {}}))
            .await;
        peer.send(json!({"jsonrpc": "2.0", "id": 77, "method": "echo", "params": {}}))
            .await;
        let response = peer.recv().await.unwrap();
        assert_eq!(response["id"], 77);
    }

    #[tokio::test]
    async fn close_fails_pending_and_runs_hook() {
        let (conn, handler, mut peer, run) = wire();

        let call = tokio::spawn({
            let conn = conn.clone();
            async move { conn.call("stuck", None, Duration::from_secs(30)).await }
        });

        // Wait for the request to hit the wire, then close the transport.
        let _request = peer.recv().await.unwrap();
        peer.close().await;
        run.await.unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, ConnectionError::Closed));
        assert_eq!(conn.pending_count().await, 0);
        assert!(conn.is_closed());
        assert!(*handler.closed.lock().unwrap());

        // New calls fail fast once closed.
        let err = conn.call("late", None, Duration::from_secs(1)).await;
        assert!(matches!(err, Err(ConnectionError::Closed)));
    }
}
