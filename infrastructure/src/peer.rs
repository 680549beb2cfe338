//! The typed Peer Proxy: `ClientPort` over a [`Connection`].
//!
//! Wire contracts follow the protocol's client-side method table; field
//! names go out exactly as specified. Deadlines are applied here (file
//! operations are quick, terminal waits legitimately are not) and a
//! timeout cancels the linked remote operation via the connection's
//! best-effort `cancel` notification.

use crate::rpc::connection::{Connection, ConnectionError};
use crate::rpc::protocol::METHOD_NOT_FOUND;
use async_trait::async_trait;
use broker_application::config::TimeoutConfig;
use broker_application::ports::client_port::{ClientError, ClientPort, ClientResult};
use broker_domain::{PermissionOutcome, SessionId, SessionUpdate};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

pub struct PeerClient {
    conn: Arc<Connection>,
    timeouts: TimeoutConfig,
}

impl PeerClient {
    pub fn new(conn: Arc<Connection>, timeouts: TimeoutConfig) -> Self {
        Self { conn, timeouts }
    }

    fn file_deadline(&self) -> Duration {
        Duration::from_secs(self.timeouts.file_op_secs)
    }

    fn terminal_deadline(&self) -> Duration {
        Duration::from_secs(self.timeouts.terminal_secs)
    }

    fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.timeouts.request_secs)
    }

    async fn call(
        &self,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> ClientResult<Value> {
        self.conn
            .call(method, Some(params), deadline)
            .await
            .map_err(|e| map_error(method, e))
    }
}

fn map_error(method: &str, e: ConnectionError) -> ClientError {
    match e {
        ConnectionError::Closed => ClientError::ConnectionClosed,
        ConnectionError::Timeout(d) => ClientError::Timeout(d),
        ConnectionError::Rpc {
            code: METHOD_NOT_FOUND,
            ..
        } => ClientError::Unsupported(method.to_string()),
        ConnectionError::Rpc { code, message } => ClientError::Rpc { code, message },
    }
}

fn field_str(result: &Value, field: &str) -> ClientResult<String> {
    result
        .get(field)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| ClientError::Decode(format!("missing string field '{field}'")))
}

#[async_trait]
impl ClientPort for PeerClient {
    async fn read_text_file(
        &self,
        session_id: &SessionId,
        path: &str,
        limit: Option<u64>,
        line: Option<u64>,
    ) -> ClientResult<String> {
        let mut params = json!({
            "session_id": session_id,
            "path": path,
        });
        if let Some(limit) = limit {
            params["limit"] = json!(limit);
        }
        if let Some(line) = line {
            params["line"] = json!(line);
        }
        let result = self
            .call("read_text_file", params, self.file_deadline())
            .await?;
        field_str(&result, "content")
    }

    async fn write_text_file(
        &self,
        session_id: &SessionId,
        path: &str,
        content: &str,
    ) -> ClientResult<()> {
        self.call(
            "write_text_file",
            json!({
                "session_id": session_id,
                "path": path,
                "content": content,
            }),
            self.file_deadline(),
        )
        .await?;
        Ok(())
    }

    async fn create_terminal(
        &self,
        session_id: &SessionId,
        command: &str,
        args: &[String],
        cwd: Option<&str>,
    ) -> ClientResult<String> {
        let mut params = json!({
            "session_id": session_id,
            "command": command,
            "args": args,
        });
        if let Some(cwd) = cwd {
            params["cwd"] = json!(cwd);
        }
        let result = self
            .call("create_terminal", params, self.request_deadline())
            .await?;
        field_str(&result, "terminal_id")
    }

    async fn wait_for_terminal_exit(
        &self,
        session_id: &SessionId,
        terminal_id: &str,
    ) -> ClientResult<i64> {
        let result = self
            .call(
                "wait_for_terminal_exit",
                json!({
                    "session_id": session_id,
                    "terminal_id": terminal_id,
                }),
                self.terminal_deadline(),
            )
            .await?;
        result
            .get("exit_code")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ClientError::Decode("missing integer field 'exit_code'".into()))
    }

    async fn get_terminal_output(
        &self,
        session_id: &SessionId,
        terminal_id: &str,
    ) -> ClientResult<String> {
        let result = self
            .call(
                "get_terminal_output",
                json!({
                    "session_id": session_id,
                    "terminal_id": terminal_id,
                }),
                self.request_deadline(),
            )
            .await?;
        field_str(&result, "output")
    }

    async fn release_terminal(
        &self,
        session_id: &SessionId,
        terminal_id: &str,
    ) -> ClientResult<()> {
        self.call(
            "release_terminal",
            json!({
                "session_id": session_id,
                "terminal_id": terminal_id,
            }),
            self.request_deadline(),
        )
        .await?;
        Ok(())
    }

    async fn kill_terminal(&self, session_id: &SessionId, terminal_id: &str) -> ClientResult<()> {
        self.call(
            "kill_terminal",
            json!({
                "session_id": session_id,
                "terminal_id": terminal_id,
            }),
            self.request_deadline(),
        )
        .await?;
        Ok(())
    }

    async fn request_permission(
        &self,
        session_id: &SessionId,
        tool_call_id: &str,
        description: &str,
    ) -> ClientResult<PermissionOutcome> {
        let result = self
            .call(
                "request_permission",
                json!({
                    "session_id": session_id,
                    "tool_call_id": tool_call_id,
                    "description": description,
                }),
                self.request_deadline(),
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| ClientError::Decode(format!("bad permission outcome: {e}")))
    }

    async fn discover_tools(&self, session_id: &SessionId) -> ClientResult<Value> {
        self.call(
            "discover_tools",
            json!({"session_id": session_id}),
            self.request_deadline(),
        )
        .await
    }

    async fn call_extension(&self, method: &str, params: Value) -> ClientResult<Value> {
        self.call(method, params, self.request_deadline()).await
    }

    async fn session_update(
        &self,
        session_id: &SessionId,
        update: SessionUpdate,
    ) -> ClientResult<()> {
        self.conn
            .notify(
                "session_update",
                Some(json!({
                    "session_id": session_id,
                    "update": update,
                })),
            )
            .await
            .map_err(|e| map_error("session_update", e))
    }
}
