//! Client port - the typed facade over the connected peer.
//!
//! Every method here is a reverse RPC: a JSON-RPC request (or, for
//! [`session_update`](ClientPort::session_update), a notification)
//! initiated by the broker against the client that opened the connection.
//! The adapter implementing this port lives in the infrastructure layer
//! and owns deadlines and wire encoding; callers see only typed results.

use async_trait::async_trait;
use broker_domain::{PermissionOutcome, SessionId, SessionUpdate};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for reverse-RPC operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when reverse-calling the client
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("connection to client closed")]
    ConnectionClosed,

    #[error("reverse call timed out after {0:?}")]
    Timeout(Duration),

    #[error("client does not support method: {0}")]
    Unsupported(String),

    #[error("client returned error (code {code}): {message}")]
    Rpc { code: i64, message: String },

    #[error("failed to decode client response: {0}")]
    Decode(String),
}

/// Typed facade over the remote client's methods.
///
/// Implementations perform type coercion only; semantic validation lives
/// in the caller.
#[async_trait]
pub trait ClientPort: Send + Sync {
    /// Read a text file from the client's workspace.
    async fn read_text_file(
        &self,
        session_id: &SessionId,
        path: &str,
        limit: Option<u64>,
        line: Option<u64>,
    ) -> ClientResult<String>;

    /// Write a text file in the client's workspace.
    async fn write_text_file(
        &self,
        session_id: &SessionId,
        path: &str,
        content: &str,
    ) -> ClientResult<()>;

    /// Start a terminal on the client and return its id.
    async fn create_terminal(
        &self,
        session_id: &SessionId,
        command: &str,
        args: &[String],
        cwd: Option<&str>,
    ) -> ClientResult<String>;

    /// Block until the terminal's command exits; returns the exit code.
    async fn wait_for_terminal_exit(
        &self,
        session_id: &SessionId,
        terminal_id: &str,
    ) -> ClientResult<i64>;

    /// Fetch everything the terminal has produced so far.
    async fn get_terminal_output(
        &self,
        session_id: &SessionId,
        terminal_id: &str,
    ) -> ClientResult<String>;

    /// Release the terminal's resources on the client.
    async fn release_terminal(&self, session_id: &SessionId, terminal_id: &str)
    -> ClientResult<()>;

    /// Forcibly terminate the terminal's command.
    async fn kill_terminal(&self, session_id: &SessionId, terminal_id: &str) -> ClientResult<()>;

    /// Ask the user (via the client) to approve a tool call.
    async fn request_permission(
        &self,
        session_id: &SessionId,
        tool_call_id: &str,
        description: &str,
    ) -> ClientResult<PermissionOutcome>;

    /// Ask the client which tools it exposes. Returns the raw catalog
    /// JSON; parsing and validation happen in the caller.
    async fn discover_tools(&self, session_id: &SessionId) -> ClientResult<serde_json::Value>;

    /// Forward an arbitrary method call to the client. Used by generic
    /// bridges for catalog tools the broker has no handler for. A peer
    /// that answers *method not found* surfaces as
    /// [`ClientError::Unsupported`].
    async fn call_extension(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> ClientResult<serde_json::Value>;

    /// Stream one incremental update to the client (notification).
    async fn session_update(
        &self,
        session_id: &SessionId,
        update: SessionUpdate,
    ) -> ClientResult<()>;
}
