//! Shared test doubles for the application layer.
//!
//! `MockClient` plays the connected peer: it serves reverse RPCs from
//! scripted state and records everything the broker sends. `ScriptedGateway`
//! plays the upstream model: each call to `stream` replays the next
//! scripted event sequence.

use crate::ports::client_port::{ClientError, ClientPort, ClientResult};
use crate::ports::llm_gateway::{
    CompletionRequest, GatewayError, LlmGateway, StreamEvent, StreamHandle,
};
use async_trait::async_trait;
use broker_domain::{PermissionOutcome, SessionId, SessionUpdate, ToolCallStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Scripted behavior for the terminal chain.
#[derive(Debug, Clone)]
pub struct TerminalScript {
    pub exit_code: i64,
    pub output: String,
    /// When set, `wait_for_terminal_exit` fails with this error.
    pub wait_error: Option<ClientError>,
}

impl Default for TerminalScript {
    fn default() -> Self {
        Self {
            exit_code: 0,
            output: String::new(),
            wait_error: None,
        }
    }
}

/// A peer stub with scripted filesystem, terminal, and discovery state.
pub struct MockClient {
    pub updates: Mutex<Vec<SessionUpdate>>,
    pub files: Mutex<HashMap<String, String>>,
    pub written: Mutex<Vec<(String, String)>>,
    pub permission: Mutex<PermissionOutcome>,
    pub permission_requests: Mutex<Vec<String>>,
    /// `None` makes `discover_tools` answer *method not found*.
    pub discover_result: Mutex<Option<serde_json::Value>>,
    pub discover_calls: AtomicU64,
    /// Extension method name -> scripted result. Missing names answer
    /// *method not found*.
    pub extension_results: Mutex<HashMap<String, serde_json::Value>>,
    pub extension_calls: Mutex<Vec<(String, serde_json::Value)>>,
    pub terminal: Mutex<TerminalScript>,
    pub terminal_events: Mutex<Vec<String>>,
    pub fail_sends: AtomicBool,
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            updates: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
            written: Mutex::new(Vec::new()),
            permission: Mutex::new(PermissionOutcome::allow()),
            permission_requests: Mutex::new(Vec::new()),
            discover_result: Mutex::new(None),
            discover_calls: AtomicU64::new(0),
            extension_results: Mutex::new(HashMap::new()),
            extension_calls: Mutex::new(Vec::new()),
            terminal: Mutex::new(TerminalScript::default()),
            terminal_events: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
        }
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
        self
    }

    pub fn with_discovery(self, raw: serde_json::Value) -> Self {
        *self.discover_result.lock().unwrap() = Some(raw);
        self
    }

    pub fn deny_permissions(self, reason: &str) -> Self {
        *self.permission.lock().unwrap() = PermissionOutcome::deny(reason);
        self
    }

    /// Statuses carried by the emitted tool-call updates, in order.
    pub fn update_statuses(&self) -> Vec<Option<ToolCallStatus>> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter_map(|u| match u {
                SessionUpdate::ToolCallStart { status, .. } => Some(Some(*status)),
                SessionUpdate::ToolCallUpdate { status, .. } => Some(*status),
                SessionUpdate::AgentMessageChunk { .. } => None,
            })
            .collect()
    }

    /// Concatenated text of all agent message chunks.
    pub fn message_text(&self) -> String {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter_map(|u| match u {
                SessionUpdate::AgentMessageChunk { content } => {
                    content.as_text().map(str::to_string)
                }
                _ => None,
            })
            .collect()
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientPort for MockClient {
    async fn read_text_file(
        &self,
        _session_id: &SessionId,
        path: &str,
        limit: Option<u64>,
        line: Option<u64>,
    ) -> ClientResult<String> {
        let files = self.files.lock().unwrap();
        let content = files
            .get(path)
            .ok_or_else(|| ClientError::Rpc {
                code: -32004,
                message: format!("no such file: {path}"),
            })?
            .clone();
        drop(files);

        // Apply the optional line window the way a real client would.
        let start = line.unwrap_or(0) as usize;
        let lines: Vec<&str> = content.lines().collect();
        if start >= lines.len() && start != 0 {
            return Ok(String::new());
        }
        let end = match limit {
            Some(l) => (start + l as usize).min(lines.len()),
            None => lines.len(),
        };
        Ok(lines[start..end].join("\n"))
    }

    async fn write_text_file(
        &self,
        _session_id: &SessionId,
        path: &str,
        content: &str,
    ) -> ClientResult<()> {
        self.written
            .lock()
            .unwrap()
            .push((path.to_string(), content.to_string()));
        Ok(())
    }

    async fn create_terminal(
        &self,
        _session_id: &SessionId,
        command: &str,
        _args: &[String],
        _cwd: Option<&str>,
    ) -> ClientResult<String> {
        self.terminal_events
            .lock()
            .unwrap()
            .push(format!("create {command}"));
        Ok("term-1".to_string())
    }

    async fn wait_for_terminal_exit(
        &self,
        _session_id: &SessionId,
        terminal_id: &str,
    ) -> ClientResult<i64> {
        self.terminal_events
            .lock()
            .unwrap()
            .push(format!("wait {terminal_id}"));
        let script = self.terminal.lock().unwrap().clone();
        if let Some(err) = script.wait_error {
            return Err(err);
        }
        Ok(script.exit_code)
    }

    async fn get_terminal_output(
        &self,
        _session_id: &SessionId,
        terminal_id: &str,
    ) -> ClientResult<String> {
        self.terminal_events
            .lock()
            .unwrap()
            .push(format!("output {terminal_id}"));
        Ok(self.terminal.lock().unwrap().output.clone())
    }

    async fn release_terminal(
        &self,
        _session_id: &SessionId,
        terminal_id: &str,
    ) -> ClientResult<()> {
        self.terminal_events
            .lock()
            .unwrap()
            .push(format!("release {terminal_id}"));
        Ok(())
    }

    async fn kill_terminal(&self, _session_id: &SessionId, terminal_id: &str) -> ClientResult<()> {
        self.terminal_events
            .lock()
            .unwrap()
            .push(format!("kill {terminal_id}"));
        Ok(())
    }

    async fn request_permission(
        &self,
        _session_id: &SessionId,
        _tool_call_id: &str,
        description: &str,
    ) -> ClientResult<PermissionOutcome> {
        self.permission_requests
            .lock()
            .unwrap()
            .push(description.to_string());
        Ok(self.permission.lock().unwrap().clone())
    }

    async fn discover_tools(&self, _session_id: &SessionId) -> ClientResult<serde_json::Value> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        match self.discover_result.lock().unwrap().clone() {
            Some(raw) => Ok(raw),
            None => Err(ClientError::Unsupported("discover_tools".into())),
        }
    }

    async fn call_extension(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> ClientResult<serde_json::Value> {
        self.extension_calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));
        match self.extension_results.lock().unwrap().get(method) {
            Some(result) => Ok(result.clone()),
            None => Err(ClientError::Unsupported(method.to_string())),
        }
    }

    async fn session_update(
        &self,
        _session_id: &SessionId,
        update: SessionUpdate,
    ) -> ClientResult<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionClosed);
        }
        self.updates.lock().unwrap().push(update);
        Ok(())
    }
}

/// A gateway that replays pre-scripted streams in order.
pub struct ScriptedGateway {
    streams: Mutex<VecDeque<Vec<StreamEvent>>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedGateway {
    pub fn new(streams: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            streams: Mutex::new(streams.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A stream that produces text and then a clean stop.
    pub fn text_turn(text: &str) -> Vec<StreamEvent> {
        vec![
            StreamEvent::TextDelta(text.to_string()),
            StreamEvent::Done {
                finish_reason: Some("stop".into()),
                usage: None,
            },
        ]
    }

    /// A stream that declares one complete tool call and pauses.
    pub fn tool_call_turn(id: &str, name: &str, arguments: &str) -> Vec<StreamEvent> {
        vec![
            StreamEvent::ToolCallDelta {
                index: 0,
                id: Some(id.to_string()),
                name: Some(name.to_string()),
                arguments: Some(arguments.to_string()),
            },
            StreamEvent::Done {
                finish_reason: Some("tool_calls".into()),
                usage: None,
            },
        ]
    }
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    async fn stream(&self, request: CompletionRequest) -> Result<StreamHandle, GatewayError> {
        self.requests.lock().unwrap().push(request);
        let events = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| GatewayError::RequestFailed("no more scripted streams".into()))?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(StreamHandle { receiver: rx })
    }
}
