//! Tool Tracker
//!
//! Per-session registry of in-flight tool calls. Every mutation emits a
//! `session_update` notification through the client port, and the tracker
//! is the single place that enforces the monotonic status order. The
//! completeness invariant lives here too: a started call must reach
//! exactly one terminal update before the prompt response, on every path
//! including cancellation (see [`ToolTracker::fail_outstanding`]).

use crate::ports::client_port::ClientPort;
use broker_domain::{
    SessionId, SessionUpdate, ToolCallContent, ToolCallLocation, ToolCallStatus, ToolKind,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Mutable state of one tracked tool call.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub id: String,
    pub title: String,
    pub kind: ToolKind,
    pub status: ToolCallStatus,
    pub content: Vec<ToolCallContent>,
    pub locations: Vec<ToolCallLocation>,
    pub raw_input: Option<serde_json::Value>,
    pub raw_output: Option<serde_json::Value>,
}

/// A partial update applied through [`ToolTracker::progress`]. Unset
/// fields leave the record untouched.
#[derive(Debug, Clone, Default)]
pub struct ProgressPatch {
    pub status: Option<ToolCallStatus>,
    pub title: Option<String>,
    pub content: Vec<ToolCallContent>,
    pub raw_output: Option<serde_json::Value>,
}

impl ProgressPatch {
    pub fn completed() -> Self {
        Self {
            status: Some(ToolCallStatus::Completed),
            ..Default::default()
        }
    }

    pub fn failed() -> Self {
        Self {
            status: Some(ToolCallStatus::Failed),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.content.push(ToolCallContent::text(text));
        self
    }

    pub fn with_raw_output(mut self, value: serde_json::Value) -> Self {
        self.raw_output = Some(value);
        self
    }
}

/// Per-session registry of in-flight tool calls.
pub struct ToolTracker {
    session_id: SessionId,
    client: Arc<dyn ClientPort>,
    records: Mutex<HashMap<String, ToolCallRecord>>,
    id_counter: AtomicU64,
}

impl ToolTracker {
    pub fn new(session_id: SessionId, client: Arc<dyn ClientPort>) -> Self {
        Self {
            session_id,
            client,
            records: Mutex::new(HashMap::new()),
            id_counter: AtomicU64::new(1),
        }
    }

    /// Allocate a fallback call id for models that omit one.
    pub fn allocate_id(&self) -> String {
        let n = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("call-{n}")
    }

    /// Register a call and emit its `tool_call_start` update with status
    /// `in_progress`. Re-starting an id that is already tracked is
    /// rejected with a warning; the first registration wins.
    pub async fn start(
        &self,
        id: &str,
        title: impl Into<String>,
        kind: ToolKind,
        locations: Vec<ToolCallLocation>,
        raw_input: Option<serde_json::Value>,
    ) {
        let title = title.into();
        let record = ToolCallRecord {
            id: id.to_string(),
            title: title.clone(),
            kind,
            status: ToolCallStatus::InProgress,
            content: Vec::new(),
            locations: locations.clone(),
            raw_input: raw_input.clone(),
            raw_output: None,
        };

        {
            let mut records = self.records.lock().await;
            if records.contains_key(id) {
                warn!(call_id = %id, "tool call already tracked, ignoring duplicate start");
                return;
            }
            records.insert(id.to_string(), record);
        }

        self.emit(SessionUpdate::ToolCallStart {
            id: id.to_string(),
            title,
            kind,
            status: ToolCallStatus::InProgress,
            content: Vec::new(),
            locations,
            raw_input,
        })
        .await;
    }

    /// Apply a partial update and emit the matching `tool_call_update`.
    ///
    /// Backward status transitions are dropped, keeping the record (and
    /// the stream the client sees) monotonic.
    pub async fn progress(&self, id: &str, patch: ProgressPatch) {
        let update = {
            let mut records = self.records.lock().await;
            let Some(record) = records.get_mut(id) else {
                warn!(call_id = %id, "progress for unknown tool call, dropping");
                return;
            };

            let mut status = None;
            if let Some(next) = patch.status {
                if record.status.can_transition_to(next) {
                    record.status = next;
                    status = Some(next);
                } else {
                    warn!(
                        call_id = %id,
                        from = ?record.status,
                        to = ?next,
                        "ignoring backward tool call status transition"
                    );
                }
            }
            if let Some(title) = &patch.title {
                record.title = title.clone();
            }
            record.content.extend(patch.content.iter().cloned());
            if let Some(raw) = &patch.raw_output {
                record.raw_output = Some(raw.clone());
            }

            SessionUpdate::ToolCallUpdate {
                id: id.to_string(),
                status,
                title: patch.title,
                content: patch.content,
                raw_output: patch.raw_output,
            }
        };

        self.emit(update).await;
    }

    /// Drop a record. Runs on all invocation paths so nothing leaks when
    /// an execution bypasses normal completion.
    pub async fn forget(&self, id: &str) {
        let removed = self.records.lock().await.remove(id);
        if let Some(record) = removed {
            if !record.status.is_terminal() {
                debug!(call_id = %id, "forgetting non-terminal tool call record");
            }
        }
    }

    /// Whether a call id is currently tracked.
    pub async fn is_tracked(&self, id: &str) -> bool {
        self.records.lock().await.contains_key(id)
    }

    /// Ids of calls that have not reached a terminal status.
    pub async fn outstanding(&self) -> Vec<String> {
        self.records
            .lock()
            .await
            .values()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.id.clone())
            .collect()
    }

    /// Drive every non-terminal call to `failed` and forget it.
    ///
    /// Used when a prompt is cancelled or the connection goes away while
    /// calls are in flight; guarantees the start/terminal pairing even
    /// when the invoking future was dropped mid-execution.
    pub async fn fail_outstanding(&self, reason: &str) {
        let ids = self.outstanding().await;
        for id in ids {
            self.progress(&id, ProgressPatch::failed().with_text(reason.to_string()))
                .await;
            self.forget(&id).await;
        }
    }

    async fn emit(&self, update: SessionUpdate) {
        if let Err(e) = self.client.session_update(&self.session_id, update).await {
            // A closed connection mid-prompt is handled by the runner; the
            // tracker keeps its records consistent regardless.
            debug!(session_id = %self.session_id, error = %e, "failed to emit session update");
        }
    }
}
