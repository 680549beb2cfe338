//! Content blocks and session-update payloads.
//!
//! These are the value objects that cross the wire in both directions:
//! prompt content arriving from the client, and the incremental
//! `session_update` notifications the broker streams back while a prompt
//! is being handled.

use serde::{Deserialize, Serialize};

/// A single item of prompt content.
///
/// Unknown block types are tolerated at the parse boundary and dropped
/// (see [`ContentBlock::parse_list`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text { text: String },
    /// An image reference. The broker forwards the fields it understands
    /// and ignores the rest.
    Image {
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        uri: Option<String>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Parse a list of raw prompt items, silently skipping block types the
    /// broker does not understand.
    pub fn parse_list(items: &[serde_json::Value]) -> Vec<ContentBlock> {
        items
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect()
    }

    /// Flatten the textual content of a block, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Image { .. } => None,
        }
    }
}

/// The kind of operation a tool performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Read,
    Edit,
    Write,
    Execute,
    Search,
    #[default]
    Other,
}

impl ToolKind {
    /// Kinds that mutate state always go through the permission gate,
    /// whether or not the descriptor sets the permission flag.
    pub fn requires_permission(&self) -> bool {
        matches!(self, ToolKind::Edit | ToolKind::Write | ToolKind::Execute)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Read => "read",
            ToolKind::Edit => "edit",
            ToolKind::Write => "write",
            ToolKind::Execute => "execute",
            ToolKind::Search => "search",
            ToolKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a tool call. Transitions are monotonic: a terminal
/// status is never left, and `in_progress` never returns to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ToolCallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolCallStatus::Completed | ToolCallStatus::Failed)
    }

    /// Whether a transition from `self` to `next` respects monotonic order.
    pub fn can_transition_to(&self, next: ToolCallStatus) -> bool {
        use ToolCallStatus::*;
        match (self, next) {
            (Pending, InProgress | Completed | Failed) => true,
            (InProgress, Completed | Failed) => true,
            (a, b) => *a == b,
        }
    }
}

/// A fragment of tool-call content attached to a tracker record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCallContent {
    Text { text: String },
    Structured { value: serde_json::Value },
}

impl ToolCallContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A file location a tool call touches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallLocation {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
}

/// One incremental update streamed to the client during a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// A chunk of the assistant's message.
    AgentMessageChunk { content: ContentBlock },

    /// A tool call has started.
    ToolCallStart {
        id: String,
        title: String,
        kind: ToolKind,
        status: ToolCallStatus,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        content: Vec<ToolCallContent>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        locations: Vec<ToolCallLocation>,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw_input: Option<serde_json::Value>,
    },

    /// A partial update to a previously started tool call. Absent fields
    /// are left untouched on the receiving side.
    ToolCallUpdate {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<ToolCallStatus>,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        content: Vec<ToolCallContent>,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw_output: Option<serde_json::Value>,
    },
}

impl SessionUpdate {
    pub fn message_chunk(text: impl Into<String>) -> Self {
        SessionUpdate::AgentMessageChunk {
            content: ContentBlock::text(text),
        }
    }
}

/// The client's answer to a `request_permission` reverse call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionOutcome {
    pub outcome: PermissionDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    Allow,
    Deny,
}

impl PermissionOutcome {
    pub fn allowed(&self) -> bool {
        self.outcome == PermissionDecision::Allow
    }

    pub fn allow() -> Self {
        Self {
            outcome: PermissionDecision::Allow,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            outcome: PermissionDecision::Deny,
            reason: Some(reason.into()),
        }
    }
}
