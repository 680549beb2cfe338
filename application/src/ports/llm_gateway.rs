//! LLM Gateway port
//!
//! Defines the interface for streaming chat completions from the upstream
//! model endpoint. The conversation types mirror the OpenAI chat shape,
//! which is what the collaborator endpoint speaks.

use async_trait::async_trait;
use broker_domain::ModelSettings;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur during gateway operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("gateway not configured: {0}")]
    NotConfigured(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("model not available: {0}")]
    ModelNotFound(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::RequestFailed(_) | GatewayError::RateLimited { .. }
        )
    }
}

/// A message in the conversation sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    /// For tool-result messages, the id of the call being answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool calls the assistant declared in this message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    /// An assistant message that pauses on tool calls.
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
            tool_call_id: None,
            tool_calls: Some(calls),
        }
    }

    /// A tool-result message answering one call.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            tool_calls: None,
        }
    }
}

/// A complete tool call declared by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments string, exactly as the model produced it.
    pub arguments: String,
}

impl ToolCallRequest {
    /// Parse the arguments string into a JSON value. Blank arguments parse
    /// as an empty object, which several models emit for no-arg tools.
    pub fn parse_arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }
        serde_json::from_str(&self.arguments)
    }
}

/// One streaming request to the model.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// OpenAI function definitions derived from the session toolset.
    pub tools: Vec<serde_json::Value>,
    pub settings: ModelSettings,
}

/// Token usage reported by the endpoint, when available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One event from the streaming response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A fragment of assistant text.
    TextDelta(String),

    /// A fragment of a tool call. `id` and `name` arrive on the first
    /// delta for an index; `arguments` accumulates across deltas.
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },

    /// Generation stopped. `finish_reason` is `None` for the trailing
    /// `[DONE]` sentinel some endpoints emit after the real final chunk.
    Done {
        finish_reason: Option<String>,
        usage: Option<TokenUsage>,
    },

    /// The stream failed mid-flight.
    Error(GatewayError),
}

/// Handle to a live streaming response.
pub struct StreamHandle {
    pub receiver: mpsc::Receiver<StreamEvent>,
}

/// Gateway for streaming chat completions.
///
/// Implementations (adapters) live in the infrastructure layer.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Start a streaming completion. Errors returned here are
    /// request-setup failures; mid-stream failures arrive as
    /// [`StreamEvent::Error`].
    async fn stream(&self, request: CompletionRequest) -> Result<StreamHandle, GatewayError>;
}
