//! Tool execution value objects - immutable result types.
//!
//! Tool failures are data, not control flow: they are serialized into the
//! conversation so the model can react, and only surface as prompt errors
//! if the model itself gives up.

use serde::{Deserialize, Serialize};

/// Error that occurred during tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    /// Error code (e.g., "NOT_FOUND", "PERMISSION_DENIED")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ToolError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Common error constructors
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(
            "NOT_FOUND",
            format!("Resource not found: {}", resource.into()),
        )
    }

    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::new(
            "PERMISSION_DENIED",
            format!("Permission denied: {}", reason.into()),
        )
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new("INVALID_ARGUMENT", message)
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::new("EXECUTION_FAILED", message)
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::new(
            "TIMEOUT",
            format!("Operation timed out: {}", operation.into()),
        )
    }

    /// A catalog entry named a tool neither side can actually run.
    pub fn unsupported_tool(name: impl Into<String>) -> Self {
        Self::new(
            "UNSUPPORTED_TOOL",
            format!("No handler or extension channel for tool: {}", name.into()),
        )
    }

    pub fn cancelled() -> Self {
        Self::new("CANCELLED", "Tool call cancelled")
    }

    pub fn connection_closed() -> Self {
        Self::new("CONNECTION_CLOSED", "Client connection closed mid-call")
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for ToolError {}

/// Result of a tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Name of the tool that was executed
    pub tool_name: String,
    /// Whether the execution was successful
    pub success: bool,
    /// Output content (for successful execution)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Error information (for failed execution)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    /// Structured output payload forwarded verbatim to the model, when the
    /// tool returned JSON rather than text (generic bridges do).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
}

impl ToolResult {
    /// Create a successful text result
    pub fn success(tool_name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            output: Some(output.into()),
            error: None,
            structured: None,
        }
    }

    /// Create a successful structured result
    pub fn structured(tool_name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            output: None,
            error: None,
            structured: Some(value),
        }
    }

    /// Create a failed result
    pub fn failure(tool_name: impl Into<String>, error: ToolError) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            output: None,
            error: Some(error),
            structured: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn error(&self) -> Option<&ToolError> {
        self.error.as_ref()
    }

    /// Render the payload that goes into the conversation's tool message.
    pub fn to_message_content(&self) -> String {
        if let Some(err) = &self.error {
            return format!("{err}");
        }
        if let Some(value) = &self.structured {
            return value.to_string();
        }
        self.output.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_display_includes_code() {
        let err = ToolError::not_found("/missing.txt").with_details("checked workspace root");
        let s = err.to_string();
        assert!(s.contains("NOT_FOUND"));
        assert!(s.contains("/missing.txt"));
        assert!(s.contains("checked workspace root"));
    }

    #[test]
    fn unsupported_tool_code() {
        let err = ToolError::unsupported_tool("refactor_rename");
        assert_eq!(err.code, "UNSUPPORTED_TOOL");
        assert!(err.message.contains("refactor_rename"));
    }

    #[test]
    fn success_result_message_content() {
        let result = ToolResult::success("read_file", "hello");
        assert!(result.is_success());
        assert_eq!(result.to_message_content(), "hello");
    }

    #[test]
    fn structured_result_message_content() {
        let result = ToolResult::structured("refactor_rename", json!({"renamed": 3}));
        assert!(result.is_success());
        assert_eq!(result.to_message_content(), r#"{"renamed":3}"#);
    }

    #[test]
    fn failure_result_message_content() {
        let result = ToolResult::failure("write_file", ToolError::permission_denied("user said no"));
        assert!(!result.is_success());
        assert!(result.to_message_content().contains("PERMISSION_DENIED"));
        assert_eq!(result.error().unwrap().code, "PERMISSION_DENIED");
    }
}
