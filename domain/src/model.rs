//! Model settings bundled into a session's agent profile.

use serde::{Deserialize, Serialize};

/// Sampling and budget parameters for the upstream model.
///
/// One value is built per session and reused for every prompt on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Model identifier sent to the chat/completions endpoint.
    pub model: String,
    /// Sampling temperature; `None` leaves the endpoint default.
    pub temperature: Option<f64>,
    /// Completion token cap; `None` leaves the endpoint default.
    pub max_tokens: Option<u32>,
    /// Upstream transport failures are retried this many times.
    pub retries: u32,
    /// Blank final messages trigger up to this many regeneration attempts.
    pub output_retries: u32,
    /// Tool-execution turns allowed within a single prompt.
    pub max_tool_turns: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: "qwen2.5-coder-7b-instruct".to_string(),
            temperature: Some(0.2),
            max_tokens: Some(4096),
            retries: 2,
            output_retries: 1,
            max_tool_turns: 16,
        }
    }
}
