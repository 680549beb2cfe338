//! Broker configuration.
//!
//! Sections follow the multi-source merge pattern: every field has a
//! default, a TOML file may override it, and environment variables win
//! last. The figment wiring itself lives in the binary.

use broker_domain::ModelSettings;
use serde::{Deserialize, Serialize};

/// Identity advertised in the `initialize` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentIdentity {
    pub name: String,
    pub version: String,
}

impl Default for AgentIdentity {
    fn default() -> Self {
        Self {
            name: "acp-broker".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Upstream chat/completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmEndpointConfig {
    /// Base URL, e.g. `http://127.0.0.1:8000/v1`.
    pub base_url: String,
    /// Environment variable holding the API key. Empty means the endpoint
    /// is unauthenticated (common for local inference servers).
    pub api_key_env: String,
}

impl Default for LlmEndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/v1".to_string(),
            api_key_env: "ACP_BROKER_API_KEY".to_string(),
        }
    }
}

/// Deadlines for reverse RPCs against the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// File operations (read/write).
    pub file_op_secs: u64,
    /// Terminal waits; commands can legitimately run for minutes.
    pub terminal_secs: u64,
    /// Everything else (permission prompts, discovery, extensions).
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            file_op_secs: 30,
            terminal_secs: 300,
            request_secs: 60,
        }
    }
}

/// Main broker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub agent: AgentIdentity,
    /// System prompt installed as every session's instructions.
    pub instructions: String,
    pub model: ModelSettings,
    pub llm: LlmEndpointConfig,
    pub timeouts: TimeoutConfig,
}

impl BrokerConfig {
    /// Instructions actually used: the configured ones, or the built-in
    /// default when the config leaves them empty.
    pub fn effective_instructions(&self) -> String {
        if self.instructions.trim().is_empty() {
            DEFAULT_INSTRUCTIONS.to_string()
        } else {
            self.instructions.clone()
        }
    }
}

const DEFAULT_INSTRUCTIONS: &str = "\
You are a coding agent operating inside a user's workspace. You can read \
and write files and run commands through the tools provided. Use tools \
when they help; answer directly when they don't. Report tool failures \
honestly instead of guessing at their output.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_everything() {
        let config = BrokerConfig::default();
        assert_eq!(config.agent.name, "acp-broker");
        assert_eq!(config.timeouts.file_op_secs, 30);
        assert_eq!(config.timeouts.terminal_secs, 300);
        assert!(config.llm.base_url.starts_with("http"));
    }

    #[test]
    fn empty_instructions_fall_back_to_default() {
        let config = BrokerConfig::default();
        assert!(config.effective_instructions().contains("coding agent"));

        let mut custom = BrokerConfig::default();
        custom.instructions = "Answer in haiku.".to_string();
        assert_eq!(custom.effective_instructions(), "Answer in haiku.");
    }

    #[test]
    fn partial_toml_parses() {
        let config: BrokerConfig = toml::from_str(
            r#"
            [model]
            model = "llama-3.3-70b"

            [timeouts]
            terminal_secs = 120
            "#,
        )
        .unwrap();
        assert_eq!(config.model.model, "llama-3.3-70b");
        assert_eq!(config.timeouts.terminal_secs, 120);
        assert_eq!(config.timeouts.file_op_secs, 30);
    }
}
