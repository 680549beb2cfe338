//! Parameter and result types for the agent-side methods.

use broker_domain::{AgentCapabilities, AgentInfo, ClientCapabilities, ClientInfo, StopReason};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct InitializeParams {
    pub protocol_version: u64,
    #[serde(default)]
    pub client_capabilities: Option<ClientCapabilities>,
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeResult {
    pub protocol_version: u64,
    pub agent_info: AgentInfo,
    pub agent_capabilities: AgentCapabilities,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSessionParams {
    pub cwd: String,
    #[serde(default)]
    pub mode: Option<String>,
    /// Accepted for compatibility; the broker does not manage MCP servers.
    #[serde(default)]
    pub mcp_servers: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewSessionResult {
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptParams {
    pub session_id: String,
    /// Raw content blocks; unknown block types are dropped at parse time.
    #[serde(default)]
    pub prompt: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptResult {
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelParams {
    pub session_id: String,
}
