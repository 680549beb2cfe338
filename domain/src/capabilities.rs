//! Capability records exchanged during the `initialize` handshake.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the connected client can service via reverse RPC.
///
/// Stored on the connection for its whole life; consulted by the toolset
/// builder when no catalog is available (tier 2).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientCapabilities {
    pub fs: FsCapabilities,
    pub terminal: bool,
    /// Open extension bag; unknown keys are preserved verbatim.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub ext: HashMap<String, serde_json::Value>,
}

/// File-system reverse-call support.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsCapabilities {
    pub read_text_file: bool,
    pub write_text_file: bool,
}

/// Identity of the connected client, as reported at `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Identity of this broker, reported back in the `initialize` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub version: String,
}

/// Capabilities the broker advertises to its peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentCapabilities {
    /// Prompt handling streams `session_update` notifications.
    pub streaming: bool,
    /// The broker will probe `discover_tools` at session creation.
    pub tool_discovery: bool,
}

impl Default for AgentCapabilities {
    fn default() -> Self {
        Self {
            streaming: true,
            tool_discovery: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn capabilities_default_to_false() {
        let caps: ClientCapabilities = serde_json::from_value(json!({})).unwrap();
        assert!(!caps.fs.read_text_file);
        assert!(!caps.fs.write_text_file);
        assert!(!caps.terminal);
        assert!(caps.ext.is_empty());
    }

    #[test]
    fn partial_capabilities_parse() {
        let caps: ClientCapabilities = serde_json::from_value(json!({
            "fs": {"read_text_file": true},
            "ext": {"tool_calls": true}
        }))
        .unwrap();
        assert!(caps.fs.read_text_file);
        assert!(!caps.fs.write_text_file);
        assert_eq!(caps.ext.get("tool_calls"), Some(&json!(true)));
    }

    #[test]
    fn agent_capabilities_advertise_streaming() {
        let caps = AgentCapabilities::default();
        let value = serde_json::to_value(&caps).unwrap();
        assert_eq!(value["streaming"], true);
        assert_eq!(value["tool_discovery"], true);
    }
}
