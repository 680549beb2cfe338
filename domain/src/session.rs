//! Session identity and lifecycle value objects.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque session identifier issued by the broker.
///
/// Ids are monotone for the life of the process and carry a `session-`
/// prefix so they are recognizable in logs and wire traces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Allocate the next session id.
    pub fn next() -> Self {
        let n = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("session-{n}"))
    }

    /// Wrap an id received on the wire.
    pub fn from_wire(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which tier produced a session's toolset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryTier {
    /// Tier 1: the client's `discover_tools` catalog drove the toolset.
    Catalog,
    /// Tier 2: the toolset was derived from `ClientCapabilities` flags.
    Capabilities,
    /// Tier 3: neither was available; the full default set was installed.
    Default,
}

impl DiscoveryTier {
    pub fn as_u8(&self) -> u8 {
        match self {
            DiscoveryTier::Catalog => 1,
            DiscoveryTier::Capabilities => 2,
            DiscoveryTier::Default => 3,
        }
    }
}

impl std::fmt::Display for DiscoveryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tier-{}", self.as_u8())
    }
}

/// Why a prompt finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUseLimit,
    Cancelled,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_prefixed_and_distinct() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert!(a.as_str().starts_with("session-"));
        assert!(b.as_str().starts_with("session-"));
        assert_ne!(a, b);
    }

    #[test]
    fn session_id_serializes_transparent() {
        let id = SessionId::from_wire("session-42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"session-42\"");
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn tier_numbers() {
        assert_eq!(DiscoveryTier::Catalog.as_u8(), 1);
        assert_eq!(DiscoveryTier::Capabilities.as_u8(), 2);
        assert_eq!(DiscoveryTier::Default.as_u8(), 3);
    }

    #[test]
    fn stop_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&StopReason::EndTurn).unwrap(),
            "\"end_turn\""
        );
        assert_eq!(
            serde_json::to_string(&StopReason::ToolUseLimit).unwrap(),
            "\"tool_use_limit\""
        );
        assert_eq!(
            serde_json::to_string(&StopReason::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }
}
