//! Session Registry
//!
//! Per-session immutable state, keyed by session id. `build` runs the
//! discovery-and-assembly pipeline exactly once per id: concurrent
//! `new_session` and `prompt` races share one `OnceCell` per id, so
//! `discover_tools` is called at most once no matter how the requests
//! interleave. Once registered, the catalog and toolset reachable through
//! an id never change until the session is destroyed.

use crate::config::BrokerConfig;
use crate::ports::client_port::ClientPort;
use crate::toolset::{Toolset, builder::ToolsetBuilder};
use broker_domain::{
    ClientCapabilities, DiscoveryTier, ModelSettings, SessionId, ToolCatalog,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Instructions and model settings bundled into a session's agent.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub instructions: String,
    pub settings: ModelSettings,
}

impl AgentProfile {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            instructions: config.effective_instructions(),
            settings: config.model.clone(),
        }
    }
}

/// Immutable per-session state.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub cwd: String,
    pub mode: Option<String>,
    pub tier: DiscoveryTier,
    pub catalog: Option<ToolCatalog>,
    pub toolset: Toolset,
    pub profile: AgentProfile,
    pub created_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("session {0} already registered with different content")]
    Conflict(String),
}

type SessionCell = Arc<OnceCell<Arc<Session>>>;

/// Map from session id to session, owned by the agent adapter.
pub struct SessionRegistry {
    client: Arc<dyn ClientPort>,
    profile: AgentProfile,
    sessions: Mutex<HashMap<String, SessionCell>>,
}

impl SessionRegistry {
    pub fn new(client: Arc<dyn ClientPort>, profile: AgentProfile) -> Self {
        Self {
            client,
            profile,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a fully built session.
    pub fn lookup(&self, id: &SessionId) -> Option<Arc<Session>> {
        let sessions = self.sessions.lock().unwrap();
        sessions.get(id.as_str()).and_then(|cell| cell.get().cloned())
    }

    /// Build (or return the already-built) session for `id`.
    ///
    /// Discovery failure is recoverable: the pipeline falls through to the
    /// capability tier and then the default tier, so this always yields a
    /// usable session.
    pub async fn build(
        &self,
        id: SessionId,
        cwd: String,
        mode: Option<String>,
        capabilities: Option<ClientCapabilities>,
    ) -> Arc<Session> {
        let cell = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions
                .entry(id.as_str().to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_init(|| self.build_session(id, cwd, mode, capabilities))
            .await
            .clone()
    }

    async fn build_session(
        &self,
        id: SessionId,
        cwd: String,
        mode: Option<String>,
        capabilities: Option<ClientCapabilities>,
    ) -> Arc<Session> {
        let catalog = match self.client.discover_tools(&id).await {
            Ok(raw) => {
                let parsed = ToolCatalog::parse(&raw);
                for reason in &parsed.rejected {
                    warn!(session_id = %id, %reason, "rejected catalog entry");
                }
                if parsed.catalog.is_empty() {
                    debug!(session_id = %id, "discovery returned no usable tools");
                    None
                } else {
                    Some(parsed.catalog)
                }
            }
            Err(e) => {
                debug!(session_id = %id, error = %e, "tool discovery unavailable");
                None
            }
        };

        let toolset = ToolsetBuilder::build(catalog.as_ref(), capabilities.as_ref());
        info!(
            session_id = %id,
            tier = %toolset.tier(),
            tools = toolset.len(),
            "session built"
        );

        Arc::new(Session {
            id,
            cwd,
            mode,
            tier: toolset.tier(),
            catalog,
            toolset,
            profile: self.profile.clone(),
            created_at: Utc::now(),
        })
    }

    /// Register an externally built session. Idempotent for the same
    /// id/content pair; re-registering an id with different content is
    /// rejected.
    pub fn register(&self, session: Arc<Session>) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(existing) = sessions.get(session.id.as_str()).and_then(|c| c.get()) {
            if existing.cwd == session.cwd && existing.tier == session.tier {
                return Ok(());
            }
            return Err(RegistryError::Conflict(session.id.as_str().to_string()));
        }
        sessions.insert(
            session.id.as_str().to_string(),
            Arc::new(OnceCell::new_with(Some(session))),
        );
        Ok(())
    }

    /// Remove one session.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .remove(id.as_str())
            .and_then(|cell| cell.get().cloned())
    }

    /// Remove and return every built session. Used at shutdown and on
    /// transport teardown.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .drain()
            .filter_map(|(_, cell)| cell.get().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockClient;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn profile() -> AgentProfile {
        AgentProfile::from_config(&BrokerConfig::default())
    }

    fn registry_with(mock: MockClient) -> (SessionRegistry, Arc<MockClient>) {
        let mock = Arc::new(mock);
        let registry = SessionRegistry::new(mock.clone(), profile());
        (registry, mock)
    }

    #[tokio::test]
    async fn build_with_catalog_is_tier1() {
        let (registry, _mock) = registry_with(MockClient::new().with_discovery(json!({
            "tools": [{"name": "refactor_rename", "kind": "edit"}]
        })));

        let session = registry
            .build(SessionId::from_wire("session-1"), "/w".into(), None, None)
            .await;

        assert_eq!(session.tier, DiscoveryTier::Catalog);
        assert!(session.catalog.is_some());
        assert_eq!(session.toolset.len(), 1);
    }

    #[tokio::test]
    async fn build_without_discovery_falls_to_default() {
        let (registry, _mock) = registry_with(MockClient::new());

        let session = registry
            .build(SessionId::from_wire("session-1"), "/w".into(), None, None)
            .await;

        assert_eq!(session.tier, DiscoveryTier::Default);
        assert!(session.catalog.is_none());
        assert_eq!(session.toolset.len(), 3);
    }

    #[tokio::test]
    async fn empty_discovery_with_capabilities_is_tier2() {
        let (registry, _mock) =
            registry_with(MockClient::new().with_discovery(json!({"tools": []})));

        let caps: ClientCapabilities =
            serde_json::from_value(json!({"fs": {"read_text_file": true}})).unwrap();
        let session = registry
            .build(SessionId::from_wire("session-1"), "/w".into(), None, Some(caps))
            .await;

        assert_eq!(session.tier, DiscoveryTier::Capabilities);
        assert_eq!(session.toolset.names().collect::<Vec<_>>(), vec!["read_file"]);
    }

    #[tokio::test]
    async fn concurrent_builds_run_discovery_once() {
        let (registry, mock) = registry_with(MockClient::new().with_discovery(json!({
            "tools": [{"name": "read_file", "kind": "read"}]
        })));
        let registry = Arc::new(registry);

        let id = SessionId::from_wire("session-race");
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                registry.build(id, "/w".into(), None, None).await
            }));
        }

        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.unwrap());
        }

        assert_eq!(mock.discover_calls.load(Ordering::SeqCst), 1);
        // Everyone sees the same session record.
        for session in &sessions {
            assert!(Arc::ptr_eq(session, &sessions[0]));
        }
    }

    #[tokio::test]
    async fn build_is_idempotent_per_id() {
        let (registry, mock) = registry_with(MockClient::new().with_discovery(json!({
            "tools": [{"name": "read_file"}]
        })));

        let id = SessionId::from_wire("session-1");
        let first = registry.build(id.clone(), "/w".into(), None, None).await;
        let second = registry.build(id.clone(), "/other".into(), None, None).await;

        // Same record, discovery ran once; the second cwd is ignored.
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(mock.discover_calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.lookup(&id).unwrap().cwd, "/w");
    }

    #[tokio::test]
    async fn register_idempotent_and_conflicting() {
        let (registry, _mock) = registry_with(MockClient::new());
        let session = registry
            .build(SessionId::from_wire("session-1"), "/w".into(), None, None)
            .await;

        assert!(registry.register(session.clone()).is_ok());

        let mut conflicting = (*session).clone();
        conflicting.cwd = "/elsewhere".into();
        let err = registry.register(Arc::new(conflicting)).unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));
    }

    #[tokio::test]
    async fn drain_empties_registry() {
        let (registry, _mock) = registry_with(MockClient::new());
        registry
            .build(SessionId::from_wire("session-1"), "/w".into(), None, None)
            .await;
        registry
            .build(SessionId::from_wire("session-2"), "/w".into(), None, None)
            .await;

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }
}
