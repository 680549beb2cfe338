//! The Agent Adapter: implements the agent role of the protocol.
//!
//! Stores client capabilities from `initialize`, triggers discovery at
//! `new_session`, and on `prompt` runs the model with the session's
//! toolset, streaming updates back through the connection. `cancel`
//! notifications abort in-flight prompts cooperatively.

use crate::agent::wire::{
    CancelParams, InitializeParams, InitializeResult, NewSessionParams, NewSessionResult,
    PromptParams, PromptResult,
};
use crate::rpc::connection::{InboundHandler, RpcHandlerError};
use async_trait::async_trait;
use broker_application::config::BrokerConfig;
use broker_application::ports::client_port::ClientPort;
use broker_application::ports::llm_gateway::LlmGateway;
use broker_application::registry::{AgentProfile, SessionRegistry};
use broker_application::runner::{PromptDeps, PromptRunner};
use broker_application::tracker::ToolTracker;
use broker_domain::{
    AgentCapabilities, AgentInfo, ClientCapabilities, ClientInfo, ContentBlock, SessionId,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Protocol version this broker speaks.
pub const PROTOCOL_VERSION: u64 = 1;

pub struct AgentAdapter {
    config: BrokerConfig,
    client: Arc<dyn ClientPort>,
    registry: SessionRegistry,
    runner: PromptRunner,
    capabilities: Mutex<Option<ClientCapabilities>>,
    client_info: Mutex<Option<ClientInfo>>,
    /// In-flight prompt cancellation tokens, keyed by session id.
    prompts: Mutex<HashMap<String, HashMap<u64, CancellationToken>>>,
    prompt_counter: AtomicU64,
    shutdown: CancellationToken,
}

impl AgentAdapter {
    pub fn new(
        config: BrokerConfig,
        client: Arc<dyn ClientPort>,
        gateway: Arc<dyn LlmGateway>,
    ) -> Arc<Self> {
        let profile = AgentProfile::from_config(&config);
        let registry = SessionRegistry::new(client.clone(), profile);
        Arc::new(Self {
            config,
            client,
            registry,
            runner: PromptRunner::new(gateway),
            capabilities: Mutex::new(None),
            client_info: Mutex::new(None),
            prompts: Mutex::new(HashMap::new()),
            prompt_counter: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        })
    }

    /// Cancelled once `shutdown` has been answered; the serve loop tears
    /// the transport down when it fires.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of prompts currently executing, across sessions.
    pub fn in_flight_prompts(&self) -> usize {
        self.prompts.lock().unwrap().values().map(|m| m.len()).sum()
    }

    async fn handle_initialize(&self, params: Value) -> Result<Value, RpcHandlerError> {
        let params: InitializeParams = parse_params(params)?;
        info!(
            protocol_version = params.protocol_version,
            client = params.client_info.as_ref().map(|i| i.name.as_str()),
            "client initialized"
        );

        *self.capabilities.lock().unwrap() = params.client_capabilities;
        *self.client_info.lock().unwrap() = params.client_info;

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION,
            agent_info: AgentInfo {
                name: self.config.agent.name.clone(),
                version: self.config.agent.version.clone(),
            },
            agent_capabilities: AgentCapabilities::default(),
        };
        serde_json::to_value(result).map_err(|e| RpcHandlerError::internal(e.to_string()))
    }

    async fn handle_new_session(&self, params: Value) -> Result<Value, RpcHandlerError> {
        let params: NewSessionParams = parse_params(params)?;
        let id = SessionId::next();
        let capabilities = self.capabilities.lock().unwrap().clone();
        if let Some(servers) = &params.mcp_servers {
            debug!(count = servers.len(), "ignoring mcp_servers, not managed here");
        }

        let session = self
            .registry
            .build(id, params.cwd, params.mode, capabilities)
            .await;
        serde_json::to_value(NewSessionResult {
            session_id: session.id.as_str().to_string(),
        })
        .map_err(|e| RpcHandlerError::internal(e.to_string()))
    }

    async fn handle_prompt(&self, params: Value) -> Result<Value, RpcHandlerError> {
        let params: PromptParams = parse_params(params)?;
        let id = SessionId::from_wire(&params.session_id);

        // Lazy fallback: a first-seen id is built on the spot, sharing the
        // same single-flight cell new_session uses. Callers that skip
        // new_session get the default workspace root.
        let session = match self.registry.lookup(&id) {
            Some(session) => session,
            None => {
                debug!(session_id = %id, "prompt for unseen session, building lazily");
                let capabilities = self.capabilities.lock().unwrap().clone();
                self.registry
                    .build(id.clone(), ".".into(), None, capabilities)
                    .await
            }
        };

        let blocks = ContentBlock::parse_list(&params.prompt);
        let (key, cancel) = self.register_prompt(session.id.as_str());
        let tracker = Arc::new(ToolTracker::new(session.id.clone(), self.client.clone()));

        let deps = PromptDeps {
            session: session.clone(),
            client: self.client.clone(),
            tracker,
            cancel,
        };
        let stop_reason = self.runner.run(&deps, blocks).await;
        self.unregister_prompt(session.id.as_str(), key);

        info!(session_id = %session.id, stop_reason = ?stop_reason, "prompt finished");
        serde_json::to_value(PromptResult { stop_reason })
            .map_err(|e| RpcHandlerError::internal(e.to_string()))
    }

    fn handle_shutdown(&self) -> Value {
        info!("shutdown requested");
        self.cancel_all("shutdown");
        let drained = self.registry.drain();
        debug!(sessions = drained.len(), "sessions closed");

        // The response still has to go out on the wire; the serve loop
        // waits on this token and tears the transport down afterwards.
        self.shutdown.cancel();
        serde_json::json!({})
    }

    fn register_prompt(&self, session_id: &str) -> (u64, CancellationToken) {
        let key = self.prompt_counter.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        self.prompts
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_default()
            .insert(key, token.clone());
        (key, token)
    }

    fn unregister_prompt(&self, session_id: &str, key: u64) {
        let mut prompts = self.prompts.lock().unwrap();
        if let Some(tokens) = prompts.get_mut(session_id) {
            tokens.remove(&key);
            if tokens.is_empty() {
                prompts.remove(session_id);
            }
        }
    }

    fn cancel_session(&self, session_id: &str) {
        let prompts = self.prompts.lock().unwrap();
        match prompts.get(session_id) {
            Some(tokens) => {
                for token in tokens.values() {
                    token.cancel();
                }
            }
            None => debug!(session_id, "cancel for session with no prompt in flight"),
        }
    }

    fn cancel_all(&self, reason: &str) {
        let prompts = self.prompts.lock().unwrap();
        for (session_id, tokens) in prompts.iter() {
            debug!(session_id, reason, "cancelling in-flight prompt");
            for token in tokens.values() {
                token.cancel();
            }
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, RpcHandlerError> {
    serde_json::from_value(params).map_err(|e| RpcHandlerError::invalid_params(e.to_string()))
}

#[async_trait]
impl InboundHandler for AgentAdapter {
    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcHandlerError> {
        match method {
            "initialize" => self.handle_initialize(params).await,
            "new_session" => self.handle_new_session(params).await,
            "prompt" => self.handle_prompt(params).await,
            "shutdown" => Ok(self.handle_shutdown()),
            // Trivial default: nothing survives restarts.
            "list_sessions" => Ok(serde_json::json!({ "sessions": [] })),
            other => Err(RpcHandlerError::method_not_found(other)),
        }
    }

    async fn handle_notification(&self, method: &str, params: Value) {
        match method {
            "cancel" => match serde_json::from_value::<CancelParams>(params) {
                Ok(cancel) => {
                    info!(session_id = %cancel.session_id, "cancel requested");
                    self.cancel_session(&cancel.session_id);
                }
                Err(e) => warn!(error = %e, "malformed cancel notification"),
            },
            other => debug!(method = other, "ignoring notification"),
        }
    }

    async fn on_close(&self) {
        debug!("connection closed, tearing down sessions");
        self.cancel_all("connection closed");
        self.registry.drain();
    }
}
