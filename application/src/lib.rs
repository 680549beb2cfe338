//! Application layer for acp-broker
//!
//! Defines the ports the broker depends on (the client peer and the
//! upstream LLM), and the session machinery built on top of them: the
//! three-tier toolset pipeline, the tool-call tracker, the session
//! registry, and the prompt runner.

pub mod config;
pub mod ports;
#[cfg(test)]
pub mod test_support;
pub mod registry;
pub mod runner;
pub mod toolset;
pub mod tracker;

// Re-export commonly used types
pub use config::{BrokerConfig, LlmEndpointConfig, TimeoutConfig};
pub use ports::client_port::{ClientError, ClientPort, ClientResult};
pub use ports::llm_gateway::{
    ChatMessage, CompletionRequest, GatewayError, LlmGateway, StreamEvent, StreamHandle,
    TokenUsage, ToolCallRequest,
};
pub use registry::{AgentProfile, Session, SessionRegistry};
pub use runner::{PromptDeps, PromptRunner};
pub use toolset::{InvokeDeps, SessionTool, Toolset, builder::ToolsetBuilder};
pub use tracker::{ProgressPatch, ToolTracker};
