//! Infrastructure layer for acp-broker
//!
//! Adapters that implement the application-layer ports: JSON-RPC framing
//! and connection plumbing, the stdio and WebSocket transports, the typed
//! peer proxy, the agent-side method surface, and the OpenAI-compatible
//! streaming LLM client.

pub mod agent;
pub mod llm;
pub mod peer;
pub mod rpc;
pub mod serve;

// Re-export commonly used types
pub use agent::adapter::AgentAdapter;
pub use llm::client::OpenAiClient;
pub use peer::PeerClient;
pub use rpc::{
    connection::{Connection, ConnectionError, InboundHandler, RpcHandlerError},
    protocol::{
        JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JsonRpcResponseOut, MessageKind,
        RpcErrorObject, classify_message,
    },
    transport::{FrameSink, FrameSource, StreamSink, StreamSource, WsSink, WsSource, stdio_pair},
};
pub use serve::{serve_stdio, serve_ws};
