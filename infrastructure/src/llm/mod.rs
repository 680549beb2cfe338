//! The upstream LLM collaborator: an OpenAI-compatible chat/completions
//! endpoint with streaming enabled.

pub mod client;
pub mod sse;
pub mod wire;
