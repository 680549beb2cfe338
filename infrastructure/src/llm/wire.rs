//! Wire types for the OpenAI chat-completions format.
//!
//! The request side serializes from the application-layer conversation
//! types; the response side deserializes the `chat.completion.chunk`
//! streaming deltas.

use broker_application::ports::llm_gateway::{ChatMessage, CompletionRequest, ToolCallRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A chat completion request body.
#[derive(Debug, Clone, Serialize)]
pub struct WireChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: &'static str,
    pub function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireFunctionCall {
    pub name: String,
    pub arguments: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.clone(),
            content: msg.content.clone(),
            tool_call_id: msg.tool_call_id.clone(),
            tool_calls: msg.tool_calls.as_ref().map(|calls| {
                calls.iter().map(WireToolCall::from).collect()
            }),
        }
    }
}

impl From<&ToolCallRequest> for WireToolCall {
    fn from(call: &ToolCallRequest) -> Self {
        Self {
            id: call.id.clone(),
            call_type: "function",
            function: WireFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

impl From<&CompletionRequest> for WireChatRequest {
    fn from(request: &CompletionRequest) -> Self {
        Self {
            model: request.settings.model.clone(),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            max_tokens: request.settings.max_tokens,
            temperature: request.settings.temperature,
            tools: request.tools.clone(),
            stream: true,
        }
    }
}

// ── Streaming deltas ───────────────────────────────────────────────────

/// One `chat.completion.chunk` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub choices: Vec<StreamDeltaChoice>,
    #[serde(default)]
    pub usage: Option<StreamDeltaUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamDeltaChoice {
    #[serde(default)]
    pub delta: StreamDeltaContent,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamDeltaContent {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<StreamDeltaToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamDeltaToolCall {
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<StreamDeltaFunction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamDeltaFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamDeltaUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_domain::ModelSettings;
    use serde_json::json;

    #[test]
    fn request_serializes_with_stream_flag() {
        let request = CompletionRequest {
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
            tools: vec![json!({"type": "function", "function": {"name": "read_file"}})],
            settings: ModelSettings::default(),
        };
        let wire = WireChatRequest::from(&request);
        let value = serde_json::to_value(&wire).unwrap();

        assert_eq!(value["stream"], true);
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["tools"].as_array().unwrap().len(), 1);
        assert_eq!(value["model"], ModelSettings::default().model);
    }

    #[test]
    fn assistant_tool_calls_serialize_in_openai_shape() {
        let msg = ChatMessage::assistant_tool_calls(
            "",
            vec![ToolCallRequest {
                id: "call_1".into(),
                name: "read_file".into(),
                arguments: r#"{"path":"/a"}"#.into(),
            }],
        );
        let wire = WireMessage::from(&msg);
        let value = serde_json::to_value(&wire).unwrap();

        assert_eq!(value["tool_calls"][0]["type"], "function");
        assert_eq!(value["tool_calls"][0]["function"]["name"], "read_file");
        assert_eq!(value["tool_calls"][0]["id"], "call_1");
    }

    #[test]
    fn tool_result_message_omits_tool_calls() {
        let msg = ChatMessage::tool_result("call_1", "output");
        let wire = WireMessage::from(&msg);
        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_1");
        assert!(value.get("tool_calls").is_none());
    }

    #[test]
    fn delta_with_tool_calls_parses() {
        let payload = json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "delta": {
                    "tool_calls": [{
                        "index": 0,
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "read_file", "arguments": ""}
                    }]
                },
                "finish_reason": null
            }]
        });
        let delta: StreamDelta = serde_json::from_value(payload).unwrap();
        let calls = delta.choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("call_abc"));
        assert_eq!(
            calls[0].function.as_ref().unwrap().name.as_deref(),
            Some("read_file")
        );
    }
}
