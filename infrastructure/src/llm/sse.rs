//! SSE line parser for the streaming chat-completions response.
//!
//! The endpoint sends `data:` lines, each carrying one JSON delta, closed
//! by the literal `data: [DONE]` sentinel:
//!
//! ```text
//! data: {"id":"...","choices":[{"delta":{"content":"Hel"},...}],...}
//!
//! data: {"id":"...","choices":[{"delta":{"content":"lo"},...}],...}
//!
//! data: [DONE]
//! ```

use crate::llm::wire::{StreamDelta, StreamDeltaUsage};
use broker_application::ports::llm_gateway::{GatewayError, StreamEvent, TokenUsage};

/// End-of-stream sentinel.
const DONE_SENTINEL: &str = "[DONE]";

/// Parse one SSE line into zero or more stream events.
///
/// Empty lines (event boundaries), comments, and non-`data:` fields
/// produce nothing. Malformed delta JSON is an error; callers skip the
/// line and keep reading.
pub fn parse_sse_line(line: &str) -> Result<Vec<StreamEvent>, GatewayError> {
    let line = line.trim_end();

    if line.is_empty() || line.starts_with(':') {
        return Ok(vec![]);
    }

    let Some(payload) = line.strip_prefix("data:") else {
        // event:, id:, retry: fields
        return Ok(vec![]);
    };
    let payload = payload.trim_start();

    if payload.is_empty() {
        return Ok(vec![]);
    }

    if payload == DONE_SENTINEL {
        return Ok(vec![StreamEvent::Done {
            finish_reason: None,
            usage: None,
        }]);
    }

    let delta: StreamDelta = serde_json::from_str(payload)
        .map_err(|e| GatewayError::InvalidResponse(format!("bad SSE delta: {e}")))?;

    Ok(delta_to_events(&delta))
}

fn delta_to_events(delta: &StreamDelta) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    if let Some(choice) = delta.choices.first() {
        if let Some(text) = &choice.delta.content {
            if !text.is_empty() {
                events.push(StreamEvent::TextDelta(text.clone()));
            }
        }

        if let Some(tool_calls) = &choice.delta.tool_calls {
            for tc in tool_calls {
                let (name, arguments) = match &tc.function {
                    Some(f) => (f.name.clone(), f.arguments.clone()),
                    None => (None, None),
                };
                events.push(StreamEvent::ToolCallDelta {
                    index: tc.index,
                    id: tc.id.clone(),
                    name,
                    arguments,
                });
            }
        }

        if let Some(reason) = &choice.finish_reason {
            events.push(StreamEvent::Done {
                finish_reason: Some(reason.clone()),
                usage: delta.usage.as_ref().map(usage),
            });
        }
    }

    events
}

fn usage(u: &StreamDeltaUsage) -> TokenUsage {
    TokenUsage {
        prompt_tokens: u.prompt_tokens.unwrap_or(0),
        completion_tokens: u.completion_tokens.unwrap_or(0),
        total_tokens: u.total_tokens.unwrap_or(0),
    }
}
