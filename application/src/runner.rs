//! Prompt Runner
//!
//! Drives one prompt through the model: stream text out as
//! `agent_message_chunk` updates, buffer tool-call deltas until complete,
//! execute the calls through the session toolset, feed results back, and
//! loop until the model produces a terminal message or one of the
//! terminal conditions fires.
//!
//! ```text
//! IDLE -> GENERATING -(text)-> GENERATING
//!                   |-(tool calls complete)-> EXECUTING_TOOLS -> GENERATING
//!                   |-(terminal assistant)-> DONE(end_turn)
//!                   |-(cancel)-> DONE(cancelled)
//!                   |-(limit)-> DONE(tool_use_limit)
//!                   `-(error after retries)-> DONE(error)
//! ```

use crate::ports::client_port::{ClientError, ClientPort};
use crate::ports::llm_gateway::{
    ChatMessage, CompletionRequest, GatewayError, LlmGateway, StreamEvent, ToolCallRequest,
};
use crate::registry::Session;
use crate::toolset::InvokeDeps;
use crate::tracker::ToolTracker;
use broker_domain::{ContentBlock, SessionUpdate, StopReason};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const BACKOFF_BASE_MS: u64 = 500;

/// Everything a prompt execution needs, assembled by the agent adapter.
pub struct PromptDeps {
    pub session: Arc<Session>,
    pub client: Arc<dyn ClientPort>,
    pub tracker: Arc<ToolTracker>,
    pub cancel: CancellationToken,
}

/// Runs prompts against the upstream model.
pub struct PromptRunner {
    gateway: Arc<dyn LlmGateway>,
}

/// What one streamed request produced.
enum TurnOutcome {
    Completed {
        text: String,
        calls: Vec<ToolCallRequest>,
    },
    Cancelled,
    Disconnected,
    Failed(GatewayError),
}

/// What consuming one stream produced.
enum ConsumeOutcome {
    Finished {
        text: String,
        calls: Vec<ToolCallRequest>,
    },
    Cancelled,
    Disconnected,
    Upstream(GatewayError),
}

impl PromptRunner {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }

    /// Run one prompt to completion and return its stop reason.
    ///
    /// Tool failures stay inside the conversation; only upstream
    /// exhaustion, cancellation, and the turn budget end the prompt
    /// early. On every early exit, in-flight tool calls are driven to a
    /// terminal `failed` update first.
    pub async fn run(&self, deps: &PromptDeps, blocks: Vec<ContentBlock>) -> StopReason {
        let settings = deps.session.profile.settings.clone();
        let tools = deps.session.toolset.function_definitions();

        let mut messages = vec![
            ChatMessage::system(&deps.session.profile.instructions),
            ChatMessage::user(render_blocks(&blocks)),
        ];

        let mut tool_turns = 0u32;
        let mut output_retries_left = settings.output_retries;

        loop {
            if deps.cancel.is_cancelled() {
                deps.tracker.fail_outstanding("cancelled").await;
                return StopReason::Cancelled;
            }

            let request = CompletionRequest {
                messages: messages.clone(),
                tools: tools.clone(),
                settings: settings.clone(),
            };

            let outcome = self.stream_turn(request, deps, settings.retries).await;

            let (text, calls) = match outcome {
                TurnOutcome::Completed { text, calls } => (text, calls),
                TurnOutcome::Cancelled => {
                    deps.tracker.fail_outstanding("cancelled").await;
                    return StopReason::Cancelled;
                }
                TurnOutcome::Disconnected => {
                    deps.tracker.fail_outstanding("connection closed").await;
                    return StopReason::Cancelled;
                }
                TurnOutcome::Failed(e) => {
                    warn!(error = %e, "upstream model failed after retries");
                    self.send_chunk(deps, format!("The model request failed: {e}"))
                        .await;
                    return StopReason::Error;
                }
            };

            if calls.is_empty() {
                if text.trim().is_empty() {
                    if output_retries_left > 0 {
                        output_retries_left -= 1;
                        debug!("model produced an empty message, retrying generation");
                        continue;
                    }
                    self.send_chunk(deps, "The model returned an empty response.".to_string())
                        .await;
                    return StopReason::Error;
                }
                return StopReason::EndTurn;
            }

            tool_turns += 1;
            if tool_turns > settings.max_tool_turns {
                warn!(
                    max_tool_turns = settings.max_tool_turns,
                    "tool turn budget exhausted"
                );
                deps.tracker.fail_outstanding("tool use limit").await;
                return StopReason::ToolUseLimit;
            }

            messages.push(ChatMessage::assistant_tool_calls(text, calls.clone()));

            // Execute the pause's calls in parallel; each invocation owns
            // its tracker lifecycle.
            let invoke_deps = InvokeDeps {
                session_id: &deps.session.id,
                client: &deps.client,
                tracker: &deps.tracker,
                cancel: &deps.cancel,
            };
            let executions = futures::future::join_all(calls.iter().map(|call| {
                deps.session
                    .toolset
                    .invoke_raw(&call.id, &call.name, &call.arguments, &invoke_deps)
            }));

            let results = tokio::select! {
                biased;
                _ = deps.cancel.cancelled() => {
                    deps.tracker.fail_outstanding("cancelled").await;
                    return StopReason::Cancelled;
                }
                results = executions => results,
            };

            for (call, result) in calls.iter().zip(results) {
                messages.push(ChatMessage::tool_result(
                    &call.id,
                    result.to_message_content(),
                ));
            }
        }
    }

    /// Issue one streaming request, retrying transient upstream failures
    /// with exponential backoff.
    async fn stream_turn(
        &self,
        request: CompletionRequest,
        deps: &PromptDeps,
        retries: u32,
    ) -> TurnOutcome {
        let mut attempt = 0u32;
        loop {
            if deps.cancel.is_cancelled() {
                return TurnOutcome::Cancelled;
            }

            let handle = match self.gateway.stream(request.clone()).await {
                Ok(handle) => handle,
                Err(e) if e.is_transient() && attempt < retries => {
                    attempt += 1;
                    self.backoff(attempt, &e).await;
                    continue;
                }
                Err(e) => return TurnOutcome::Failed(e),
            };

            match self.consume(handle.receiver, deps).await {
                ConsumeOutcome::Finished { text, calls } => {
                    return TurnOutcome::Completed { text, calls };
                }
                ConsumeOutcome::Cancelled => return TurnOutcome::Cancelled,
                ConsumeOutcome::Disconnected => return TurnOutcome::Disconnected,
                ConsumeOutcome::Upstream(e) if e.is_transient() && attempt < retries => {
                    attempt += 1;
                    self.backoff(attempt, &e).await;
                }
                ConsumeOutcome::Upstream(e) => return TurnOutcome::Failed(e),
            }
        }
    }

    /// Drain one stream, forwarding text chunks and accumulating tool-call
    /// deltas until their arguments are complete.
    async fn consume(
        &self,
        mut receiver: tokio::sync::mpsc::Receiver<StreamEvent>,
        deps: &PromptDeps,
    ) -> ConsumeOutcome {
        let mut text = String::new();
        let mut accumulator = ToolCallAccumulator::default();

        loop {
            let event = tokio::select! {
                biased;
                _ = deps.cancel.cancelled() => return ConsumeOutcome::Cancelled,
                event = receiver.recv() => event,
            };

            match event {
                Some(StreamEvent::TextDelta(chunk)) => {
                    match deps
                        .client
                        .session_update(&deps.session.id, SessionUpdate::message_chunk(&chunk))
                        .await
                    {
                        Ok(()) => {}
                        Err(ClientError::ConnectionClosed) => {
                            return ConsumeOutcome::Disconnected;
                        }
                        Err(e) => {
                            debug!(error = %e, "failed to stream message chunk");
                        }
                    }
                    text.push_str(&chunk);
                }
                Some(StreamEvent::ToolCallDelta {
                    index,
                    id,
                    name,
                    arguments,
                }) => {
                    accumulator.apply(index, id, name, arguments);
                }
                Some(StreamEvent::Done {
                    finish_reason,
                    usage,
                }) => {
                    if let Some(usage) = usage {
                        debug!(
                            prompt_tokens = usage.prompt_tokens,
                            completion_tokens = usage.completion_tokens,
                            "usage reported"
                        );
                    }
                    if let Some(reason) = finish_reason {
                        debug!(finish_reason = %reason, "generation stopped");
                        break;
                    }
                    // A bare Done is the trailing sentinel; the channel
                    // will close right after.
                }
                Some(StreamEvent::Error(e)) => return ConsumeOutcome::Upstream(e),
                None => break,
            }
        }

        ConsumeOutcome::Finished {
            text,
            calls: accumulator.finish(&deps.tracker),
        }
    }

    async fn backoff(&self, attempt: u32, error: &GatewayError) {
        let delay = match error {
            GatewayError::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => BACKOFF_BASE_MS * (1 << (attempt - 1).min(6)),
        };
        debug!(attempt, delay_ms = delay, error = %error, "retrying upstream request");
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    /// Best-effort diagnostic chunk; failures are expected when the caller
    /// is already gone.
    async fn send_chunk(&self, deps: &PromptDeps, text: String) {
        let _ = deps
            .client
            .session_update(&deps.session.id, SessionUpdate::message_chunk(text))
            .await;
    }
}

/// Buffers tool-call deltas until the model finishes declaring them.
#[derive(Default)]
struct ToolCallAccumulator {
    calls: BTreeMap<usize, PendingCall>,
}

#[derive(Default)]
struct PendingCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAccumulator {
    fn apply(
        &mut self,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) {
        let call = self.calls.entry(index).or_default();
        if let Some(id) = id {
            call.id = Some(id);
        }
        if let Some(name) = name {
            // Some endpoints re-send the name on later deltas; first wins.
            call.name.get_or_insert(name);
        }
        if let Some(fragment) = arguments {
            call.arguments.push_str(&fragment);
        }
    }

    /// Produce completed calls in index order. Calls without a name are
    /// dropped with a warning; calls without an id get one allocated so
    /// the tracker can pair start and terminal updates.
    fn finish(self, tracker: &ToolTracker) -> Vec<ToolCallRequest> {
        self.calls
            .into_values()
            .filter_map(|call| {
                let Some(name) = call.name else {
                    warn!("dropping tool call delta without a name");
                    return None;
                };
                Some(ToolCallRequest {
                    id: call.id.unwrap_or_else(|| tracker.allocate_id()),
                    name,
                    arguments: call.arguments,
                })
            })
            .collect()
    }
}

/// Flatten prompt blocks into the user message.
fn render_blocks(blocks: &[ContentBlock]) -> String {
    let mut parts = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(text.clone()),
            ContentBlock::Image {
                uri, mime_type, ..
            } => {
                let label = uri
                    .clone()
                    .or_else(|| mime_type.clone())
                    .unwrap_or_else(|| "attached".to_string());
                parts.push(format!("[image: {label}]"));
            }
        }
    }
    parts.join("\n")
}
