//! Streaming OpenAI-compatible client.
//!
//! Works with any endpoint that accepts the OpenAI chat-completions
//! request format. Setup failures (auth, unknown model, rate limits)
//! surface from `stream`; everything after the HTTP response is delivered
//! through the stream handle, including mid-flight failures.

use crate::llm::sse::parse_sse_line;
use crate::llm::wire::WireChatRequest;
use async_trait::async_trait;
use broker_application::config::LlmEndpointConfig;
use broker_application::ports::llm_gateway::{
    CompletionRequest, GatewayError, LlmGateway, StreamEvent, StreamHandle,
};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct OpenAiClient {
    config: LlmEndpointConfig,
    http: reqwest::Client,
    api_key: Option<String>,
}

impl OpenAiClient {
    /// Create a client. The API key is resolved from the configured
    /// environment variable once; an absent variable means the endpoint is
    /// used unauthenticated, which local inference servers allow.
    pub fn new(config: LlmEndpointConfig) -> Self {
        let api_key = if config.api_key_env.is_empty() {
            None
        } else {
            match std::env::var(&config.api_key_env) {
                Ok(key) if !key.is_empty() => Some(key),
                _ => {
                    debug!(
                        env = %config.api_key_env,
                        "API key env var unset, proceeding unauthenticated"
                    );
                    None
                }
            }
        };
        Self {
            config,
            http: reqwest::Client::new(),
            api_key,
        }
    }

    pub fn with_api_key(config: LlmEndpointConfig, api_key: String) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            api_key: Some(api_key),
        }
    }

    fn completions_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl LlmGateway for OpenAiClient {
    async fn stream(&self, request: CompletionRequest) -> Result<StreamHandle, GatewayError> {
        let url = self.completions_url();
        let body = WireChatRequest::from(&request);

        debug!(
            model = %body.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "sending streaming chat completion request"
        );

        let mut http_request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream");
        if let Some(key) = &self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {key}"));
        }

        let response = http_request
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::RequestFailed(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => GatewayError::AuthFailed(body),
                404 => GatewayError::ModelNotFound(format!(
                    "model '{}': {body}",
                    request.settings.model
                )),
                429 => {
                    let retry_after_ms = parse_retry_after_ms(&body).unwrap_or(1000);
                    warn!(retry_after_ms, "rate limited");
                    GatewayError::RateLimited { retry_after_ms }
                }
                _ => GatewayError::RequestFailed(format!("HTTP {status}: {body}")),
            });
        }

        // Hand the byte stream to a task that parses SSE lines and feeds
        // the channel; dropping the receiver stops it.
        let (tx, rx) = mpsc::channel(64);
        let mut byte_stream = response.bytes_stream();
        tokio::spawn(async move {
            let mut buffer = String::new();

            while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::Error(GatewayError::RequestFailed(format!(
                                "stream read error: {e}"
                            ))))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].to_string();
                    buffer.drain(..=newline);

                    let events = match parse_sse_line(&line) {
                        Ok(events) => events,
                        Err(e) => {
                            warn!(error = %e, "skipping malformed SSE line");
                            continue;
                        }
                    };
                    for event in events {
                        if tx.send(event).await.is_err() {
                            debug!("stream receiver dropped, stopping");
                            return;
                        }
                    }
                }
            }

            // Flush whatever is left in the buffer.
            if !buffer.trim().is_empty() {
                if let Ok(events) = parse_sse_line(&buffer) {
                    for event in events {
                        let _ = tx.send(event).await;
                    }
                }
            }
        });

        Ok(StreamHandle { receiver: rx })
    }
}

/// Extract a retry-after hint from a rate-limit error body.
fn parse_retry_after_ms(body: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("retry_after_ms")
        .and_then(|v| v.as_u64())
        .or_else(|| {
            value
                .get("retry_after")
                .and_then(|v| v.as_f64())
                .map(|secs| (secs * 1000.0) as u64)
        })
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.config.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}
