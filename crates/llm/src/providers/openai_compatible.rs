//! [`ModelClient`] implementation for any OpenAI-compatible chat-completions
//! endpoint, built by widening a non-streaming request/response shape to a
//! `stream: true` SSE loop.

use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde_json::json;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::message::{ChatChunk, ChatRequest};
use crate::provider::{BoxStream, LlmError, ModelClient};

pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiCompatibleClient {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.into(),
        }
    }

    pub fn with_default_base_url(api_key: Option<String>) -> Self {
        Self::new(api_key, "https://api.openai.com")
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatibleClient {
    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<ChatChunk, LlmError>>, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": true,
        });
        if let Some(tools) = &request.tools {
            body["tools"] = json!(tools);
        }
        if let Some(stop) = &request.stop {
            body["stop"] = json!(stop);
        }
        if let Some(stop_sequences) = &request.stop_sequences {
            body["stop_sequences"] = json!(stop_sequences);
        }

        debug!(model = %request.model, url = %url, "starting chat streaming request");

        let mut req = self.client.post(&url).header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body_text = response.text().await.unwrap_or_default();
            if status == 401 {
                return Err(LlmError::AuthError);
            }
            if status == 429 {
                let retry_after = serde_json::from_str::<serde_json::Value>(&body_text)
                    .ok()
                    .and_then(|v| v["error"]["retry_after_secs"].as_u64())
                    .unwrap_or(30);
                return Err(LlmError::RateLimited { retry_after_secs: retry_after });
            }
            return Err(LlmError::ApiError { status, message: body_text });
        }

        type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

        struct State {
            bytes: ByteStream,
            buffer: String,
            cancel: CancellationToken,
            done: bool,
        }

        let state = State {
            bytes: Box::pin(response.bytes_stream()),
            buffer: String::new(),
            cancel,
            done: false,
        };

        let event_stream = stream::unfold(state, move |mut state| async move {
            use futures::StreamExt;
            loop {
                if state.done {
                    return None;
                }

                // A complete `data: ...` line may already be sitting in the buffer
                // from a previous read; drain all fully-buffered lines first.
                if let Some(newline_pos) = state.buffer.find('\n') {
                    let line = state.buffer[..newline_pos].trim_end_matches('\r').to_string();
                    state.buffer.drain(..=newline_pos);

                    if line.is_empty() {
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        state.done = true;
                        return None;
                    }
                    return match serde_json::from_str::<ChatChunk>(data) {
                        Ok(chunk) => Some((Ok(chunk), state)),
                        Err(e) => Some((
                            Err(LlmError::InvalidResponse(format!("malformed chat chunk: {e}"))),
                            state,
                        )),
                    };
                }

                tokio::select! {
                    _ = state.cancel.cancelled() => {
                        state.done = true;
                        return Some((Err(LlmError::Cancelled), state));
                    }
                    next = state.bytes.next() => {
                        match next {
                            Some(Ok(chunk)) => {
                                let text = String::from_utf8_lossy(&chunk);
                                state.buffer.push_str(&text);
                            }
                            Some(Err(e)) => {
                                state.done = true;
                                return Some((Err(LlmError::StreamError(e.to_string())), state));
                            }
                            None => {
                                state.done = true;
                                return None;
                            }
                        }
                    }
                }
            }
        });

        Ok(Box::pin(event_stream))
    }

    fn client_name(&self) -> &str {
        "openai-compatible"
    }
}
