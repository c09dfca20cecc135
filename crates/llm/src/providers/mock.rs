//! Hand-rolled test double for [`ModelClient`], queue-of-responses style.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::message::{ChatChoiceDelta, ChatChunk, ChatDelta, ChatRequest, FunctionCallDelta, ToolCallDelta};
use crate::provider::{BoxStream, LlmError, ModelClient};

/// Queues whole responses (each a `Vec<ChatChunk>`) and hands one out per
/// `stream_chat` call, in the order they were queued. Defaults to a single
/// empty "stop" chunk when the queue is empty, so a forgotten queue fails a
/// test loudly rather than hanging. Every queued chunk is handed out behind a
/// real `.await` point and a cancellation check, so a token cancelled while a
/// consumer is mid-stream actually interrupts delivery instead of the mock
/// draining its whole queue synchronously in one poll.
#[derive(Default)]
pub struct MockModelClient {
    responses: Mutex<VecDeque<Vec<Result<ChatChunk, LlmError>>>>,
    channel_responses: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<ChatChunk, LlmError>>>>,
}

impl MockModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_response(&self, chunks: Vec<Result<ChatChunk, LlmError>>) {
        self.responses.lock().unwrap().push_back(chunks);
    }

    /// Queue a response that fails outright, simulating a provider error
    /// reaching the kernel mid-stream.
    pub fn queue_error(&self, error: LlmError) {
        self.queue_response(vec![Err(error)]);
    }

    /// Queue a plain-text assistant reply that ends the turn.
    pub fn queue_text(&self, text: impl Into<String>) {
        self.queue_response(vec![
            Ok(ChatChunk {
                choices: vec![ChatChoiceDelta {
                    delta: ChatDelta { content: Some(text.into()), ..Default::default() },
                    finish_reason: None,
                }],
                usage: None,
            }),
            Ok(ChatChunk {
                choices: vec![ChatChoiceDelta {
                    delta: ChatDelta::default(),
                    finish_reason: Some("stop".to_string()),
                }],
                usage: None,
            }),
        ]);
    }

    /// Queue a single native tool call, delivered as one id/name chunk
    /// followed by one arguments chunk and a `tool_calls` finish reason.
    pub fn queue_tool_call(&self, id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) {
        let id = id.into();
        self.queue_response(vec![
            Ok(ChatChunk {
                choices: vec![ChatChoiceDelta {
                    delta: ChatDelta {
                        tool_calls: Some(vec![ToolCallDelta {
                            index: 0,
                            id: Some(id),
                            kind: Some("function".to_string()),
                            function: Some(FunctionCallDelta { name: Some(name.into()), arguments: None }),
                        }]),
                        ..Default::default()
                    },
                    finish_reason: None,
                }],
                usage: None,
            }),
            Ok(ChatChunk {
                choices: vec![ChatChoiceDelta {
                    delta: ChatDelta {
                        tool_calls: Some(vec![ToolCallDelta {
                            index: 0,
                            id: None,
                            kind: None,
                            function: Some(FunctionCallDelta { name: None, arguments: Some(arguments.into()) }),
                        }]),
                        ..Default::default()
                    },
                    finish_reason: None,
                }],
                usage: None,
            }),
            Ok(ChatChunk {
                choices: vec![ChatChoiceDelta {
                    delta: ChatDelta::default(),
                    finish_reason: Some("tool_calls".to_string()),
                }],
                usage: None,
            }),
        ]);
    }

    /// Queue a response delivered chunk-by-chunk over a channel the caller
    /// drives directly, for tests that need to interleave a cancellation
    /// between specific chunks rather than handing over a fixed `Vec` up
    /// front. Returns the sending half; the stream ends once it's dropped
    /// (or the consumer is cancelled, whichever comes first).
    pub fn queue_channel_response(&self) -> mpsc::UnboundedSender<Result<ChatChunk, LlmError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channel_responses.lock().unwrap().push_back(rx);
        tx
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn stream_chat(
        &self,
        _request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<ChatChunk, LlmError>>, LlmError> {
        if let Some(rx) = self.channel_responses.lock().unwrap().pop_front() {
            let stream = stream::unfold((rx, cancel), |(mut rx, cancel)| async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    msg = rx.recv() => msg.map(|m| (m, (rx, cancel))),
                }
            });
            return Ok(Box::pin(stream));
        }

        let chunks = self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
            vec![Ok(ChatChunk {
                choices: vec![ChatChoiceDelta { delta: ChatDelta::default(), finish_reason: Some("stop".to_string()) }],
                usage: None,
            })]
        });
        let stream = stream::unfold((VecDeque::from(chunks), cancel), |(mut chunks, cancel)| async move {
            // A real await point between every chunk: a token cancelled by
            // another task while this stream is being drained is observed
            // here instead of the whole queue flushing synchronously.
            tokio::task::yield_now().await;
            if cancel.is_cancelled() {
                return None;
            }
            let next = chunks.pop_front()?;
            Some((next, (chunks, cancel)))
        });
        Ok(Box::pin(stream))
    }

    fn client_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn queued_text_response_ends_turn() {
        let mock = MockModelClient::new();
        mock.queue_text("hello");

        let request = ChatRequest::new("mock", vec![], 0.0, 16);
        let mut stream = mock.stream_chat(request, CancellationToken::new()).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.first_choice().unwrap().delta.content.as_deref(), Some("hello"));
        // `ChatDelta.content` (streaming deltas) stays a plain `Option<String>` —
        // only `ChatMessage.content` (history) needs the structured shape.

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.first_choice().unwrap().finish_reason.as_deref(), Some("stop"));

        assert!(stream.next().await.is_none());
    }
}
