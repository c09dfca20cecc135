//! The LLM Processor (§4.3): runs one request/stream/dispatch iteration
//! against the injected model client.

use std::sync::Arc;
use std::time::Instant;

use agentkit_core::AgentConfig;
use agentkit_llm::message::ChatRequest;
use agentkit_llm::ModelClient;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::engine::ToolCallEngine;
use crate::error::KernelError;
use crate::event::{Event, EventPayload, EventStream, SystemLevel};
use crate::hooks::{AgentHooks, PrepareRequestContext};
use crate::message_history::MessageHistoryBuilder;
use crate::tool::ToolContext;
use crate::tool_processor::ToolProcessor;

/// Outcome of one LLM Processor iteration, handed back to the Loop Executor.
pub struct IterationResult {
    pub assistant_event: Event,
    pub has_tool_calls: bool,
    /// Set when this iteration ended because `cancel` fired mid-stream
    /// (spec §5 / §8 Scenario 5). The Loop Executor must treat
    /// `assistant_event` as the run's one and only output in that case —
    /// no further hooks, no further iterations.
    pub aborted: bool,
}

pub struct LlmProcessor {
    events: Arc<EventStream>,
    engine: Arc<dyn ToolCallEngine>,
    tools: Arc<ToolProcessor>,
    client: Arc<dyn ModelClient>,
    config: AgentConfig,
}

impl LlmProcessor {
    pub fn new(
        events: Arc<EventStream>,
        engine: Arc<dyn ToolCallEngine>,
        tools: Arc<ToolProcessor>,
        client: Arc<dyn ModelClient>,
        config: AgentConfig,
    ) -> Self {
        Self { events, engine, tools, client, config }
    }

    pub async fn run_iteration(
        &self,
        session_id: &str,
        iteration: usize,
        instructions: &str,
        context: &ToolContext,
        hooks: &dyn AgentHooks,
        cancel: CancellationToken,
    ) -> Result<IterationResult, KernelError> {
        hooks.on_llm_request(session_id, iteration);

        // 1. onPrepareRequest may rewrite instructions/tools for this
        // iteration only.
        let prepared = hooks
            .on_prepare_request(PrepareRequestContext {
                instructions: instructions.to_string(),
                tools: self.tools.active_tools(),
                iteration,
            })
            .await;

        // The hook's returned tool list becomes the execution tool set for
        // this iteration only (spec §4.2/§4.4): installed here, released by
        // the guard's `Drop` when this function returns by any path.
        let _execution_tools_guard = self.tools.set_execution_tools(prepared.tools.clone());

        // 2. Build the message history from the event log, dialect-aware.
        let events_snapshot = self.events.get_events();
        let history_builder = MessageHistoryBuilder::new(self.engine.as_ref(), self.config.max_images);
        let messages = history_builder.build(&prepared.instructions, &prepared.tools, &events_snapshot);

        // 3. Engine-shape the request and invoke the model client.
        let mut request = ChatRequest::new(self.config.model.clone(), messages, self.config.temperature, self.config.max_tokens);
        self.engine.prepare_request(&mut request, &prepared.tools);

        // A provider error that reaches the kernel never aborts the loop: it
        // becomes a `system` error event plus a final `assistant_message`
        // with `finishReason:'stop'`, exactly like a normal no-tool-call
        // turn (spec §7). Only the concurrency/disposed/abort errors are
        // allowed to propagate out of `run`.
        let mut stream = match self.client.stream_chat(request, cancel.clone()).await {
            Ok(stream) => stream,
            Err(agentkit_llm::LlmError::Cancelled) => return Ok(self.aborted_result()),
            Err(e) => return Ok(self.provider_error_result(session_id, &e.to_string(), hooks)),
        };

        // 4. Drive the engine's streaming state machine.
        let message_id = Uuid::new_v4().to_string();
        let mut state = self.engine.init_stream_state();
        let mut text = String::new();
        let mut thinking = String::new();
        let mut thinking_span: Option<(Instant, Instant)> = None;
        let mut finish_reason_raw: Option<String> = None;

        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                break;
            }
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(agentkit_llm::LlmError::Cancelled) => return Ok(self.aborted_result()),
                Err(e) => return Ok(self.provider_error_result(session_id, &e.to_string(), hooks)),
            };
            let Some(choice) = chunk.first_choice() else { continue };
            if choice.finish_reason.is_some() {
                finish_reason_raw = choice.finish_reason.clone();
            }

            let batch = self.engine.process_chunk(&mut state, &choice.delta, choice.finish_reason.as_deref());
            if batch.is_empty() {
                continue;
            }

            if let Some(delta) = &batch.text {
                text.push_str(delta);
                let event = self.events.send(EventPayload::AssistantStreamingMessage {
                    content: delta.clone(),
                    message_id: message_id.clone(),
                    is_complete: false,
                });
                hooks.on_llm_streaming_response(session_id, &event);
            }
            if let Some(delta) = &batch.thinking {
                let now = Instant::now();
                thinking_span = Some(match thinking_span {
                    Some((start, _)) => (start, now),
                    None => (now, now),
                });
                thinking.push_str(delta);
                let event = self.events.send(EventPayload::AssistantStreamingThinkingMessage {
                    content: delta.clone(),
                    message_id: message_id.clone(),
                    is_complete: false,
                });
                hooks.on_llm_streaming_response(session_id, &event);
            }
            for update in &batch.tool_calls {
                let event = self.events.send(EventPayload::AssistantStreamingToolCall {
                    tool_call_id: update.tool_call_id.clone(),
                    tool_name: update.tool_name.clone(),
                    arguments_delta: update.arguments_delta.clone(),
                    is_complete: update.is_complete,
                });
                hooks.on_llm_streaming_response(session_id, &event);
            }
        }

        // The streaming loop above can end either because the provider
        // stream completed or because `break` fired on a cancellation
        // observed between chunks; either way, a cancelled token means the
        // only event this iteration may still produce is the synthetic
        // abort message (spec §5 / §8 Scenario 5) — never a normal
        // finalize of whatever partial content/tool calls were collected.
        if cancel.is_cancelled() {
            return Ok(self.aborted_result());
        }

        if !text.is_empty() {
            self.events.send(EventPayload::AssistantStreamingMessage { content: String::new(), message_id: message_id.clone(), is_complete: true });
        }
        if !thinking.is_empty() {
            self.events.send(EventPayload::AssistantStreamingThinkingMessage { content: String::new(), message_id: message_id.clone(), is_complete: true });
        }

        // 5. Finalize — the single source of truth for content/tool calls.
        let finalized = self.engine.finalize(state, finish_reason_raw.as_deref());
        for warning in &finalized.warnings {
            self.events.send(EventPayload::System {
                level: if warning.is_error { SystemLevel::Error } else { SystemLevel::Warning },
                message: warning.message.clone(),
                details: None,
            });
        }

        let content = if finalized.content.is_empty() { text.clone() } else { finalized.content.clone() };
        let assistant_event = self.events.send(EventPayload::AssistantMessage {
            content,
            raw_content: finalized.raw_content.clone(),
            tool_calls: if finalized.tool_calls.is_empty() { None } else { Some(finalized.tool_calls.clone()) },
            finish_reason: finalized.finish_reason,
            message_id: message_id.clone(),
        });
        hooks.on_llm_response(session_id, &assistant_event);

        if !thinking.is_empty() {
            // `thinkingDurationMs` is only ever known in streaming mode,
            // where deltas carry their own timestamps; here it's the
            // wall-clock span between the first and last thinking delta.
            let thinking_duration_ms = thinking_span.map(|(start, end)| end.duration_since(start).as_millis() as u64);
            let thinking_event = self.events.send(EventPayload::AssistantThinkingMessage { content: thinking.clone(), thinking_duration_ms });
            hooks.on_llm_response(session_id, &thinking_event);
        }

        // 6. Dispatch tool calls, or let the caller treat this as a final answer.
        let has_tool_calls = !finalized.tool_calls.is_empty();
        if has_tool_calls {
            self.tools.process_tool_calls(&finalized.tool_calls, session_id, context, hooks, cancel).await;
        }

        Ok(IterationResult { assistant_event, has_tool_calls, aborted: false })
    }

    /// §7 "Provider error": emits a `system` error event plus a final
    /// `assistant_message(finishReason:'stop')` carrying a human-readable
    /// summary, and reports it as a no-tool-calls (final-answer) iteration
    /// so the Loop Executor treats it like any other natural completion.
    fn provider_error_result(&self, session_id: &str, message: &str, hooks: &dyn AgentHooks) -> IterationResult {
        self.events.send(EventPayload::System { level: SystemLevel::Error, message: format!("model provider error: {message}"), details: None });
        let assistant_event = self.events.send(EventPayload::AssistantMessage {
            content: format!("The request failed: {message}"),
            raw_content: None,
            tool_calls: None,
            finish_reason: crate::event::FinishReason::Stop,
            message_id: Uuid::new_v4().to_string(),
        });
        hooks.on_llm_response(session_id, &assistant_event);
        IterationResult { assistant_event, has_tool_calls: false, aborted: false }
    }

    /// spec §5 / §8 Scenario 5: the single synthetic event a mid-stream
    /// cancellation may ever produce. No hook is consulted here — once
    /// `cancel` has fired, nothing but this event is observable for the run.
    fn aborted_result(&self) -> IterationResult {
        let assistant_event = self.events.send(EventPayload::AssistantMessage {
            content: "Request was aborted".to_string(),
            raw_content: None,
            tool_calls: None,
            finish_reason: crate::event::FinishReason::Abort,
            message_id: Uuid::new_v4().to_string(),
        });
        IterationResult { assistant_event, has_tool_calls: false, aborted: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NativeEngine;
    use crate::event::EventPayload;
    use crate::hooks::DefaultHooks;
    use crate::tool::EchoTool;
    use agentkit_llm::MockModelClient;

    fn processor(client: Arc<MockModelClient>) -> (LlmProcessor, Arc<ToolProcessor>) {
        let events = Arc::new(EventStream::new());
        let tools = Arc::new(ToolProcessor::new(events.clone()));
        tools.register(Arc::new(EchoTool));
        let engine: Arc<dyn ToolCallEngine> = Arc::new(NativeEngine);
        let config = AgentConfig::for_profile("");
        let processor = LlmProcessor::new(events, engine, tools.clone(), client, config);
        (processor, tools)
    }

    #[tokio::test]
    async fn text_only_response_yields_final_answer() {
        let client = Arc::new(MockModelClient::new());
        client.queue_text("hello there");
        let (processor, _tools) = processor(client);
        let context = ToolContext { working_directory: std::env::temp_dir() };
        let hooks = DefaultHooks;

        let result = processor
            .run_iteration("s1", 0, "Be helpful.", &context, &hooks, CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.has_tool_calls);
        let EventPayload::AssistantMessage { content, .. } = &result.assistant_event.payload else { panic!("expected assistant_message") };
        assert_eq!(content, "hello there");
    }

    /// A hook that narrows the tool set to nothing, for exercising the
    /// iteration-scoped execution tool set (spec §4.2 step 1 / §4.4).
    struct NoToolsHook;

    #[async_trait::async_trait]
    impl AgentHooks for NoToolsHook {
        async fn on_prepare_request(&self, ctx: crate::hooks::PrepareRequestContext) -> crate::hooks::PreparedRequest {
            crate::hooks::PreparedRequest { instructions: ctx.instructions, tools: Vec::new() }
        }
    }

    #[tokio::test]
    async fn on_prepare_request_tool_list_becomes_the_scoped_execution_set() {
        let client = Arc::new(MockModelClient::new());
        client.queue_text("hi");
        let (processor, tools) = processor(client);
        assert_eq!(tools.all_tools().len(), 1, "echo is registered on the full registry");

        let context = ToolContext { working_directory: std::env::temp_dir() };
        let hooks = NoToolsHook;

        processor.run_iteration("s1", 0, "Be helpful.", &context, &hooks, CancellationToken::new()).await.unwrap();

        // The guard installed for that iteration is released once
        // `run_iteration` returns: the registry is back to its full set.
        assert_eq!(tools.active_tools().len(), 1);
    }

    #[tokio::test]
    async fn provider_error_becomes_a_system_event_and_final_answer_not_a_propagated_error() {
        let client = Arc::new(MockModelClient::new());
        client.queue_error(agentkit_llm::LlmError::NetworkError("connection reset".to_string()));
        let (processor, _tools) = processor(client);
        let context = ToolContext { working_directory: std::env::temp_dir() };
        let hooks = DefaultHooks;

        let result = processor
            .run_iteration("s1", 0, "Be helpful.", &context, &hooks, CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.has_tool_calls);
        let EventPayload::AssistantMessage { finish_reason, .. } = &result.assistant_event.payload else { panic!("expected assistant_message") };
        assert_eq!(*finish_reason, crate::event::FinishReason::Stop);

        let events = processor.events.get_events();
        assert!(events.iter().any(|e| matches!(&e.payload, EventPayload::System { level: SystemLevel::Error, .. })));
    }

    #[tokio::test]
    async fn tool_call_response_dispatches_and_emits_results() {
        let client = Arc::new(MockModelClient::new());
        client.queue_tool_call("call_1", "echo", r#"{"message":"hi"}"#);
        let (processor, _tools) = processor(client);
        let context = ToolContext { working_directory: std::env::temp_dir() };
        let hooks = DefaultHooks;

        let result = processor
            .run_iteration("s1", 0, "Be helpful.", &context, &hooks, CancellationToken::new())
            .await
            .unwrap();

        assert!(result.has_tool_calls);
        let events = processor.events.get_events();
        assert!(events.iter().any(|e| e.type_name() == "tool_call"));
        assert!(events.iter().any(|e| e.type_name() == "tool_result"));
    }

    /// spec §8 Scenario 5, literally: deltas land on the stream, then the
    /// consumer calls abort mid-stream — not before `run` ever starts. Chunks
    /// are delivered over a channel the test drives directly, so cancellation
    /// genuinely interleaves with in-flight streaming instead of being set
    /// before the first poll.
    #[tokio::test]
    async fn mid_stream_cancellation_yields_single_abort_event_and_stops_further_deltas() {
        let client = Arc::new(MockModelClient::new());
        let tx = client.queue_channel_response();
        let (processor, _tools) = processor(client);
        let processor = Arc::new(processor);
        let cancel = CancellationToken::new();

        let run_processor = processor.clone();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let context = ToolContext { working_directory: std::env::temp_dir() };
            let hooks = DefaultHooks;
            run_processor.run_iteration("s1", 0, "Be helpful.", &context, &hooks, run_cancel).await
        });

        // Five assistant deltas, per the scenario's own wording.
        for i in 0..5 {
            tx.send(Ok(agentkit_llm::message::ChatChunk {
                choices: vec![agentkit_llm::message::ChatChoiceDelta {
                    delta: agentkit_llm::message::ChatDelta { content: Some(format!("chunk{i} ")), ..Default::default() },
                    finish_reason: None,
                }],
                usage: None,
            }))
            .unwrap();
            tokio::task::yield_now().await;
        }

        // The consumer aborts mid-stream; nothing further is ever sent.
        cancel.cancel();
        drop(tx);

        let result = handle.await.unwrap().unwrap();

        assert!(result.aborted);
        assert!(!result.has_tool_calls);
        let EventPayload::AssistantMessage { content, finish_reason, .. } = &result.assistant_event.payload else {
            panic!("expected assistant_message")
        };
        assert_eq!(content, "Request was aborted");
        assert_eq!(*finish_reason, crate::event::FinishReason::Abort);

        let events = processor.events.get_events();
        let assistant_messages = events.iter().filter(|e| e.type_name() == "assistant_message").count();
        assert_eq!(assistant_messages, 1, "exactly one assistant_message may land in the log for an aborted run");
        assert!(
            events.iter().any(|e| e.type_name() == "assistant_streaming_message"),
            "deltas sent before abort() was called should still have been observed"
        );
    }
}
