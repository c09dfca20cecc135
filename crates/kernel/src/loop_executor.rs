//! The Loop Executor (§4.5): drives LLM Processor iterations until
//! termination, enforcing cancellation and the termination hooks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agentkit_core::AgentConfig;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::KernelError;
use crate::event::{Event, EventPayload, EventStream, FinishReason, SystemLevel};
use crate::hooks::{AgentHooks, LoopEndContext, TerminationDecision};
use crate::llm_processor::LlmProcessor;
use crate::tool::ToolContext;
use crate::tool_processor::ToolProcessor;

/// A cooperative "please stop after the current iteration" flag, set by
/// `Agent::request_loop_termination` and consulted at the top of every
/// iteration.
#[derive(Debug, Default)]
pub struct TerminationRequest(AtomicBool);

impl TerminationRequest {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct LoopExecutor {
    events: Arc<EventStream>,
    llm_processor: Arc<LlmProcessor>,
    max_iterations: usize,
}

impl LoopExecutor {
    /// The Tool Processor itself is owned by the LLM Processor (which scopes
    /// the execution tool set per iteration); the Loop Executor only needs
    /// the Event Stream and the LLM Processor to drive iterations.
    pub fn new(events: Arc<EventStream>, llm_processor: Arc<LlmProcessor>, config: &AgentConfig) -> Self {
        Self { events, llm_processor, max_iterations: config.max_iterations }
    }

    fn abort_event(&self) -> Event {
        self.events.send(EventPayload::AssistantMessage {
            content: "Request was aborted".to_string(),
            raw_content: None,
            tool_calls: None,
            finish_reason: FinishReason::Abort,
            message_id: Uuid::new_v4().to_string(),
        })
    }

    /// Run the agent loop to completion, returning the final
    /// `assistant_message` event.
    pub async fn run(
        &self,
        session_id: &str,
        instructions: &str,
        context: &ToolContext,
        hooks: &dyn AgentHooks,
        termination: &TerminationRequest,
        cancel: CancellationToken,
    ) -> Result<Event, KernelError> {
        // The execution tool set is scoped per-iteration by the LLM
        // Processor (the resolved `onPrepareRequest` tool list, released via
        // its own guard when that iteration's call returns); nothing is held
        // across iteration boundaries here, so no loop-level guard is needed.

        let mut candidate_final: Option<Event> = None;

        for iteration in 1..=self.max_iterations {
            // 1. Cancellation.
            if cancel.is_cancelled() {
                return Ok(self.abort_event());
            }

            // 2. Explicit termination request.
            if termination.is_requested() {
                return Ok(self.events.send(EventPayload::AssistantMessage {
                    content: String::new(),
                    raw_content: None,
                    tool_calls: None,
                    finish_reason: FinishReason::Stop,
                    message_id: Uuid::new_v4().to_string(),
                }));
            }

            // 3. A prior iteration's final candidate must clear the
            // termination hook before the loop actually stops.
            if let Some(final_event) = &candidate_final {
                let (decision, message) = hooks.on_before_loop_termination(final_event).await;
                if decision == TerminationDecision::Finished {
                    return Ok(final_event.clone());
                }
                if let Some(message) = message {
                    self.events.send(EventPayload::System { level: SystemLevel::Info, message, details: None });
                }
                candidate_final = None;
            }

            hooks.on_each_agent_loop_start(session_id, iteration);

            // 4. Run one LLM Processor iteration.
            let result = self
                .llm_processor
                .run_iteration(session_id, iteration, instructions, context, hooks, cancel.clone())
                .await?;

            // A cancellation observed mid-iteration produces the single
            // synthetic abort event directly — no termination hook, no
            // `on_each_agent_loop_end`, no further iterations (spec §5 /
            // §8 Scenario 5: nothing else may be observable for this run).
            if result.aborted {
                return Ok(result.assistant_event);
            }

            // 5. No tool calls -> candidate final event.
            if !result.has_tool_calls {
                candidate_final = Some(result.assistant_event.clone());
            }

            // 6. Notify.
            hooks.on_each_agent_loop_end(LoopEndContext {
                session_id: session_id.to_string(),
                iteration,
                has_final_answer: candidate_final.is_some(),
                will_continue: candidate_final.is_none(),
                assistant_event: Some(result.assistant_event),
            });

            // A candidate final event that's already cleared hooks (no tool
            // calls, nothing more to dispatch) and this is the last
            // iteration slot ends the loop next time around step 3 — but if
            // we're already out of iterations, fall through to step 7.
        }

        // 7. Iteration limit reached. A candidate produced by the very last
        // iteration still has to clear the termination hook like any other
        // candidate (step 3) before it's accepted as the final answer.
        if let Some(final_event) = candidate_final {
            let (decision, message) = hooks.on_before_loop_termination(&final_event).await;
            if decision == TerminationDecision::Finished {
                return Ok(final_event);
            }
            if let Some(message) = message {
                self.events.send(EventPayload::System { level: SystemLevel::Info, message, details: None });
            }
        }

        self.events.send(EventPayload::System {
            level: SystemLevel::Warning,
            message: format!("reached max_iterations ({}) without a final answer", self.max_iterations),
            details: None,
        });
        Ok(self.events.send(EventPayload::AssistantMessage {
            content: String::new(),
            raw_content: None,
            tool_calls: None,
            finish_reason: FinishReason::MaxIterations,
            message_id: Uuid::new_v4().to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NativeEngine;
    use crate::hooks::DefaultHooks;
    use agentkit_llm::MockModelClient;

    fn executor(client: Arc<MockModelClient>) -> LoopExecutor {
        let events = Arc::new(EventStream::new());
        let tools = Arc::new(ToolProcessor::new(events.clone()));
        let engine: Arc<dyn crate::engine::ToolCallEngine> = Arc::new(NativeEngine);
        let config = AgentConfig::for_profile("");
        let llm_processor = Arc::new(LlmProcessor::new(events.clone(), engine, tools, client, config.clone()));
        LoopExecutor::new(events, llm_processor, &config)
    }

    #[tokio::test]
    async fn text_only_response_ends_loop_on_first_iteration() {
        let client = Arc::new(MockModelClient::new());
        client.queue_text("done");
        let executor = executor(client);
        let context = ToolContext { working_directory: std::env::temp_dir() };
        let hooks = DefaultHooks;
        let termination = TerminationRequest::default();

        let result = executor.run("s1", "Be helpful.", &context, &hooks, &termination, CancellationToken::new()).await.unwrap();

        let EventPayload::AssistantMessage { finish_reason, .. } = result.payload else { panic!("expected assistant_message") };
        assert_eq!(finish_reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_with_abort_reason() {
        let client = Arc::new(MockModelClient::new());
        client.queue_text("unused");
        let executor = executor(client);
        let context = ToolContext { working_directory: std::env::temp_dir() };
        let hooks = DefaultHooks;
        let termination = TerminationRequest::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = executor.run("s1", "Be helpful.", &context, &hooks, &termination, cancel).await.unwrap();

        let EventPayload::AssistantMessage { finish_reason, .. } = result.payload else { panic!("expected assistant_message") };
        assert_eq!(finish_reason, FinishReason::Abort);
    }
}
