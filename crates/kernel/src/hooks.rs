//! Overridable agent hooks (§6). Every method has a pass-through default so
//! a caller only implements the ones it cares about.

use async_trait::async_trait;
use serde_json::Value;

use crate::event::Event;
use crate::tool::{MultimodalContent, ToolCall, ToolDefinition, ToolError};

/// Input to `onPrepareRequest`: the instructions and tool set in effect
/// before this iteration, plus the iteration number.
#[derive(Debug, Clone)]
pub struct PrepareRequestContext {
    pub instructions: String,
    pub tools: Vec<ToolDefinition>,
    pub iteration: usize,
}

/// What `onPrepareRequest` may rewrite: instructions and/or the execution
/// tool set for this iteration only.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub instructions: String,
    pub tools: Vec<ToolDefinition>,
}

/// A prebuilt tool-call outcome a hook may substitute for real execution,
/// used by tests that want to skip actual tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCallOutcome {
    pub tool_call_id: String,
    pub content: MultimodalContent,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationDecision {
    Finished,
    Continue,
}

#[derive(Debug, Clone)]
pub struct LoopEndContext {
    pub session_id: String,
    pub iteration: usize,
    pub has_final_answer: bool,
    pub will_continue: bool,
    pub assistant_event: Option<Event>,
}

/// Overridable hook surface. Default implementations are all identity /
/// no-ops, so an agent with no hooks registered behaves as passthrough.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    async fn on_prepare_request(&self, ctx: PrepareRequestContext) -> PreparedRequest {
        PreparedRequest { instructions: ctx.instructions, tools: ctx.tools }
    }

    async fn on_before_tool_call(&self, _call: &ToolCall, arguments: Value) -> Value {
        arguments
    }

    async fn on_after_tool_call(&self, _call: &ToolCall, result: MultimodalContent) -> MultimodalContent {
        result
    }

    async fn on_tool_call_error(&self, _call: &ToolCall, error: &ToolError) -> MultimodalContent {
        MultimodalContent::text(format!("Tool error: {error}"))
    }

    /// Tests use this to short-circuit real execution; returning `None`
    /// (the default) lets the Tool Processor proceed normally.
    async fn on_process_tool_calls(&self, _session_id: &str, _calls: &[ToolCall]) -> Option<Vec<ToolCallOutcome>> {
        None
    }

    fn on_llm_request(&self, _session_id: &str, _iteration: usize) {}
    fn on_llm_response(&self, _session_id: &str, _event: &Event) {}
    fn on_llm_streaming_response(&self, _session_id: &str, _event: &Event) {}

    fn on_each_agent_loop_start(&self, _session_id: &str, _iteration: usize) {}
    fn on_each_agent_loop_end(&self, _ctx: LoopEndContext) {}

    /// Called with the candidate final `assistant_message` from the prior
    /// iteration. Default approves termination immediately.
    async fn on_before_loop_termination(&self, _final_event: &Event) -> (TerminationDecision, Option<String>) {
        (TerminationDecision::Finished, None)
    }

    fn on_agent_loop_end(&self, _session_id: &str) {}

    fn on_dispose(&self) {}
}

/// The no-override default, used when an `Agent` is built without a custom
/// hook set.
#[derive(Debug, Default)]
pub struct DefaultHooks;

impl AgentHooks for DefaultHooks {}
