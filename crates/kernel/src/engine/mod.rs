//! The Tool-Call Engine: a dialect-specific adapter for request shape,
//! streaming decode, and message-history reconstruction.
//!
//! `Native` targets a provider with first-class function calling; the
//! `PromptEngineering` dialect targets one that only understands plain text
//! and relies on a `<tool_call>{...}</tool_call>` convention threaded
//! through the system prompt.

mod native;
mod parser;
mod prompt_engineering;

pub use native::NativeEngine;
pub use prompt_engineering::PromptEngineeringEngine;

use agentkit_llm::message::{ChatDelta, ChatMessage, ChatRequest};

use crate::event::FinishReason;
use crate::tool::{MultimodalContent, ToolCall, ToolDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Native,
    PromptEngineering,
}

/// One coalesced unit of streaming output produced by `process_chunk`: at
/// most one text delta, one thinking delta, and any number of tool-call
/// updates, already coalesced.
#[derive(Debug, Clone, Default)]
pub struct StreamDeltaBatch {
    pub text: Option<String>,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCallStreamUpdate>,
}

impl StreamDeltaBatch {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.thinking.is_none() && self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ToolCallStreamUpdate {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments_delta: String,
    pub is_complete: bool,
}

/// Diagnostic produced by engine-side recovery or parse failure; the LLM
/// Processor turns this into a `system` event.
#[derive(Debug, Clone)]
pub struct EngineWarning {
    pub message: String,
    pub is_error: bool,
}

/// The outcome of `finalizeStreamProcessing`.
#[derive(Debug, Clone, Default)]
pub struct FinalizedMessage {
    pub content: String,
    pub raw_content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub warnings: Vec<EngineWarning>,
}

/// Per-stream parsing state. Each dialect owns a variant; the Processor
/// holds this as a plain value across chunks, never inside the engine
/// instance itself.
pub enum EngineStreamState {
    Native(native::NativeState),
    PromptEngineering(Box<parser::ToolCallParser>),
}

/// The dialect capability set. Implementations are `Send + Sync`
/// so an `Arc<dyn ToolCallEngine>` can be shared across iterations.
pub trait ToolCallEngine: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// `preparePrompt`: returns the (possibly tool-instruction-augmented)
    /// system instructions for this dialect.
    fn prepare_prompt(&self, instructions: &str, tools: &[ToolDefinition]) -> String;

    /// `prepareRequest`: shapes the provider request for this dialect —
    /// native tool fields, or prompt-engineering stop sequences.
    fn prepare_request(&self, request: &mut ChatRequest, tools: &[ToolDefinition]);

    fn init_stream_state(&self) -> EngineStreamState;

    /// `processStreamingChunk`: decode one delta into a coalesced batch of
    /// streaming updates. `finish_reason` is `Some` only on the chunk that
    /// carries it, letting a dialect emit `isComplete=true` updates for any
    /// tool call still open when the turn ends.
    fn process_chunk(&self, state: &mut EngineStreamState, delta: &ChatDelta, finish_reason: Option<&str>) -> StreamDeltaBatch;

    /// `finalizeStreamProcessing`: the single source of truth for the final
    /// assistant content and tool-call set.
    fn finalize(&self, state: EngineStreamState, finish_reason: Option<&str>) -> FinalizedMessage;

    /// `buildHistoricalAssistantMessage`.
    fn build_historical_assistant_message(
        &self,
        content: &str,
        raw_content: Option<&str>,
        tool_calls: &[ToolCall],
    ) -> ChatMessage;

    /// `buildHistoricalToolCallResultMessages`: one group of results (all
    /// belonging to the same iteration) folded into provider messages.
    fn build_historical_tool_call_results(
        &self,
        results: &[(ToolCall, MultimodalContent)],
    ) -> Vec<ChatMessage>;
}

pub(crate) fn map_finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}
