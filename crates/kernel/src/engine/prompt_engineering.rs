//! The Prompt-Engineering dialect: used when the provider has no native
//! function-calling support. Tool calls are threaded through plain text via
//! the `<tool_call>{...}</tool_call>` protocol, decoded by
//! [`super::parser::ToolCallParser`].

use agentkit_llm::message::{ChatDelta, ChatMessage, ChatRequest};

use crate::tool::{ContentPart, MultimodalContent, ToolCall, ToolDefinition};

use super::parser::ToolCallParser;
use super::{map_finish_reason, Dialect, EngineStreamState, FinalizedMessage, StreamDeltaBatch, ToolCallEngine};

pub const STOP_TAG: &str = "</tool_call>";

fn tool_instruction_block(tools: &[ToolDefinition]) -> String {
    let mut block = String::from(
        "\n\nYou have access to the following tools. To call one, emit exactly one JSON object \
         wrapped in a <tool_call> block and then stop immediately:\n\n\
         <tool_call>\n{\"name\":\"<tool>\",\"parameters\":{...}}\n</tool_call>\n\n\
         Rules: exactly one JSON object per block; do not add commentary inside the block; \
         never emit a tool call for a tool not listed below.\n\nTools:\n",
    );
    for tool in tools {
        block.push_str(&format!("- {}: {}\n  schema: {}\n", tool.name, tool.description, tool.input_schema));
    }
    block
}

#[derive(Debug, Default)]
pub struct PromptEngineeringEngine;

impl ToolCallEngine for PromptEngineeringEngine {
    fn dialect(&self) -> Dialect {
        Dialect::PromptEngineering
    }

    fn prepare_prompt(&self, instructions: &str, tools: &[ToolDefinition]) -> String {
        if tools.is_empty() {
            instructions.to_string()
        } else {
            format!("{instructions}{}", tool_instruction_block(tools))
        }
    }

    fn prepare_request(&self, request: &mut ChatRequest, _tools: &[ToolDefinition]) {
        request.tools = None;
        // Both the standard `stop` field and the non-standard `stop_sequences`
        // mirror are set for provider portability.
        let stops = vec![STOP_TAG.to_string(), format!("{STOP_TAG}\n")];
        request.stop = Some(stops.clone());
        request.stop_sequences = Some(stops);
    }

    fn init_stream_state(&self) -> EngineStreamState {
        EngineStreamState::PromptEngineering(Box::new(ToolCallParser::new()))
    }

    fn process_chunk(&self, state: &mut EngineStreamState, delta: &ChatDelta, _finish_reason: Option<&str>) -> StreamDeltaBatch {
        let EngineStreamState::PromptEngineering(parser) = state else {
            unreachable!("PromptEngineeringEngine always owns a ToolCallParser");
        };

        let mut batch = StreamDeltaBatch { thinking: delta.reasoning_content.clone(), ..Default::default() };

        if let Some(content) = &delta.content {
            let output = parser.feed(content);
            if !output.text.is_empty() {
                batch.text = Some(output.text);
            }
            batch.tool_calls = output.tool_calls;
        }

        batch
    }

    fn finalize(&self, state: EngineStreamState, finish_reason: Option<&str>) -> FinalizedMessage {
        let EngineStreamState::PromptEngineering(mut parser) = state else {
            unreachable!("PromptEngineeringEngine always owns a ToolCallParser");
        };

        let raw_content = parser.raw_text().to_string();
        let mut tool_calls = parser.take_finalized();
        let mut warnings = Vec::new();

        // Recovery only runs when the parser produced no call of its own and
        // ended mid-block: `finalize` is the single source of truth, recovery
        // is its fallback, never a second path.
        if tool_calls.is_empty() && parser.is_truncated() {
            let (recovered, recovery_warnings) = parser.recover_truncated();
            warnings.extend(recovery_warnings);
            if let Some(call) = recovered {
                tool_calls.push(call);
            }
        }

        FinalizedMessage {
            content: String::new(),
            raw_content: if raw_content.is_empty() { None } else { Some(raw_content) },
            tool_calls,
            finish_reason: map_finish_reason(finish_reason),
            warnings,
        }
    }

    fn build_historical_assistant_message(&self, content: &str, raw_content: Option<&str>, _tool_calls: &[ToolCall]) -> ChatMessage {
        // The raw text (including the literal <tool_call> block) is what
        // gets replayed, never a structured tool_calls field.
        let body = raw_content.unwrap_or(content);
        ChatMessage::assistant(body)
    }

    fn build_historical_tool_call_results(&self, results: &[(ToolCall, MultimodalContent)]) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        for (call, content) in results {
            let body = format!("Tool: {}\nResult:\n{}", call.name, content.as_text());
            messages.push(ChatMessage::user(body));

            let images: Vec<String> = content
                .0
                .iter()
                .filter_map(|p| match p {
                    ContentPart::ImageUrl { image_url } => Some(image_url.url.clone()),
                    ContentPart::Text { .. } => None,
                })
                .collect();
            if !images.is_empty() {
                // Dialect-consistent with Native: images ride a follow-up
                // user message rather than the textual one.
                messages.push(ChatMessage::user_with_images(String::new(), images));
            }
        }
        messages
    }
}
