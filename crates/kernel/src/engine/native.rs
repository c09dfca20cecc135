//! The Native dialect: the provider exposes first-class function calling.

use std::collections::BTreeMap;

use agentkit_llm::message::{ChatContent, ChatDelta, ChatMessage, ChatRequest, FunctionCall, ToolCallRequest};
use serde_json::json;

use crate::tool::{ContentPart, MultimodalContent, ToolCall, ToolDefinition};

use super::{map_finish_reason, Dialect, EngineStreamState, FinalizedMessage, StreamDeltaBatch, ToolCallEngine, ToolCallStreamUpdate};

/// One tool call being accumulated across `tool_calls[i]` deltas, indexed by
/// the provider's `index` field.
#[derive(Debug, Default, Clone)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
    opened: bool,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct NativeState {
    pending: BTreeMap<usize, PendingCall>,
}

#[derive(Debug, Default)]
pub struct NativeEngine;

impl ToolCallEngine for NativeEngine {
    fn dialect(&self) -> Dialect {
        Dialect::Native
    }

    fn prepare_prompt(&self, instructions: &str, _tools: &[ToolDefinition]) -> String {
        instructions.to_string()
    }

    fn prepare_request(&self, request: &mut ChatRequest, tools: &[ToolDefinition]) {
        if tools.is_empty() {
            request.tools = None;
            return;
        }
        request.tools = Some(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        }
                    })
                })
                .collect(),
        );
    }

    fn init_stream_state(&self) -> EngineStreamState {
        EngineStreamState::Native(NativeState::default())
    }

    fn process_chunk(&self, state: &mut EngineStreamState, delta: &ChatDelta, finish_reason: Option<&str>) -> StreamDeltaBatch {
        let EngineStreamState::Native(state) = state else {
            unreachable!("NativeEngine always owns NativeState");
        };

        let mut batch = StreamDeltaBatch { text: delta.content.clone(), thinking: delta.reasoning_content.clone(), tool_calls: Vec::new() };

        if let Some(deltas) = &delta.tool_calls {
            for d in deltas {
                let entry = state.pending.entry(d.index).or_default();
                if let Some(id) = &d.id {
                    entry.id = id.clone();
                }
                if let Some(function) = &d.function {
                    if let Some(name) = &function.name {
                        entry.name = name.clone();
                    }
                    if let Some(args) = &function.arguments {
                        entry.arguments.push_str(args);
                        batch.tool_calls.push(ToolCallStreamUpdate {
                            tool_call_id: entry.id.clone(),
                            tool_name: entry.name.clone(),
                            arguments_delta: args.clone(),
                            is_complete: false,
                        });
                        entry.opened = true;
                    }
                }
            }
        }

        // On `finish_reason = "tool_calls"`, emit one `isComplete=true`
        // update per pending call that's still open — the provider never
        // sends a closing delta of its own for native tool calls, so this
        // chunk is the only signal that each call is done.
        if finish_reason == Some("tool_calls") {
            for entry in state.pending.values_mut() {
                if entry.opened && !entry.closed {
                    batch.tool_calls.push(ToolCallStreamUpdate {
                        tool_call_id: entry.id.clone(),
                        tool_name: entry.name.clone(),
                        arguments_delta: String::new(),
                        is_complete: true,
                    });
                    entry.closed = true;
                }
            }
        }

        batch
    }

    fn finalize(&self, state: EngineStreamState, finish_reason: Option<&str>) -> FinalizedMessage {
        let EngineStreamState::Native(state) = state else {
            unreachable!("NativeEngine always owns NativeState");
        };

        let tool_calls: Vec<ToolCall> = state
            .pending
            .into_values()
            .map(|p| ToolCall { id: p.id, name: p.name, arguments: p.arguments })
            .collect();

        FinalizedMessage {
            content: String::new(),
            raw_content: None,
            tool_calls,
            finish_reason: map_finish_reason(finish_reason),
            warnings: Vec::new(),
        }
    }

    fn build_historical_assistant_message(&self, content: &str, _raw_content: Option<&str>, tool_calls: &[ToolCall]) -> ChatMessage {
        let tool_calls = if tool_calls.is_empty() {
            None
        } else {
            Some(
                tool_calls
                    .iter()
                    .map(|c| ToolCallRequest {
                        id: c.id.clone(),
                        kind: "function".to_string(),
                        function: FunctionCall { name: c.name.clone(), arguments: c.arguments.clone() },
                    })
                    .collect(),
            )
        };
        ChatMessage {
            role: agentkit_llm::message::ChatRole::Assistant,
            content: if content.is_empty() { None } else { Some(ChatContent::text(content)) },
            name: None,
            tool_call_id: None,
            tool_calls,
        }
    }

    fn build_historical_tool_call_results(&self, results: &[(ToolCall, MultimodalContent)]) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        let mut trailing_images = Vec::new();

        for (call, content) in results {
            messages.push(ChatMessage::tool_result(call.id.clone(), content.as_text()));
            trailing_images.extend(content.0.iter().filter_map(|p| match p {
                ContentPart::ImageUrl { image_url } => Some(image_url.url.clone()),
                ContentPart::Text { .. } => None,
            }));
        }

        if !trailing_images.is_empty() {
            // A trailing user message carrying only the image parts: tool
            // result calls return text via the tool_result message above,
            // images via a follow-up one since tool-role messages don't
            // carry structured content.
            messages.push(ChatMessage::user_with_images(String::new(), trailing_images));
        }

        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentkit_llm::message::{FunctionCallDelta, ToolCallDelta};

    #[test]
    fn accumulates_tool_call_across_deltas_by_index() {
        let engine = NativeEngine;
        let mut state = engine.init_stream_state();

        let opening = ChatDelta {
            content: None,
            reasoning_content: None,
            tool_calls: Some(vec![ToolCallDelta {
                index: 0,
                id: Some("call_1".into()),
                kind: Some("function".into()),
                function: Some(FunctionCallDelta { name: Some("getWeather".into()), arguments: None }),
            }]),
        };
        engine.process_chunk(&mut state, &opening, None);

        let args1 = ChatDelta {
            content: None,
            reasoning_content: None,
            tool_calls: Some(vec![ToolCallDelta {
                index: 0,
                id: None,
                kind: None,
                function: Some(FunctionCallDelta { name: None, arguments: Some("{\"location\":".into()) }),
            }]),
        };
        let batch1 = engine.process_chunk(&mut state, &args1, None);
        assert_eq!(batch1.tool_calls[0].arguments_delta, "{\"location\":");

        let args2 = ChatDelta {
            content: None,
            reasoning_content: None,
            tool_calls: Some(vec![ToolCallDelta {
                index: 0,
                id: None,
                kind: None,
                function: Some(FunctionCallDelta { name: None, arguments: Some("\"Boston\"}".into()) }),
            }]),
        };
        let batch2 = engine.process_chunk(&mut state, &args2, Some("tool_calls"));

        let finalized = engine.finalize(state, Some("tool_calls"));
        assert_eq!(finalized.tool_calls.len(), 1);
        assert_eq!(finalized.tool_calls[0].name, "getWeather");
        assert_eq!(finalized.tool_calls[0].arguments, "{\"location\":\"Boston\"}");

        assert_eq!(batch2.tool_calls.len(), 2, "an arguments delta plus the finish_reason completion update");
        let completion = &batch2.tool_calls[1];
        assert!(completion.is_complete);
        assert_eq!(completion.tool_call_id, "call_1");
        assert_eq!(completion.arguments_delta, "");
    }

    #[test]
    fn finish_reason_without_pending_calls_emits_no_completion() {
        let engine = NativeEngine;
        let mut state = engine.init_stream_state();
        let delta = ChatDelta { content: Some("hi".into()), reasoning_content: None, tool_calls: None };
        let batch = engine.process_chunk(&mut state, &delta, Some("stop"));
        assert!(batch.tool_calls.is_empty());
    }

    #[test]
    fn empty_tool_list_omits_tools_field() {
        let engine = NativeEngine;
        let mut request = ChatRequest::new("m", vec![], 0.0, 1);
        engine.prepare_request(&mut request, &[]);
        assert!(request.tools.is_none());
    }
}
