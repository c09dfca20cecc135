//! The Message History Builder (§4.6): reconstructs a provider-shaped
//! message list from the event stream, dialect-aware and bounded by an
//! image-count cap.

use agentkit_llm::message::{ChatContent, ChatContentPart, ChatMessage};

use crate::engine::ToolCallEngine;
use crate::event::{Event, EventPayload};
use crate::tool::{ContentPart, MultimodalContent, ToolCall, ToolDefinition};

pub struct MessageHistoryBuilder<'a> {
    engine: &'a dyn ToolCallEngine,
    max_images: usize,
}

impl<'a> MessageHistoryBuilder<'a> {
    pub fn new(engine: &'a dyn ToolCallEngine, max_images: usize) -> Self {
        Self { engine, max_images }
    }

    /// Build the full message list: system prompt (plus, for
    /// Prompt-Engineering, the tool instruction block and a timestamp
    /// line), folded events in order, with the image cap applied last.
    pub fn build(&self, system_prompt: &str, tools: &[ToolDefinition], events: &[Event]) -> Vec<ChatMessage> {
        let prepared_prompt = self.engine.prepare_prompt(system_prompt, tools);
        let system_text = format!("{prepared_prompt}\n\nCurrent time: {}", chrono::Utc::now().to_rfc3339());

        let mut messages = vec![ChatMessage::system(system_text)];
        let mut pending_results: Vec<(ToolCall, MultimodalContent)> = Vec::new();

        let flush_results = |pending: &mut Vec<(ToolCall, MultimodalContent)>, messages: &mut Vec<ChatMessage>| {
            if pending.is_empty() {
                return;
            }
            messages.extend(self.engine.build_historical_tool_call_results(pending));
            pending.clear();
        };

        for event in events {
            match &event.payload {
                EventPayload::UserMessage { content } => {
                    flush_results(&mut pending_results, &mut messages);
                    messages.push(content_to_message(content));
                }
                EventPayload::EnvironmentInput { content, .. } => {
                    flush_results(&mut pending_results, &mut messages);
                    messages.push(content_to_message(content));
                }
                EventPayload::AssistantMessage { content, raw_content, tool_calls, .. } => {
                    flush_results(&mut pending_results, &mut messages);
                    let calls = tool_calls.clone().unwrap_or_default();
                    messages.push(self.engine.build_historical_assistant_message(content, raw_content.as_deref(), &calls));
                }
                EventPayload::ToolResult { tool_call_id, name, content, .. } => {
                    let call = ToolCall { id: tool_call_id.clone(), name: name.clone(), arguments: String::new() };
                    pending_results.push((call, content.clone()));
                }
                _ => {}
            }
        }
        flush_results(&mut pending_results, &mut messages);

        cap_images(&mut messages, self.max_images);
        messages
    }
}

fn content_to_message(content: &MultimodalContent) -> ChatMessage {
    if content.0.iter().any(|p| matches!(p, ContentPart::ImageUrl { .. })) {
        let text = content.as_text();
        let images: Vec<String> = content.image_urls().map(str::to_string).collect();
        ChatMessage::user_with_images(text, images)
    } else {
        ChatMessage::user(content.as_text())
    }
}

/// Replace the oldest image parts across the whole history with a text
/// placeholder once the total exceeds `max_images`. Textual parts are never
/// touched; a message can end up with no parts only if it held solely
/// images that all got capped, in which case it's left with the placeholder.
fn cap_images(messages: &mut [ChatMessage], max_images: usize) {
    let total_images: usize = messages
        .iter()
        .filter_map(|m| match &m.content {
            Some(ChatContent::Parts(parts)) => Some(parts.iter().filter(|p| matches!(p, ChatContentPart::ImageUrl { .. })).count()),
            _ => None,
        })
        .sum();

    if total_images <= max_images {
        return;
    }

    let mut to_drop = total_images - max_images;
    for message in messages.iter_mut() {
        if to_drop == 0 {
            break;
        }
        let Some(ChatContent::Parts(parts)) = &mut message.content else { continue };
        for part in parts.iter_mut() {
            if to_drop == 0 {
                break;
            }
            if matches!(part, ChatContentPart::ImageUrl { .. }) {
                *part = ChatContentPart::Text { text: "[image omitted: history limit reached]".to_string() };
                to_drop -= 1;
            }
        }
    }
}
