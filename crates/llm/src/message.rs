//! Wire-level chat types for an OpenAI-compatible chat-completions endpoint.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A function-call request attached to an assistant message, as replayed back
/// to the model on the next turn (Native dialect history).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, kept as a string at rest.
    pub arguments: String,
}

/// A single part of a multimodal message body, mirroring the OpenAI vision
/// wire shape (`[{"type":"text",...},{"type":"image_url",...}]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatContentPart {
    Text { text: String },
    ImageUrl { image_url: ChatImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatImageUrl {
    pub url: String,
}

/// A message body is either plain text or, for multimodal turns, an ordered
/// list of parts. Both shapes are accepted on the wire by OpenAI-compatible
/// backends, so this is kept untagged rather than always-array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

impl ChatContent {
    pub fn text(content: impl Into<String>) -> Self {
        ChatContent::Text(content.into())
    }

    /// The concatenation of every text part, ignoring images. Used when a
    /// caller needs a plain string view (e.g. for logging or for dialects
    /// that fold history back into flat text).
    pub fn as_text(&self) -> String {
        match self {
            ChatContent::Text(text) => text.clone(),
            ChatContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ChatContentPart::Text { text } => Some(text.as_str()),
                    ChatContentPart::ImageUrl { .. } => None,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ChatContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: Some(ChatContent::text(content)), name: None, tool_call_id: None, tool_calls: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: Some(ChatContent::text(content)), name: None, tool_call_id: None, tool_calls: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: Some(ChatContent::text(content)), name: None, tool_call_id: None, tool_calls: None }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: Some(ChatContent::text(content)),
            name: None,
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }

    /// A user message carrying optional lead-in text followed by zero or
    /// more images, in order. Used to replay tool-result image parts back
    /// into history without losing them to a plain string content field.
    pub fn user_with_images(text: impl Into<String>, images: impl IntoIterator<Item = String>) -> Self {
        let text = text.into();
        let mut parts = Vec::new();
        if !text.is_empty() {
            parts.push(ChatContentPart::Text { text });
        }
        parts.extend(images.into_iter().map(|url| ChatContentPart::ImageUrl { image_url: ChatImageUrl { url } }));
        Self { role: ChatRole::User, content: Some(ChatContent::Parts(parts)), name: None, tool_call_id: None, tool_calls: None }
    }
}

/// A request to the streaming chat-completions endpoint. `stream` is always
/// forced to `true` by the concrete client.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
    /// Standard OpenAI stop-sequence field. The Prompt-Engineering dialect
    /// sets this (and `stop_sequences`) to stop generation on the closing
    /// `</tool_call>` tag; Native leaves both `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    /// Non-standard mirror of `stop`, accepted by some OpenAI-compatible
    /// backends instead of (or in addition to) `stop`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>, temperature: f32, max_tokens: u32) -> Self {
        Self { model: model.into(), messages, temperature, max_tokens, tools: None, stop: None, stop_sequences: None }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionCallDelta {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub function: Option<FunctionCallDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatDelta {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoiceDelta {
    #[serde(default)]
    pub delta: ChatDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One `data:` line of a streaming chat-completions response.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChatChoiceDelta>,
    pub usage: Option<Usage>,
}

impl ChatChunk {
    pub fn first_choice(&self) -> Option<&ChatChoiceDelta> {
        self.choices.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_message_carries_call_id() {
        let msg = ChatMessage::tool_result("call_1", "42");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.role, ChatRole::Tool);
    }

    #[test]
    fn parses_tool_call_delta_chunk() {
        let raw = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"echo","arguments":"{\"x\":1"}}]},"finish_reason":null}]}"#;
        let chunk: ChatChunk = serde_json::from_str(raw).unwrap();
        let delta = chunk.first_choice().unwrap();
        let tc = delta.delta.tool_calls.as_ref().unwrap().first().unwrap();
        assert_eq!(tc.id.as_deref(), Some("call_1"));
        assert_eq!(tc.function.as_ref().unwrap().name.as_deref(), Some("echo"));
    }
}
