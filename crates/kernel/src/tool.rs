//! The `Tool` extension point: definition, call, and result records, plus
//! the trait every tool implementation satisfies.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Describes a tool's interface for LLM consumption — name, description, and
/// a JSON Schema for its arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl fmt::Display for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}

/// The LLM's request to execute a tool. Arguments are kept as a JSON-encoded
/// string at rest — both the Native and Prompt-Engineering engines produce
/// this shape directly off the wire, and a still-streaming call is valid
/// (incomplete) JSON until its closing delta arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    /// Parse `arguments` as JSON, treating an empty string as `{}`.
    pub fn parsed_arguments(&self) -> Result<Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            Ok(Value::Object(Default::default()))
        } else {
            serde_json::from_str(&self.arguments)
        }
    }
}

/// One part of a [`MultimodalContent`] value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// An ordered sequence of content parts. At least one text part is always
/// present (possibly empty) — callers that only ever produce plain text use
/// [`MultimodalContent::text`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MultimodalContent(pub Vec<ContentPart>);

impl MultimodalContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self(vec![ContentPart::Text { text: text.into() }])
    }

    pub fn text_and_images(text: impl Into<String>, image_urls: impl IntoIterator<Item = String>) -> Self {
        let mut parts = vec![ContentPart::Text { text: text.into() }];
        parts.extend(image_urls.into_iter().map(|url| ContentPart::ImageUrl { image_url: ImageUrl { url } }));
        Self(parts)
    }

    /// Concatenation of every text part, in order; used wherever a plain
    /// string rendering is needed (Prompt-Engineering history, logs).
    pub fn as_text(&self) -> String {
        self.0
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn image_urls(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(|p| match p {
            ContentPart::ImageUrl { image_url } => Some(image_url.url.as_str()),
            ContentPart::Text { .. } => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of executing a tool, sent back to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: MultimodalContent,
    pub is_error: bool,
}

/// Context passed to every tool execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub working_directory: PathBuf,
}

/// The primary extension point: all tools implement this trait.
///
/// Tools are object-safe, `Send + Sync`, and async; `cancel` is cooperative —
/// long-running tools should poll it, but the kernel never force-aborts a
/// tool future out from under it.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn execute(
        &self,
        arguments: Value,
        context: &ToolContext,
        cancel: CancellationToken,
    ) -> Result<ToolResult, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Simple echo tool used by tests and the demo binary.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            description: "Echoes back the input message. For testing.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "The message to echo back"
                    }
                },
                "required": ["message"]
            }),
        }
    }

    async fn execute(
        &self,
        arguments: Value,
        _context: &ToolContext,
        _cancel: CancellationToken,
    ) -> Result<ToolResult, ToolError> {
        let message = arguments
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing 'message' field".to_string()))?;

        Ok(ToolResult {
            tool_call_id: String::new(),
            content: MultimodalContent::text(message),
            is_error: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_definition_roundtrips() {
        let def = ToolDefinition {
            name: "test_tool".to_string(),
            description: "A test tool".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
        };
        let json = serde_json::to_string(&def).unwrap();
        let roundtrip: ToolDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(roundtrip.name, "test_tool");
    }

    #[test]
    fn tool_call_arguments_parse_as_json() {
        let call = ToolCall { id: "call_001".to_string(), name: "echo".to_string(), arguments: r#"{"message":"hi"}"#.to_string() };
        let parsed = call.parsed_arguments().unwrap();
        assert_eq!(parsed["message"], "hi");
    }

    #[test]
    fn empty_arguments_parse_as_empty_object() {
        let call = ToolCall { id: "call_001".to_string(), name: "echo".to_string(), arguments: String::new() };
        assert_eq!(call.parsed_arguments().unwrap(), serde_json::json!({}));
    }

    #[test]
    fn multimodal_content_as_text_ignores_images() {
        let content = MultimodalContent::text_and_images("see attached", vec!["http://x/img.png".to_string()]);
        assert_eq!(content.as_text(), "see attached");
        assert_eq!(content.image_urls().collect::<Vec<_>>(), vec!["http://x/img.png"]);
    }

    #[tokio::test]
    async fn echo_tool_echoes_message() {
        let tool = EchoTool;
        let ctx = ToolContext { working_directory: std::path::PathBuf::from("/tmp") };
        let result = tool
            .execute(serde_json::json!({"message": "hello world"}), &ctx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.content.as_text(), "hello world");
        assert!(!result.is_error);
    }
}
