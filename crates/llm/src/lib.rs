pub mod message;
pub mod provider;
pub mod providers;

pub use message::{ChatChunk, ChatContent, ChatContentPart, ChatMessage, ChatRequest, ChatRole};
pub use provider::{BoxStream, LlmError, ModelClient};
pub use providers::create_client;
pub use providers::mock::MockModelClient;
pub use providers::openai_compatible::OpenAiCompatibleClient;
