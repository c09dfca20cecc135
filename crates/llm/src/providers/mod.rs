pub mod mock;
pub mod openai_compatible;

use std::sync::Arc;

use agentkit_core::config::AgentConfig;

use crate::provider::{LlmError, ModelClient};
use openai_compatible::OpenAiCompatibleClient;

/// Build the concrete client named by [`AgentConfig`]. Every provider name
/// speaks the same OpenAI-compatible wire format; `provider`/`base_url` only
/// pick the endpoint, never a different request shape.
pub fn create_client(config: &AgentConfig) -> Result<Arc<dyn ModelClient>, LlmError> {
    let base_url = config
        .base_url
        .clone()
        .unwrap_or_else(|| "https://api.openai.com".to_string());
    Ok(Arc::new(OpenAiCompatibleClient::new(config.api_key.clone(), base_url)))
}
