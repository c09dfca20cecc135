use std::env;

use serde::{Deserialize, Serialize};

/// Load a `.env` file from the current directory, silently ignoring if missing.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries `{PROFILE}_{KEY}` first, falls back to `{KEY}`.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_f32(profile: &str, key: &str, default: f32) -> f32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Runtime configuration for a single agent loop, loaded from the environment.
///
/// Mirrors the `{PROFILE}_{KEY}`-then-`{KEY}` fallback convention: set
/// `AGENTKIT_PROFILE=STAGING` and `STAGING_AGENT_MODEL=...` to override
/// `AGENT_MODEL` only for that profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub profile: String,
    /// Informational only — the kernel speaks one OpenAI-compatible wire
    /// format regardless of which backend is named here.
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_iterations: usize,
    pub max_images: usize,
}

impl AgentConfig {
    /// Build config from environment variables. Call [`load_dotenv`] first if a
    /// `.env` file should be honored.
    pub fn from_env() -> Self {
        let profile = env_or("AGENTKIT_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            provider: profiled_env_or(p, "AGENT_PROVIDER", "openai"),
            model: profiled_env_or(p, "AGENT_MODEL", "gpt-4o-mini"),
            api_key: profiled_env_opt(p, "AGENT_API_KEY"),
            base_url: profiled_env_opt(p, "AGENT_BASE_URL"),
            temperature: profiled_env_f32(p, "AGENT_TEMPERATURE", 0.1),
            max_tokens: profiled_env_u32(p, "AGENT_MAX_TOKENS", 4096),
            max_iterations: profiled_env_usize(p, "AGENT_MAX_ITERATIONS", 25),
            max_images: profiled_env_usize(p, "AGENT_MAX_IMAGES", 8),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Log a redacted summary at startup; never logs the API key itself.
    pub fn log_summary(&self) {
        tracing::info!(
            profile = self.profile_label(),
            provider = %self.provider,
            model = %self.model,
            max_iterations = self.max_iterations,
            configured = self.is_configured(),
            "agent config loaded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        let config = AgentConfig::for_profile("");
        assert_eq!(config.provider, "openai");
        assert_eq!(config.max_iterations, 25);
        assert!(config.api_key.is_none());
        assert!(!config.is_configured());
    }

    #[test]
    fn profile_label_falls_back_to_default() {
        let config = AgentConfig::for_profile("");
        assert_eq!(config.profile_label(), "default");
    }
}
