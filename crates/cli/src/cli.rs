use clap::Parser;

/// Demo runner for the agent loop kernel.
///
/// Reads one prompt (from argv, or interactively if omitted) and prints
/// the resulting event stream.
#[derive(Parser, Debug)]
#[command(name = "agentkit-cli", about = "Demo runner for the agent loop kernel")]
pub struct CliArgs {
    /// Prompt to run. If omitted, starts an interactive REPL instead.
    pub prompt: Option<String>,

    /// LLM provider name (informational — the kernel speaks one
    /// OpenAI-compatible wire format regardless of this value).
    #[arg(long)]
    pub provider: Option<String>,

    /// Model name override.
    #[arg(long)]
    pub model: Option<String>,

    /// API key (overrides the `AGENT_API_KEY` environment variable).
    #[arg(long)]
    pub api_key: Option<String>,

    /// Base URL override for the OpenAI-compatible endpoint.
    #[arg(long)]
    pub base_url: Option<String>,

    /// System prompt override.
    #[arg(long, default_value = "You are a helpful assistant.")]
    pub system_prompt: String,

    /// Maximum agentic loop iterations per turn.
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Use the prompt-engineering tool-call dialect instead of native
    /// function calling.
    #[arg(long)]
    pub prompt_engineering: bool,
}
