mod cli;
mod terminal;

use std::sync::Arc;

use agentkit_core::config::{load_dotenv, AgentConfig};
use agentkit_kernel::tool::EchoTool;
use agentkit_kernel::{Agent, Dialect, RunInput, RunOutcome};
use agentkit_tools::{BashExecuteTool, FileReadTool, FileWriteTool};
use anyhow::Result;
use clap::Parser;
use tracing::error;

use crate::cli::CliArgs;
use crate::terminal::Terminal;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    load_dotenv();
    let args = CliArgs::parse();
    let terminal = Terminal::new();

    let mut config = AgentConfig::from_env();
    if let Some(provider) = &args.provider {
        config.provider = provider.clone();
    }
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(api_key) = &args.api_key {
        config.api_key = Some(api_key.clone());
    }
    if let Some(base_url) = &args.base_url {
        config.base_url = Some(base_url.clone());
    }
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }
    config.log_summary();

    let dialect = if args.prompt_engineering { Dialect::PromptEngineering } else { Dialect::Native };

    let agent = Agent::builder(args.system_prompt.clone()).dialect(dialect).config(config.clone()).build();
    agent.register_tool(Arc::new(EchoTool));
    agent.register_tool(Arc::new(BashExecuteTool));
    agent.register_tool(Arc::new(FileReadTool));
    agent.register_tool(Arc::new(FileWriteTool));

    terminal.print_banner(&config.provider, &config.model)?;

    if let Some(prompt) = &args.prompt {
        run_turn(&agent, &terminal, prompt).await;
        return Ok(());
    }

    loop {
        let input = match terminal.read_input()? {
            Some(text) => text,
            None => {
                terminal.print_info("Goodbye.")?;
                break;
            }
        };

        if input.is_empty() {
            continue;
        }

        run_turn(&agent, &terminal, &input).await;
    }

    Ok(())
}

/// Run one turn, printing every event the run produces as it completes.
/// `run` always returns a snapshot, so streaming mode is requested purely
/// to get the full per-turn event list for rendering here.
async fn run_turn(agent: &Agent, terminal: &Terminal, input: &str) {
    match agent.run(RunInput::from(input).stream(true)).await {
        Ok(RunOutcome::Stream(events)) => {
            for event in &events {
                if let Err(e) = terminal.display_event(event) {
                    error!(error = %e, "failed to render event");
                }
            }
        }
        Ok(RunOutcome::Final(event)) => {
            if let Err(e) = terminal.display_event(&event) {
                error!(error = %e, "failed to render event");
            }
        }
        Err(e) => {
            error!(error = %e, "run failed");
            if let Err(print_err) = terminal.print_error(&format!("{:#}", e)) {
                error!(error = %print_err, "failed to print error");
            }
        }
    }
}
