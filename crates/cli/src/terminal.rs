use anyhow::Result;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::io::{self, Write};

use agentkit_kernel::event::{Event, EventPayload, SystemLevel};

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const USER_PROMPT: Color = Color::Green;
    const ASSISTANT_TEXT: Color = Color::Cyan;
    const THINKING: Color = Color::DarkCyan;
    const TOOL_CALL: Color = Color::Yellow;
    const TOOL_RESULT: Color = Color::DarkGreen;
    const ERROR: Color = Color::Red;
    const DIM: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
}

/// Manages terminal I/O: banner, prompt, and event rendering.
pub struct Terminal;

impl Terminal {
    pub fn new() -> Self {
        Self
    }

    /// Print the startup banner.
    pub fn print_banner(&self, provider: &str, model: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print("agentkit-cli"),
            ResetColor,
            Print(" - agent loop kernel demo\n"),
            SetForegroundColor(Colors::DIM),
            Print(format!("Provider: {} | Model: {}\n", provider, model)),
            Print("Type 'exit' or 'quit' to end.\n"),
            Print("---\n"),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Read a line of user input with prompt.
    /// Returns `None` if the user wants to exit.
    pub fn read_input(&self) -> Result<Option<String>> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            Print("\n"),
            SetForegroundColor(Colors::USER_PROMPT),
            Print("you> "),
            ResetColor,
        )?;
        stdout.flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if input.is_empty() {
            // EOF (e.g. piped stdin closed)
            return Ok(None);
        }
        let trimmed = input.trim().to_string();

        if trimmed.is_empty() {
            return Ok(Some(String::new()));
        }

        if trimmed == "exit" || trimmed == "quit" || trimmed == "/exit" || trimmed == "/quit" {
            return Ok(None);
        }

        Ok(Some(trimmed))
    }

    /// Display one kernel event with appropriate formatting. `user_message`
    /// and `environment_input` are not re-echoed since the CLI already
    /// printed the prompt it sent.
    pub fn display_event(&self, event: &Event) -> Result<()> {
        let mut stdout = io::stdout();
        match &event.payload {
            EventPayload::UserMessage { .. } | EventPayload::EnvironmentInput { .. } => {}
            EventPayload::AssistantStreamingMessage { content, is_complete, .. } => {
                if !content.is_empty() {
                    execute!(stdout, SetForegroundColor(Colors::ASSISTANT_TEXT), Print(content), ResetColor)?;
                    stdout.flush()?;
                }
                if *is_complete {
                    execute!(stdout, Print("\n"))?;
                    stdout.flush()?;
                }
            }
            EventPayload::AssistantStreamingThinkingMessage { content, .. } => {
                if !content.is_empty() {
                    execute!(stdout, SetForegroundColor(Colors::THINKING), Print(content), ResetColor)?;
                    stdout.flush()?;
                }
            }
            EventPayload::AssistantStreamingToolCall { .. } => {
                // Accumulated silently; the full call is shown at `tool_call`.
            }
            EventPayload::AssistantMessage { .. } | EventPayload::AssistantThinkingMessage { .. } => {}
            EventPayload::ToolCall { tool_call_id, name, arguments, .. } => {
                execute!(
                    stdout,
                    Print("\n"),
                    SetForegroundColor(Colors::TOOL_CALL),
                    Print(format!("[tool: {name}] {arguments}")),
                    ResetColor,
                    SetForegroundColor(Colors::DIM),
                    Print(format!("  ({})\n", &tool_call_id[..tool_call_id.len().min(8)])),
                    ResetColor,
                )?;
                stdout.flush()?;
            }
            EventPayload::ToolResult { name, content, error, elapsed_ms, .. } => {
                let is_error = error.is_some();
                let color = if is_error { Colors::ERROR } else { Colors::TOOL_RESULT };
                let label = if is_error { "error" } else { "result" };
                let text = content.as_text();
                let display_text = if text.len() > 500 {
                    format!("{}... ({} chars total)", &text[..500], text.len())
                } else {
                    text.to_string()
                };
                execute!(
                    stdout,
                    SetForegroundColor(color),
                    Print(format!("  [{name} {label}, {elapsed_ms}ms]: {display_text}\n")),
                    ResetColor,
                )?;
                stdout.flush()?;
            }
            EventPayload::PlanStart { steps, summary, .. } | EventPayload::PlanUpdate { steps, summary, .. } | EventPayload::PlanFinish { steps, summary, .. } => {
                execute!(
                    stdout,
                    SetForegroundColor(Colors::DIM),
                    Print(format!("[plan] {} step(s){}\n", steps.len(), summary.as_deref().map(|s| format!(": {s}")).unwrap_or_default())),
                    ResetColor,
                )?;
                stdout.flush()?;
            }
            EventPayload::System { level, message, .. } => {
                let color = match level {
                    SystemLevel::Error => Colors::ERROR,
                    _ => Colors::DIM,
                };
                execute!(stdout, SetForegroundColor(color), Print(format!("[system] {message}\n")), ResetColor)?;
                stdout.flush()?;
            }
        }
        Ok(())
    }

    /// Print an error message.
    pub fn print_error(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(stdout, SetForegroundColor(Colors::ERROR), Print(format!("Error: {}\n", msg)), ResetColor)?;
        stdout.flush()?;
        Ok(())
    }

    /// Print an info message.
    pub fn print_info(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(stdout, SetForegroundColor(Colors::DIM), Print(format!("{}\n", msg)), ResetColor)?;
        stdout.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_creation() {
        let _term = Terminal::new();
    }
}
