pub mod agent;
pub mod engine;
pub mod error;
pub mod event;
pub mod hooks;
pub mod llm_processor;
pub mod loop_executor;
pub mod message_history;
pub mod registry;
pub mod tool;
pub mod tool_processor;

pub use agent::{Agent, AgentBuilder, RunInput, RunOutcome, RunState};
pub use engine::{Dialect, NativeEngine, PromptEngineeringEngine, ToolCallEngine};
pub use error::KernelError;
pub use event::{Event, EventPayload, EventStream, FinishReason, SubscriptionId, SystemLevel};
pub use hooks::{AgentHooks, DefaultHooks};
pub use registry::{ToolFilter, ToolRegistry};
pub use tool::{ContentPart, MultimodalContent, Tool, ToolCall, ToolContext, ToolDefinition, ToolError, ToolResult};
