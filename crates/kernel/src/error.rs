//! Kernel-level error type. Tool errors and LLM errors are wrapped rather
//! than flattened, so callers can still match on the underlying cause.

use agentkit_llm::LlmError;

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("agent is already executing a run")]
    AlreadyExecuting,
    #[error("run aborted")]
    Aborted,
    #[error("agent has been disposed")]
    Disposed,
    #[error("model provider error: {0}")]
    Llm(#[from] LlmError),
    #[error("malformed assistant stream: {0}")]
    Protocol(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
