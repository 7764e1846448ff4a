//! Error types for the agent crate.

use thiserror::Error;

/// Result type alias using the agent error type.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Error type for agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The fixed preamble and upcoming turn leave no room in the budget.
    #[error("Context budget exhausted: {required} tokens required, {available} available")]
    BudgetExhausted { required: usize, available: usize },

    /// LLM backend error.
    #[error("LLM error: {0}")]
    Llm(#[from] lore_llm::LlmError),

    /// Memory store error.
    #[error("Memory error: {0}")]
    Memory(#[from] lore_memory::MemoryError),

    /// Session ledger error.
    #[error("Session error: {0}")]
    Session(#[from] lore_session::SessionError),

    /// Reading or writing persisted state failed.
    #[error("Persistence error: {0}")]
    Persist(#[from] lore_types::PersistError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] lore_config::ConfigError),

    /// A group cast was built without members or with a bad active index.
    #[error("Invalid cast: {0}")]
    InvalidCast(String),

    /// No task factory is registered under this id.
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// A background task failed.
    #[error("Task '{task}' failed: {message}")]
    Task { task: String, message: String },

    /// There is nothing to regenerate.
    #[error("Nothing to reroll: {0}")]
    NothingToReroll(String),

    /// Task was cancelled.
    #[error("Task cancelled")]
    Cancelled,
}

impl AgentError {
    /// Create a task error.
    pub fn task(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Task {
            task: task.into(),
            message: message.into(),
        }
    }

    /// Whether this error means the operation was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::Llm(lore_llm::LlmError::Cancelled)
                | Self::Memory(lore_memory::MemoryError::Cancelled)
                | Self::Session(lore_session::SessionError::Cancelled)
        )
    }
}
