//! Error types for the session crate.

use thiserror::Error;

/// Errors that can occur managing sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The inference or embedding collaborator failed.
    #[error("LLM error: {0}")]
    Llm(#[from] lore_llm::LlmError),

    /// The model's summary could not be used.
    #[error("Summary error: {0}")]
    Summary(String),

    /// Reading or writing the persisted ledger failed.
    #[error("Persistence error: {0}")]
    Persist(#[from] lore_types::PersistError),

    /// A session-start pattern is not a valid regular expression.
    #[error("Invalid session-start pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    /// The operation was cancelled; the ledger is unchanged.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
