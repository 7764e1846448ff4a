//! Error types for the memory crate.

use thiserror::Error;

/// Errors that can occur in the memory crate.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The embedding or similarity-search collaborator failed.
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] lore_llm::LlmError),

    /// Reading or writing the persisted store failed.
    #[error("Persistence error: {0}")]
    Persist(#[from] lore_types::PersistError),

    /// The operation was cancelled before completion.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for memory operations.
pub type Result<T> = std::result::Result<T, MemoryError>;
