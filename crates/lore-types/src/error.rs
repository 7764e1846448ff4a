//! Error types for persisted state.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading or writing persisted documents.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Reading or writing a file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The document could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persona key failed validation.
    #[error("Invalid persona key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },
}

impl PersistError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for persistence operations.
pub type Result<T> = std::result::Result<T, PersistError>;
