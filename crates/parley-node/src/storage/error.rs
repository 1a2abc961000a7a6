//! Storage error types.

use parley_core::SequenceError;
use thiserror::Error;

/// Errors from durable storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Database could not be opened, read or written
    #[error("storage I/O error: {0}")]
    Io(String),

    /// Stored bytes do not decode
    #[error("corrupt storage entry: {0}")]
    Corrupt(String),
}

impl From<StorageError> for SequenceError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}
