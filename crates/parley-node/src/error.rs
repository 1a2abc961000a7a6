//! Node error types.

use parley_core::{EnvelopeError, KeyExchangeError, SequenceError};
use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced by the channel service and the binary.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Invalid configuration; fix and restart
    #[error("configuration error: {0}")]
    Config(String),

    /// Sequence storage could not be opened or used
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Sequence store rejected an administrative operation
    #[error("sequence store error: {0}")]
    Sequence(#[from] SequenceError),

    /// Key-exchange operation rejected
    #[error(transparent)]
    KeyExchange(#[from] KeyExchangeError),

    /// Envelope rejected
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Audit log could not be written or decoded
    #[error("audit log error: {0}")]
    AuditLog(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
