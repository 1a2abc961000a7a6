//! Sequence counter storage.
//!
//! The node picks a backend at startup: in-memory counters for ephemeral
//! deployments and tests, or redb when counters must survive restarts.

mod chaotic;
mod error;
mod redb;

use std::path::Path;

pub use chaotic::ChaoticSequenceStore;
pub use error::StorageError;
use parley_core::{DirectionKey, SequenceError, SequenceStore, SequenceTracker};

pub use self::redb::RedbSequenceStore;

/// Sequence store selected by configuration.
pub enum SequenceBackend {
    /// Process-lifetime counters
    Memory(SequenceTracker),
    /// Durable counters
    Redb(RedbSequenceStore),
}

impl SequenceBackend {
    /// Redb store at `path` if given, in-memory counters otherwise.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened.
    pub fn open(path: Option<&Path>) -> Result<Self, StorageError> {
        match path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Using durable sequence store");
                RedbSequenceStore::open(path).map(Self::Redb)
            },
            None => {
                tracing::info!("Using in-memory sequence store");
                Ok(Self::Memory(SequenceTracker::new()))
            },
        }
    }

    /// Returns true if counters survive a restart.
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Redb(_))
    }
}

impl SequenceStore for SequenceBackend {
    fn last_accepted(&self, direction: &DirectionKey) -> Result<Option<u64>, SequenceError> {
        match self {
            Self::Memory(store) => store.last_accepted(direction),
            Self::Redb(store) => store.last_accepted(direction),
        }
    }

    fn check_and_advance(
        &self,
        direction: &DirectionKey,
        sequence_number: u64,
    ) -> Result<(), SequenceError> {
        match self {
            Self::Memory(store) => store.check_and_advance(direction, sequence_number),
            Self::Redb(store) => store.check_and_advance(direction, sequence_number),
        }
    }

    fn clear(&self) -> Result<(), SequenceError> {
        match self {
            Self::Memory(store) => store.clear(),
            Self::Redb(store) => store.clear(),
        }
    }
}
