//! Per-direction monotonic sequence counters.
//!
//! Every ordered `(sender, recipient)` pair has its own counter. A message is
//! accepted only if its sequence number is strictly greater than the last
//! one accepted on its direction, and accepting it advances the counter in
//! the same atomic step. Directions start at zero, so sequence numbers begin
//! at 1 and 0 is never accepted.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::{error::SequenceError, identity::IdentityId};

/// Ordered `(sender, recipient)` pair.
///
/// `A -> B` and `B -> A` are distinct directions with independent counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DirectionKey {
    /// Identity sending on this direction
    pub sender: IdentityId,
    /// Identity receiving on this direction
    pub recipient: IdentityId,
}

impl DirectionKey {
    /// Direction from `sender` to `recipient`.
    pub fn new(sender: IdentityId, recipient: IdentityId) -> Self {
        Self { sender, recipient }
    }

    /// The opposite direction.
    #[must_use]
    pub fn reversed(self) -> Self {
        Self { sender: self.recipient, recipient: self.sender }
    }
}

impl fmt::Display for DirectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.sender, self.recipient)
    }
}

/// Storage for per-direction counters.
///
/// # Invariants
///
/// - `check_and_advance` is atomic per direction: of any number of
///   concurrent calls presenting the same sequence number, at most one
///   succeeds
/// - A counter never decreases except through `clear`
pub trait SequenceStore: Send + Sync {
    /// Last accepted sequence number, `None` if nothing was accepted yet.
    fn last_accepted(&self, direction: &DirectionKey) -> Result<Option<u64>, SequenceError>;

    /// Accept `sequence_number` if it is above the last accepted one and
    /// record it as the new last accepted.
    ///
    /// # Errors
    ///
    /// - `Replay` if `sequence_number <= last_accepted` (counter unchanged)
    /// - `Storage` if the backing store failed (counter unchanged)
    fn check_and_advance(
        &self,
        direction: &DirectionKey,
        sequence_number: u64,
    ) -> Result<(), SequenceError>;

    /// Reset every direction to zero.
    ///
    /// Administrative only: clearing re-opens every previously used
    /// sequence number to replay.
    fn clear(&self) -> Result<(), SequenceError>;
}

/// In-memory [`SequenceStore`].
///
/// Counters are atomics in a sharded map, so unrelated directions never
/// contend and the accept decision for one direction is a single
/// compare-and-swap loop.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    counters: DashMap<DirectionKey, AtomicU64>,
}

impl SequenceTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of directions that have accepted at least one message.
    pub fn direction_count(&self) -> usize {
        self.counters.len()
    }
}

impl SequenceStore for SequenceTracker {
    fn last_accepted(&self, direction: &DirectionKey) -> Result<Option<u64>, SequenceError> {
        Ok(self.counters.get(direction).map(|counter| counter.load(Ordering::Acquire)))
    }

    fn check_and_advance(
        &self,
        direction: &DirectionKey,
        sequence_number: u64,
    ) -> Result<(), SequenceError> {
        if sequence_number == 0 {
            let last_accepted = self.last_accepted(direction)?.unwrap_or(0);
            return Err(SequenceError::Replay { last_accepted });
        }

        let advance = |counter: &AtomicU64| {
            counter
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                    (sequence_number > last).then_some(sequence_number)
                })
                .map(|_| ())
                .map_err(|last_accepted| SequenceError::Replay { last_accepted })
        };

        if let Some(counter) = self.counters.get(direction) {
            return advance(counter.value());
        }

        let counter = self.counters.entry(*direction).or_insert_with(|| AtomicU64::new(0));
        advance(counter.value())
    }

    fn clear(&self) -> Result<(), SequenceError> {
        self.counters.clear();
        Ok(())
    }
}
