//! Sequence store wrapper that injects failures.
//!
//! Delegates to an inner store but fails a configurable fraction of calls
//! with a storage error, before the inner store is touched. Used to check
//! that a failing store never lets an envelope through and never moves a
//! counter.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use parley_core::{DirectionKey, SequenceError, SequenceStore};

use super::StorageError;

/// Sequence store that randomly fails operations.
#[derive(Clone)]
pub struct ChaoticSequenceStore<S> {
    inner: S,
    /// 0.0 never fails, 1.0 always fails
    failure_rate: f64,
    rng: Arc<Mutex<Lcg>>,
    injected: Arc<AtomicUsize>,
}

/// Linear congruential generator; reproducible per seed.
struct Lcg {
    state: u64,
}

impl Lcg {
    /// Next value in `[0.0, 1.0)`.
    fn next(&mut self) -> f64 {
        const A: u64 = 6_364_136_223_846_793_005;
        const C: u64 = 1_442_695_040_888_963_407;

        self.state = self.state.wrapping_mul(A).wrapping_add(C);
        (self.state >> 11) as f64 / (1u64 << 53) as f64
    }
}

impl<S: SequenceStore> ChaoticSequenceStore<S> {
    /// Wrap `inner`, failing with probability `failure_rate` per call.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in `[0.0, 1.0]`.
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(Lcg { state: seed })),
            injected: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wrapped store, for checking state after chaos.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of failures injected so far.
    pub fn injected_failures(&self) -> usize {
        self.injected.load(Ordering::Relaxed)
    }

    fn inject(&self) -> Result<(), SequenceError> {
        let roll = self.rng.lock().unwrap_or_else(PoisonError::into_inner).next();
        if roll < self.failure_rate {
            self.injected.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::Io("chaotic failure injection".to_string()).into());
        }
        Ok(())
    }
}

impl<S: SequenceStore> SequenceStore for ChaoticSequenceStore<S> {
    fn last_accepted(&self, direction: &DirectionKey) -> Result<Option<u64>, SequenceError> {
        self.inject()?;
        self.inner.last_accepted(direction)
    }

    fn check_and_advance(
        &self,
        direction: &DirectionKey,
        sequence_number: u64,
    ) -> Result<(), SequenceError> {
        self.inject()?;
        self.inner.check_and_advance(direction, sequence_number)
    }

    fn clear(&self) -> Result<(), SequenceError> {
        self.inject()?;
        self.inner.clear()
    }
}
