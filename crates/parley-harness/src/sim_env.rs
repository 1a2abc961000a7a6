//! Simulated environment: virtual clock plus seeded ChaCha RNG.
//!
//! Time only moves when a test moves it. Clones share the clock and the RNG
//! stream, so a manager and the test driving it observe the same instant.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use parley_core::{Environment, Timestamp};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Default start of the virtual clock (2023-11-14T22:13:20Z).
pub const DEFAULT_START: Timestamp = Timestamp::from_millis(1_700_000_000_000);

/// Deterministic environment for tests.
#[derive(Clone)]
pub struct SimEnv {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    now: Timestamp,
    rng: ChaCha20Rng,
}

impl SimEnv {
    /// Environment seeded with `seed`, clock at [`DEFAULT_START`].
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                now: DEFAULT_START,
                rng: ChaCha20Rng::seed_from_u64(seed),
            })),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut inner = self.lock();
        inner.now = inner.now.saturating_add(by);
        tracing::trace!(now = %inner.now, "Virtual clock advanced");
    }

    /// Set the clock to an absolute instant (may move backwards).
    pub fn set_now(&self, now: Timestamp) {
        self.lock().now = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Timestamp {
        self.lock().now
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.lock().rng.fill_bytes(buffer);
    }
}
