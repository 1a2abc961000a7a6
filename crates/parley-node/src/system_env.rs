//! Production environment: wall clock and OS entropy.

use parley_core::{Environment, Timestamp};

/// Production environment using the system clock and getrandom.
///
/// # Panics
///
/// `random_bytes` panics if the OS RNG fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Timestamp {
        // Pre-epoch clocks read as 0.
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        Timestamp::from_millis(millis)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - cannot mint session ids");
    }
}
