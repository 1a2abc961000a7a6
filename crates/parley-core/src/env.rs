//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (wall clock, randomness).
//! Production code plugs in the real clock and OS entropy; tests plug in a
//! virtual clock and a seeded RNG so every run is reproducible.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Wall-clock instant in milliseconds since the Unix epoch.
///
/// Freshness decisions compare a sender's claimed origination time against
/// the receiver's clock, so this is wall time rather than a monotonic
/// instant. Arithmetic saturates at both ends of the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch.
    pub const EPOCH: Self = Self(0);

    /// Timestamp from milliseconds since the Unix epoch.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the Unix epoch.
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// `self + duration`, clamped to the representable range.
    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration_millis(duration)))
    }

    /// `self - duration`, clamped at the epoch.
    #[must_use]
    pub fn saturating_sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration_millis(duration)))
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn duration_since(self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion, incorrect simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time.
    fn now(&self) -> Timestamp;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u128`.
    ///
    /// Used for session identifiers.
    fn random_u128(&self) -> u128 {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        u128::from_be_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_arithmetic_clamps() {
        let t = Timestamp::from_millis(1_000);

        assert_eq!(t.saturating_sub(Duration::from_secs(5)), Timestamp::EPOCH);
        assert_eq!(
            Timestamp::from_millis(u64::MAX).saturating_add(Duration::from_secs(1)),
            Timestamp::from_millis(u64::MAX)
        );
        assert_eq!(t.saturating_add(Duration::from_millis(500)).as_millis(), 1_500);
    }

    #[test]
    fn duration_since_is_zero_when_earlier_is_later() {
        let earlier = Timestamp::from_millis(10_000);
        let later = Timestamp::from_millis(12_500);

        assert_eq!(later.duration_since(earlier), Duration::from_millis(2_500));
        assert_eq!(earlier.duration_since(later), Duration::ZERO);
    }
}
