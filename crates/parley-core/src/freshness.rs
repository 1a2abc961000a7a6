//! Claimed-timestamp freshness window.
//!
//! A message is fresh when its claimed origination time lies within
//! `[now - max_age, now + max_future_skew]`. Both bounds are inclusive.

use std::time::Duration;

use crate::{env::Timestamp, error::FreshnessError};

/// Oldest a claimed timestamp may be.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(5 * 60);

/// Furthest into the future a claimed timestamp may be.
pub const DEFAULT_MAX_FUTURE_SKEW: Duration = Duration::from_secs(60);

/// Accepted range of claimed timestamps relative to the receiver's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessWindow {
    /// Maximum distance into the past
    pub max_age: Duration,
    /// Maximum distance into the future
    pub max_future_skew: Duration,
}

impl Default for FreshnessWindow {
    fn default() -> Self {
        Self { max_age: DEFAULT_MAX_AGE, max_future_skew: DEFAULT_MAX_FUTURE_SKEW }
    }
}

impl FreshnessWindow {
    /// Check `claimed` against `now`.
    pub fn check(&self, claimed: Timestamp, now: Timestamp) -> Result<(), FreshnessError> {
        if claimed <= now {
            let age = now.duration_since(claimed);
            if age > self.max_age {
                return Err(FreshnessError::TooOld { age, max_age: self.max_age });
            }
        } else {
            let ahead = claimed.duration_since(now);
            if ahead > self.max_future_skew {
                return Err(FreshnessError::FromFuture { ahead, max_skew: self.max_future_skew });
            }
        }

        Ok(())
    }
}
