//! Channel-wide tunables.

use crate::{freshness::FreshnessWindow, handshake::KeyExchangeConfig};

/// Configuration for both halves of a channel: the handshake and the
/// per-message envelope checks.
#[derive(Debug, Clone, Default)]
pub struct ChannelConfig {
    /// Key-exchange settings
    pub key_exchange: KeyExchangeConfig,
    /// Accepted range of claimed message timestamps
    pub freshness: FreshnessWindow,
}
