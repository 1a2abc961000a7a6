//! Node configuration.

use std::{path::PathBuf, time::Duration};

use parley_core::ChannelConfig;

use crate::error::NodeError;

/// Default number of audit records buffered ahead of the writer.
pub const DEFAULT_AUDIT_BUFFER: usize = 1024;

/// Everything needed to start a channel service.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Protocol tunables
    pub channel: ChannelConfig,
    /// Redb file for sequence counters; in-memory counters if `None`
    pub sequence_db: Option<PathBuf>,
    /// CBOR audit log file; tracing only if `None`
    pub audit_log: Option<PathBuf>,
    /// Audit records buffered ahead of the writer
    pub audit_buffer: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            sequence_db: None,
            audit_log: None,
            audit_buffer: DEFAULT_AUDIT_BUFFER,
        }
    }
}

impl NodeConfig {
    /// Reject configurations that would make every message or handshake
    /// fail.
    ///
    /// # Errors
    ///
    /// Returns `NodeError::Config` describing the first problem found.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.channel.freshness.max_age.is_zero() {
            return Err(NodeError::Config("max age must be positive".to_string()));
        }
        if self.channel.key_exchange.handshake_ttl < Duration::from_secs(1) {
            return Err(NodeError::Config("handshake TTL must be at least one second".to_string()));
        }
        if self.audit_buffer == 0 {
            return Err(NodeError::Config("audit buffer must hold at least one record".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = NodeConfig::default();

        assert!(config.validate().is_ok());
        assert!(config.channel.key_exchange.verify_initiator_signature);
        assert_eq!(config.channel.freshness.max_age, Duration::from_secs(300));
        assert_eq!(config.channel.freshness.max_future_skew, Duration::from_secs(60));
    }

    #[test]
    fn zero_max_age_is_rejected() {
        let mut config = NodeConfig::default();
        config.channel.freshness.max_age = Duration::ZERO;

        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
    }

    #[test]
    fn zero_audit_buffer_is_rejected() {
        let config = NodeConfig { audit_buffer: 0, ..NodeConfig::default() };

        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
    }
}
