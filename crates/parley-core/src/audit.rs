//! Security audit contract.
//!
//! Protocol decisions (handshake progress, replays, bad signatures) are
//! reported to an [`AuditSink`]. Recording is fire-and-forget: a sink
//! failure is logged and dropped, and never changes the decision that
//! produced the record.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{env::Timestamp, error::AuditError, identity::IdentityId};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEventKind {
    /// Initiator opened a key exchange
    KeyExchangeInitiated,
    /// Recipient answered with a verified ephemeral key
    KeyExchangeResponded,
    /// A party confirmed the derived secret
    KeyExchangeCompleted,
    /// Exchange ended in `Failed` (signature, abort, expiry) or a request
    /// against it was refused
    KeyExchangeFailed,
    /// Envelope reused or went below the direction's sequence counter
    ReplayDetected,
    /// Signature over an ephemeral key did not verify
    SignatureInvalid,
    /// Envelope claimed a timestamp outside the freshness window
    InvalidTimestamp,
    /// Envelope accepted for delivery
    MessageAccepted,
    /// Envelope rejected before its sequence number was judged (addressed
    /// to its sender, sequence store unavailable)
    EnvelopeRejected,
}

/// How urgent the record is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Normal protocol progress
    Info,
    /// Rejected input that honest clients can produce (clock skew, retries)
    Warning,
    /// Operation failed
    Error,
    /// Likely attack (forged signature, concurrent duplicate envelope)
    Critical,
}

/// A single audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event category
    pub kind: AuditEventKind,
    /// Identity that triggered the event, if known
    pub actor: Option<IdentityId>,
    /// Human-readable description
    pub details: String,
    /// Urgency
    pub severity: Severity,
    /// When the core observed the event
    pub at: Timestamp,
}

impl AuditEvent {
    /// Create an event.
    pub fn new(
        kind: AuditEventKind,
        actor: Option<IdentityId>,
        details: impl Into<String>,
        severity: Severity,
        at: Timestamp,
    ) -> Self {
        Self { kind, actor, details: details.into(), severity, at }
    }
}

/// Destination for audit records.
///
/// Implementations must not block for long: `record` runs inline with the
/// protocol decision. Sinks backed by slow storage should hand records off
/// to a background writer.
pub trait AuditSink: Send + Sync {
    /// Record an event.
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

impl<A: AuditSink + ?Sized> AuditSink for Arc<A> {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        (**self).record(event)
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Record `event`, swallowing sink failures.
pub(crate) fn record_best_effort(sink: &dyn AuditSink, event: AuditEvent) {
    let kind = event.kind;
    if let Err(e) = sink.record(event) {
        tracing::warn!(?kind, error = %e, "Dropping audit record");
    }
}
