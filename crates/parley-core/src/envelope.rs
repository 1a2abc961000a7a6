//! Inbound message envelope validation.
//!
//! The envelope is the metadata a sender attaches to each ciphertext. The
//! validator decides accept or reject from that metadata alone; ciphertext
//! is carried through untouched.
//!
//! # Check order
//!
//! 1. Self-addressed envelopes are rejected outright
//! 2. Sequence number is compared against the direction's counter (replays
//!    are reported as replays even when the timestamp is also stale)
//! 3. Claimed timestamp must lie in the freshness window
//! 4. Counter advances atomically; a concurrent duplicate that lost the race
//!    is reported as a replay
//!
//! Every outcome is audited. A replay caught by the peek in step 2 is a
//! `Warning`; one that only surfaces at the commit in step 4 means two
//! copies arrived at once and is `Critical`.
//!
//! The counter only moves in step 4, so an envelope rejected for freshness
//! leaves its sequence number available for a corrected resend.

use std::sync::Arc;

use bytes::Bytes;

use crate::{
    audit::{AuditEvent, AuditEventKind, AuditSink, NullAuditSink, Severity, record_best_effort},
    env::{Environment, Timestamp},
    error::{EnvelopeError, SequenceError},
    freshness::FreshnessWindow,
    identity::IdentityId,
    sequence::{DirectionKey, SequenceStore},
};

/// Metadata accompanying one ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    /// Claimed sender
    pub sender: IdentityId,
    /// Intended recipient
    pub recipient: IdentityId,
    /// Per-direction sequence number, starting at 1
    pub sequence_number: u64,
    /// Sender's claimed origination time
    pub claimed_timestamp: Timestamp,
    /// Opaque reference to the ciphertext, never inspected
    pub ciphertext_ref: Bytes,
}

impl MessageEnvelope {
    /// Direction this envelope travels.
    pub fn direction(&self) -> DirectionKey {
        DirectionKey::new(self.sender, self.recipient)
    }
}

/// Accept/reject decision for inbound envelopes.
pub struct EnvelopeValidator<E, S> {
    env: E,
    store: S,
    window: FreshnessWindow,
    audit: Arc<dyn AuditSink>,
}

impl<E, S> EnvelopeValidator<E, S>
where
    E: Environment,
    S: SequenceStore,
{
    /// Validator over `store` with the given freshness window.
    pub fn new(env: E, store: S, window: FreshnessWindow) -> Self {
        Self { env, store, window, audit: Arc::new(NullAuditSink) }
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Freshness window in use.
    pub fn window(&self) -> FreshnessWindow {
        self.window
    }

    /// Backing sequence store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Accept or reject `envelope`. On `Ok(())` the direction's counter now
    /// equals the envelope's sequence number.
    ///
    /// # Errors
    ///
    /// - `SelfAddressed` if sender and recipient are equal
    /// - `ReplayDetected` if the sequence number is not above the last one
    ///   accepted on this direction
    /// - `TooOld` / `FromFuture` if the claimed timestamp is outside the
    ///   freshness window (counter unchanged)
    /// - `Storage` if the sequence store failed (counter unchanged)
    pub fn validate_envelope(&self, envelope: &MessageEnvelope) -> Result<(), EnvelopeError> {
        let now = self.env.now();
        let direction = envelope.direction();
        let sequence_number = envelope.sequence_number;

        if envelope.sender == envelope.recipient {
            self.audit(
                AuditEventKind::EnvelopeRejected,
                envelope.sender,
                format!("{direction}: sequence {sequence_number} is addressed to its sender"),
                Severity::Warning,
                now,
            );
            return Err(EnvelopeError::SelfAddressed(envelope.sender));
        }

        let last_accepted = self
            .store
            .last_accepted(&direction)
            .map_err(|e| self.storage_failure(direction, sequence_number, e, now))?;
        let last = last_accepted.unwrap_or(0);
        if sequence_number <= last {
            return Err(self.replay(direction, sequence_number, last, Severity::Warning, now));
        }

        if let Err(e) = self.window.check(envelope.claimed_timestamp, now) {
            tracing::debug!(%direction, sequence_number, error = %e, "Envelope outside freshness window");
            self.audit(
                AuditEventKind::InvalidTimestamp,
                envelope.sender,
                format!(
                    "{direction}: sequence {sequence_number} claims {} at {now}: {e}",
                    envelope.claimed_timestamp
                ),
                Severity::Warning,
                now,
            );
            return Err(e.into());
        }

        match self.store.check_and_advance(&direction, sequence_number) {
            Ok(()) => {},
            // Lost the commit to a concurrent copy of the same envelope.
            Err(SequenceError::Replay { last_accepted }) => {
                return Err(self.replay(
                    direction,
                    sequence_number,
                    last_accepted,
                    Severity::Critical,
                    now,
                ));
            },
            Err(e) => return Err(self.storage_failure(direction, sequence_number, e, now)),
        }

        tracing::trace!(%direction, sequence_number, "Envelope accepted");
        self.audit(
            AuditEventKind::MessageAccepted,
            envelope.sender,
            format!("{direction}: accepted sequence {sequence_number}"),
            Severity::Info,
            now,
        );

        Ok(())
    }

    fn replay(
        &self,
        direction: DirectionKey,
        sequence_number: u64,
        last_accepted: u64,
        severity: Severity,
        now: Timestamp,
    ) -> EnvelopeError {
        tracing::warn!(%direction, sequence_number, last_accepted, ?severity, "Replay detected");
        self.audit(
            AuditEventKind::ReplayDetected,
            direction.sender,
            format!(
                "{direction}: sequence {sequence_number} not above last accepted {last_accepted}"
            ),
            severity,
            now,
        );
        EnvelopeError::ReplayDetected { direction, sequence_number, last_accepted }
    }

    fn storage_failure(
        &self,
        direction: DirectionKey,
        sequence_number: u64,
        err: SequenceError,
        now: Timestamp,
    ) -> EnvelopeError {
        let err = storage_error(err);
        tracing::error!(%direction, sequence_number, error = %err, "Sequence store failed");
        self.audit(
            AuditEventKind::EnvelopeRejected,
            direction.sender,
            format!("{direction}: sequence {sequence_number} not checked: {err}"),
            Severity::Error,
            now,
        );
        err
    }

    fn audit(
        &self,
        kind: AuditEventKind,
        actor: IdentityId,
        details: String,
        severity: Severity,
        at: Timestamp,
    ) {
        record_best_effort(
            self.audit.as_ref(),
            AuditEvent::new(kind, Some(actor), details, severity, at),
        );
    }
}

fn storage_error(err: SequenceError) -> EnvelopeError {
    match err {
        SequenceError::Storage(msg) => EnvelopeError::Storage(msg),
        SequenceError::Replay { last_accepted } => {
            EnvelopeError::Storage(format!("unexpected replay verdict (last {last_accepted})"))
        },
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Mutex, PoisonError,
            atomic::{AtomicU64, Ordering},
        },
        time::Duration,
    };

    use super::*;
    use crate::{error::AuditError, sequence::SequenceTracker};

    const START: u64 = 1_700_000_000_000;

    #[derive(Clone)]
    struct ClockEnv(Arc<AtomicU64>);

    impl Environment for ClockEnv {
        fn now(&self) -> Timestamp {
            Timestamp::from_millis(self.0.load(Ordering::SeqCst))
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(0x42);
        }
    }

    #[derive(Default)]
    struct KindSink(Mutex<Vec<(AuditEventKind, Severity)>>);

    impl AuditSink for KindSink {
        fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).push((event.kind, event.severity));
            Ok(())
        }
    }

    /// Store whose every call fails.
    struct OfflineStore;

    impl SequenceStore for OfflineStore {
        fn last_accepted(&self, _: &DirectionKey) -> Result<Option<u64>, SequenceError> {
            Err(SequenceError::Storage("offline".to_string()))
        }

        fn check_and_advance(&self, _: &DirectionKey, _: u64) -> Result<(), SequenceError> {
            Err(SequenceError::Storage("offline".to_string()))
        }

        fn clear(&self) -> Result<(), SequenceError> {
            Err(SequenceError::Storage("offline".to_string()))
        }
    }

    /// Store that reports an empty direction but loses every commit, as if
    /// a concurrent copy always got there first.
    struct RacedStore;

    impl SequenceStore for RacedStore {
        fn last_accepted(&self, _: &DirectionKey) -> Result<Option<u64>, SequenceError> {
            Ok(None)
        }

        fn check_and_advance(&self, _: &DirectionKey, seq: u64) -> Result<(), SequenceError> {
            Err(SequenceError::Replay { last_accepted: seq })
        }

        fn clear(&self) -> Result<(), SequenceError> {
            Ok(())
        }
    }

    fn validator() -> (EnvelopeValidator<ClockEnv, SequenceTracker>, Arc<KindSink>) {
        let sink = Arc::new(KindSink::default());
        let env = ClockEnv(Arc::new(AtomicU64::new(START)));
        let validator =
            EnvelopeValidator::new(env, SequenceTracker::new(), FreshnessWindow::default())
                .with_audit_sink(sink.clone());
        (validator, sink)
    }

    fn envelope(sender: u64, recipient: u64, seq: u64, offset_secs: i64) -> MessageEnvelope {
        MessageEnvelope {
            sender: IdentityId(sender),
            recipient: IdentityId(recipient),
            sequence_number: seq,
            claimed_timestamp: Timestamp::from_millis(
                START.saturating_add_signed(offset_secs * 1000),
            ),
            ciphertext_ref: Bytes::from_static(b"ciphertext"),
        }
    }

    #[test]
    fn fresh_increasing_envelopes_are_accepted() {
        let (validator, sink) = validator();

        assert_eq!(validator.validate_envelope(&envelope(1, 2, 1, 0)), Ok(()));
        assert_eq!(validator.validate_envelope(&envelope(1, 2, 2, -10)), Ok(()));

        let recorded = sink.0.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![
                (AuditEventKind::MessageAccepted, Severity::Info),
                (AuditEventKind::MessageAccepted, Severity::Info),
            ]
        );
    }

    #[test]
    fn self_addressed_is_rejected_before_anything_else() {
        let (validator, sink) = validator();

        let err = validator.validate_envelope(&envelope(1, 1, 0, -3600)).unwrap_err();

        assert_eq!(err, EnvelopeError::SelfAddressed(IdentityId(1)));
        assert_eq!(
            sink.0.lock().unwrap().clone(),
            vec![(AuditEventKind::EnvelopeRejected, Severity::Warning)]
        );
    }

    #[test]
    fn replay_is_reported_even_with_stale_timestamp() {
        let (validator, sink) = validator();
        validator.validate_envelope(&envelope(1, 2, 5, 0)).unwrap();

        let err = validator.validate_envelope(&envelope(1, 2, 5, -3600)).unwrap_err();

        assert_eq!(
            err,
            EnvelopeError::ReplayDetected {
                direction: DirectionKey::new(IdentityId(1), IdentityId(2)),
                sequence_number: 5,
                last_accepted: 5,
            }
        );
        assert_eq!(
            sink.0.lock().unwrap().last().copied(),
            Some((AuditEventKind::ReplayDetected, Severity::Warning))
        );
    }

    #[test]
    fn replay_lost_at_commit_is_critical() {
        let sink = Arc::new(KindSink::default());
        let env = ClockEnv(Arc::new(AtomicU64::new(START)));
        let validator = EnvelopeValidator::new(env, RacedStore, FreshnessWindow::default())
            .with_audit_sink(sink.clone());

        let err = validator.validate_envelope(&envelope(1, 2, 3, 0)).unwrap_err();

        assert!(matches!(err, EnvelopeError::ReplayDetected { last_accepted: 3, .. }));
        assert_eq!(
            sink.0.lock().unwrap().clone(),
            vec![(AuditEventKind::ReplayDetected, Severity::Critical)]
        );
    }

    #[test]
    fn stale_envelope_does_not_consume_sequence_number() {
        let (validator, sink) = validator();

        let err = validator.validate_envelope(&envelope(1, 2, 1, -400)).unwrap_err();
        assert!(matches!(err, EnvelopeError::TooOld { .. }));
        assert_eq!(
            sink.0.lock().unwrap().last().copied(),
            Some((AuditEventKind::InvalidTimestamp, Severity::Warning))
        );

        assert_eq!(validator.validate_envelope(&envelope(1, 2, 1, 0)), Ok(()));
    }

    #[test]
    fn future_envelope_is_rejected() {
        let (validator, _) = validator();

        let err = validator.validate_envelope(&envelope(1, 2, 1, 120)).unwrap_err();

        assert_eq!(
            err,
            EnvelopeError::FromFuture {
                ahead: Duration::from_secs(120),
                max_skew: Duration::from_secs(60)
            }
        );
        assert_eq!(validator.store().last_accepted(&DirectionKey::new(IdentityId(1), IdentityId(2))), Ok(None));
    }

    #[test]
    fn sequence_zero_is_a_replay() {
        let (validator, _) = validator();

        let err = validator.validate_envelope(&envelope(1, 2, 0, 0)).unwrap_err();

        assert!(matches!(err, EnvelopeError::ReplayDetected { last_accepted: 0, .. }));
    }

    #[test]
    fn store_failure_is_transient_and_rejects() {
        let sink = Arc::new(KindSink::default());
        let env = ClockEnv(Arc::new(AtomicU64::new(START)));
        let validator = EnvelopeValidator::new(env, OfflineStore, FreshnessWindow::default())
            .with_audit_sink(sink.clone());

        let err = validator.validate_envelope(&envelope(1, 2, 1, 0)).unwrap_err();

        assert_eq!(err, EnvelopeError::Storage("offline".to_string()));
        assert!(err.is_transient());
        assert_eq!(
            sink.0.lock().unwrap().clone(),
            vec![(AuditEventKind::EnvelopeRejected, Severity::Error)]
        );
    }
}
