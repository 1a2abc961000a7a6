//! Fuzz target for envelope validation
//!
//! # Strategy
//!
//! - Arbitrary senders, recipients (including self-addressed), sequence
//!   numbers and claimed timestamps relative to a moving virtual clock
//! - Clock jumps forwards and backwards between envelopes
//!
//! # Invariants
//!
//! - Self-addressed envelopes are always rejected and touch no counter
//! - Replays are reported before freshness failures
//! - A freshness failure never consumes the sequence number
//! - NEVER panic

#![no_main]

use std::{collections::HashMap, time::Duration};

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use parley_core::{
    DirectionKey, EnvelopeError, EnvelopeValidator, Environment, FreshnessWindow, IdentityId,
    MessageEnvelope, SequenceTracker, Timestamp,
};
use parley_harness::SimEnv;

#[derive(Debug, Clone, Arbitrary)]
enum EnvelopeOp {
    Send { sender: u8, recipient: u8, sequence: u8, offset_secs: i16 },
    Advance { secs: u16 },
    Rewind { secs: u16 },
}

fuzz_target!(|ops: Vec<EnvelopeOp>| {
    let env = SimEnv::with_seed(0);
    let window = FreshnessWindow::default();
    let validator = EnvelopeValidator::new(env.clone(), SequenceTracker::new(), window);
    let mut last: HashMap<DirectionKey, u64> = HashMap::new();

    for op in ops {
        match op {
            EnvelopeOp::Advance { secs } => env.advance(Duration::from_secs(u64::from(secs))),
            EnvelopeOp::Rewind { secs } => {
                env.set_now(env.now().saturating_sub(Duration::from_secs(u64::from(secs))));
            },
            EnvelopeOp::Send { sender, recipient, sequence, offset_secs } => {
                let now = env.now();
                let claimed = Timestamp::from_millis(
                    now.as_millis().saturating_add_signed(i64::from(offset_secs) * 1000),
                );
                let envelope = MessageEnvelope {
                    sender: IdentityId(u64::from(sender % 3)),
                    recipient: IdentityId(u64::from(recipient % 3)),
                    sequence_number: u64::from(sequence % 16),
                    claimed_timestamp: claimed,
                    ciphertext_ref: Bytes::new(),
                };
                let direction = envelope.direction();
                let previous = last.get(&direction).copied().unwrap_or(0);

                let result = validator.validate_envelope(&envelope);

                if envelope.sender == envelope.recipient {
                    assert!(matches!(result, Err(EnvelopeError::SelfAddressed(_))));
                } else if envelope.sequence_number <= previous {
                    assert!(matches!(result, Err(EnvelopeError::ReplayDetected { .. })));
                } else if window.check(claimed, now).is_err() {
                    assert!(matches!(
                        result,
                        Err(EnvelopeError::TooOld { .. } | EnvelopeError::FromFuture { .. })
                    ));
                } else {
                    assert_eq!(result, Ok(()));
                    last.insert(direction, envelope.sequence_number);
                }
            },
        }
    }
});
