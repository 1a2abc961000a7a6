//! Envelope validation over a sequence store that randomly fails.
//!
//! Invariants under injected storage failures:
//! - A store failure always rejects the envelope as transient
//! - A rejected envelope never moves the counter
//! - No sequence number is ever accepted twice on a direction

use std::collections::HashSet;

use bytes::Bytes;
use parley_core::{
    DirectionKey, EnvelopeError, EnvelopeValidator, Environment, FreshnessWindow, IdentityId,
    MessageEnvelope, SequenceStore, SequenceTracker,
};
use parley_harness::SimEnv;
use parley_node::{ChaoticSequenceStore, RedbSequenceStore};
use proptest::prelude::*;
use tempfile::tempdir;

fn envelope(env: &SimEnv, forward: bool, seq: u64) -> MessageEnvelope {
    let (sender, recipient) =
        if forward { (IdentityId(1), IdentityId(2)) } else { (IdentityId(2), IdentityId(1)) };
    MessageEnvelope {
        sender,
        recipient,
        sequence_number: seq,
        claimed_timestamp: env.now(),
        ciphertext_ref: Bytes::new(),
    }
}

fn run_chaos<S: SequenceStore>(
    store: ChaoticSequenceStore<S>,
    sends: &[(bool, u64)],
) -> Result<(), TestCaseError> {
    let env = SimEnv::with_seed(1);
    let validator = EnvelopeValidator::new(env.clone(), store, FreshnessWindow::default());
    let mut accepted: HashSet<(DirectionKey, u64)> = HashSet::new();

    for &(forward, seq) in sends {
        let message = envelope(&env, forward, seq);
        let direction = message.direction();
        let before = validator.store().inner().last_accepted(&direction).unwrap();

        match validator.validate_envelope(&message) {
            Ok(()) => {
                prop_assert!(accepted.insert((direction, seq)), "accepted {} twice", seq);
                prop_assert!(seq > before.unwrap_or(0));
            },
            Err(e) => {
                let after = validator.store().inner().last_accepted(&direction).unwrap();
                prop_assert_eq!(before, after);
                if let EnvelopeError::Storage(_) = e {
                    prop_assert!(e.is_transient());
                }
            },
        }
    }

    Ok(())
}

fn sends() -> impl Strategy<Value = Vec<(bool, u64)>> {
    prop::collection::vec((any::<bool>(), 0u64..40), 1..120)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_memory_store_chaos(failure_rate in 0.0..0.8, seed in any::<u64>(), sends in sends()) {
        let store = ChaoticSequenceStore::with_seed(SequenceTracker::new(), failure_rate, seed);
        run_chaos(store, &sends)?;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_redb_store_chaos(failure_rate in 0.0..0.8, seed in any::<u64>(), sends in sends()) {
        let dir = tempdir().unwrap();
        let redb = RedbSequenceStore::open(dir.path().join("chaos.redb")).unwrap();
        let store = ChaoticSequenceStore::with_seed(redb, failure_rate, seed);
        run_chaos(store, &sends)?;
    }
}

#[test]
fn always_failing_store_accepts_nothing() {
    let env = SimEnv::with_seed(2);
    let store = ChaoticSequenceStore::with_seed(SequenceTracker::new(), 1.0, 7);
    let validator = EnvelopeValidator::new(env.clone(), store, FreshnessWindow::default());

    for seq in 1..=20 {
        let err = validator.validate_envelope(&envelope(&env, true, seq)).unwrap_err();
        assert!(err.is_transient());
    }

    assert_eq!(validator.store().injected_failures(), 20);
    assert_eq!(validator.store().inner().direction_count(), 0);
}
