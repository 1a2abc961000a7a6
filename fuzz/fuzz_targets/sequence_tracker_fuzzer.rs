//! Fuzz target for the sequence tracker
//!
//! # Strategy
//!
//! - Few identities so directions collide and reverse often
//! - Sequence numbers drawn near the running maximum (duplicates, off-by-one,
//!   zero) as well as anywhere in `u64`
//! - Occasional clears
//!
//! # Invariants
//!
//! - Accepted iff strictly above the direction's last accepted number
//! - A rejection reports the exact last accepted number
//! - Directions never affect each other
//! - Zero is never accepted

#![no_main]

use std::collections::HashMap;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_core::{DirectionKey, IdentityId, SequenceError, SequenceStore, SequenceTracker};

#[derive(Debug, Clone, Arbitrary)]
enum SequenceOp {
    Advance { sender: u8, recipient: u8, sequence: SequenceChoice },
    Clear,
}

#[derive(Debug, Clone, Arbitrary)]
enum SequenceChoice {
    Zero,
    Last,
    LastPlus(u8),
    LastMinus(u8),
    Any(u64),
}

fuzz_target!(|ops: Vec<SequenceOp>| {
    let tracker = SequenceTracker::new();
    let mut model: HashMap<DirectionKey, u64> = HashMap::new();

    for op in ops {
        match op {
            SequenceOp::Advance { sender, recipient, sequence } => {
                let direction =
                    DirectionKey::new(IdentityId(u64::from(sender % 4)), IdentityId(u64::from(recipient % 4)));
                let last = model.get(&direction).copied().unwrap_or(0);
                let n = match sequence {
                    SequenceChoice::Zero => 0,
                    SequenceChoice::Last => last,
                    SequenceChoice::LastPlus(d) => last.saturating_add(u64::from(d)),
                    SequenceChoice::LastMinus(d) => last.saturating_sub(u64::from(d)),
                    SequenceChoice::Any(n) => n,
                };

                match tracker.check_and_advance(&direction, n) {
                    Ok(()) => {
                        assert!(n > last, "accepted {n} with last {last} on {direction}");
                        model.insert(direction, n);
                    },
                    Err(SequenceError::Replay { last_accepted }) => {
                        assert!(n <= last, "rejected {n} with last {last} on {direction}");
                        assert_eq!(last_accepted, last);
                    },
                    Err(SequenceError::Storage(e)) => panic!("in-memory store failed: {e}"),
                }
            },
            SequenceOp::Clear => {
                tracker.clear().unwrap();
                model.clear();
            },
        }

        for (direction, last) in &model {
            assert_eq!(tracker.last_accepted(direction).unwrap(), Some(*last));
        }
    }
});
