//! Error types for the Parley protocol core.
//!
//! One enum per decision: key-exchange operations, envelope validation, and
//! the smaller building blocks they compose (sequence store, freshness
//! window, signature verification, audit sink). Every variant is a
//! recoverable rejection reported to the caller; none of them is fatal to
//! the process.

use std::time::Duration;

use thiserror::Error;

use crate::{
    handshake::{SessionId, SessionState},
    identity::IdentityId,
    sequence::DirectionKey,
};

/// Errors from key-exchange operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyExchangeError {
    /// Recipient of a new exchange is not registered
    #[error("unknown recipient: {0}")]
    UnknownRecipient(IdentityId),

    /// Initiator of a new exchange is not registered
    #[error("unknown initiator: {0}")]
    UnknownInitiator(IdentityId),

    /// No session with this id
    #[error("key exchange not found: {0}")]
    SessionNotFound(SessionId),

    /// Requester is not allowed to act on this session
    #[error("{requester} is not authorized for key exchange {session_id}")]
    Unauthorized {
        /// Session that was targeted
        session_id: SessionId,
        /// Identity that attempted the operation
        requester: IdentityId,
    },

    /// Signature over an ephemeral key did not verify against the signer's
    /// registered key
    #[error("invalid signature from {signer}")]
    SignatureInvalid {
        /// Identity whose registered key was used for verification
        signer: IdentityId,
    },

    /// Operation not allowed in the session's current state
    #[error("invalid state transition: cannot {operation} key exchange {session_id} in state {state:?}")]
    InvalidStateTransition {
        /// Session that was targeted
        session_id: SessionId,
        /// State the session was in
        state: SessionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Initiator already used this handshake nonce
    #[error("handshake nonce already used by {initiator}")]
    NonceReused {
        /// Initiator that reused the nonce
        initiator: IdentityId,
    },
}

impl KeyExchangeError {
    /// Returns true if this error indicates a misbehaving or malicious party.
    ///
    /// Lookups that miss and state conflicts can happen to honest callers
    /// racing each other (e.g., both parties confirming at once). Bad
    /// signatures, wrong parties and nonce reuse cannot.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::SignatureInvalid { .. } | Self::Unauthorized { .. } | Self::NonceReused { .. }
        )
    }
}

/// Reasons an inbound message envelope is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Sender and recipient are the same identity
    #[error("envelope from {0} is addressed to itself")]
    SelfAddressed(IdentityId),

    /// Sequence number is not greater than the last accepted one
    #[error(
        "replay detected on {direction}: sequence {sequence_number} (expected > {last_accepted})"
    )]
    ReplayDetected {
        /// Direction the envelope travelled
        direction: DirectionKey,
        /// Sequence number presented
        sequence_number: u64,
        /// Last sequence number accepted on this direction
        last_accepted: u64,
    },

    /// Claimed timestamp is older than the freshness window allows
    #[error("message too old: {age:?} old (max {max_age:?})")]
    TooOld {
        /// How far the claimed timestamp lies in the past
        age: Duration,
        /// Configured maximum age
        max_age: Duration,
    },

    /// Claimed timestamp is further in the future than the allowed skew
    #[error("message from the future: {ahead:?} ahead (max {max_skew:?})")]
    FromFuture {
        /// How far the claimed timestamp lies in the future
        ahead: Duration,
        /// Configured maximum forward skew
        max_skew: Duration,
    },

    /// Sequence store failed; the envelope was not accepted
    #[error("sequence store error: {0}")]
    Storage(String),
}

impl EnvelopeError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Only store failures are transient. Replays and stale or future
    /// timestamps are properties of the envelope itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<FreshnessError> for EnvelopeError {
    fn from(err: FreshnessError) -> Self {
        match err {
            FreshnessError::TooOld { age, max_age } => Self::TooOld { age, max_age },
            FreshnessError::FromFuture { ahead, max_skew } => Self::FromFuture { ahead, max_skew },
        }
    }
}

/// Freshness window violations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessError {
    /// Claimed time is before `now - max_age`
    #[error("timestamp {age:?} old exceeds max age {max_age:?}")]
    TooOld {
        /// Distance into the past
        age: Duration,
        /// Configured maximum age
        max_age: Duration,
    },

    /// Claimed time is after `now + max_skew`
    #[error("timestamp {ahead:?} ahead exceeds max skew {max_skew:?}")]
    FromFuture {
        /// Distance into the future
        ahead: Duration,
        /// Configured maximum forward skew
        max_skew: Duration,
    },
}

/// Errors from a [`SequenceStore`](crate::sequence::SequenceStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    /// Sequence number not strictly greater than the last accepted one
    #[error("sequence number not above last accepted {last_accepted}")]
    Replay {
        /// Last accepted sequence number for the direction
        last_accepted: u64,
    },

    /// Backing store failed
    #[error("storage error: {0}")]
    Storage(String),
}

/// Signature verification failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    /// Public key bytes do not decode to a valid key
    #[error("malformed public key")]
    MalformedKey,

    /// Signature bytes have the wrong length or encoding
    #[error("malformed signature")]
    MalformedSignature,

    /// Signature is well-formed but does not match message and key
    #[error("signature mismatch")]
    Mismatch,
}

/// Audit sink failures. Never surfaced to protocol callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    /// Sink cannot accept records right now (full buffer, closed channel)
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),

    /// Sink failed while writing the record
    #[error("audit write failed: {0}")]
    Write(String),
}
