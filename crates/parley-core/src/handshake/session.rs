//! Key-exchange session state machine.
//!
//! A pure state machine: no locking, no I/O, no verification. Transitions
//! check only that the session is in the right state; the manager decides
//! who may call them and whether signatures are good.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────┐ respond  ┌───────────┐ confirm  ┌───────────┐
//! │ Pending │─────────>│ Responded │─────────>│ Completed │
//! └─────────┘          └───────────┘          └───────────┘
//!      │                     │
//!      │ bad signature       │ abort / expiry
//!      │ abort / expiry      │
//!      ↓                     ↓
//! ┌──────────────────────────────┐
//! │            Failed            │
//! └──────────────────────────────┘
//! ```
//!
//! The recipient's signed key and the confirmation tag live inside the
//! phase variants, so "responded without a recipient key" or "completed
//! without a tag" cannot be represented.

use std::{fmt, mem};

use bytes::Bytes;

use crate::{
    env::Timestamp,
    error::KeyExchangeError,
    identity::{IdentityId, PublicSigningKey},
};

/// Opaque key-exchange session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u128);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Ephemeral public key material, opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EphemeralPublicKey(Bytes);

impl EphemeralPublicKey {
    /// Wrap raw key bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Random value chosen by the initiator to bind one handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandshakeNonce(Bytes);

impl HandshakeNonce {
    /// Wrap raw nonce bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Raw nonce bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Key confirmation value exchanged once both sides derived the secret.
///
/// Its format and derivation belong to the clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfirmationTag(Bytes);

impl ConfirmationTag {
    /// Wrap raw tag bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Raw tag bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// An ephemeral public key together with its owner's signature over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedOffer {
    /// Ephemeral public key
    pub ephemeral_key: EphemeralPublicKey,
    /// Signature over [`signing_payload`](crate::signature::signing_payload)
    pub signature: Bytes,
}

impl SignedOffer {
    /// Pair a key with its signature.
    pub fn new(ephemeral_key: EphemeralPublicKey, signature: impl Into<Bytes>) -> Self {
        Self { ephemeral_key, signature: signature.into() }
    }
}

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Initiator's offer recorded, waiting for the recipient
    Pending,
    /// Recipient's verified offer recorded, waiting for confirmation
    Responded,
    /// Key confirmation recorded (terminal)
    Completed,
    /// Handshake abandoned or rejected (terminal)
    Failed,
}

impl SessionState {
    /// Returns true for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Why a session ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// Recipient's signature did not verify
    SignatureInvalid,
    /// One of the parties abandoned the handshake
    Aborted {
        /// Party that aborted
        by: IdentityId,
    },
    /// Handshake did not complete within the configured lifetime
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Pending,
    Responded { response: SignedOffer },
    Completed { response: SignedOffer, confirmation: ConfirmationTag },
    Failed { reason: FailureReason },
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Self::Pending => SessionState::Pending,
            Self::Responded { .. } => SessionState::Responded,
            Self::Completed { .. } => SessionState::Completed,
            Self::Failed { .. } => SessionState::Failed,
        }
    }
}

/// One handshake attempt between an initiator and a recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExchangeSession {
    id: SessionId,
    initiator: IdentityId,
    recipient: IdentityId,
    initiator_offer: SignedOffer,
    nonce: HandshakeNonce,
    created_at: Timestamp,
    phase: Phase,
}

impl KeyExchangeSession {
    /// Create a session in [`SessionState::Pending`].
    pub fn new(
        id: SessionId,
        initiator: IdentityId,
        recipient: IdentityId,
        initiator_offer: SignedOffer,
        nonce: HandshakeNonce,
        created_at: Timestamp,
    ) -> Self {
        Self { id, initiator, recipient, initiator_offer, nonce, created_at, phase: Phase::Pending }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Party that opened the exchange.
    pub fn initiator(&self) -> IdentityId {
        self.initiator
    }

    /// Party the exchange is addressed to.
    pub fn recipient(&self) -> IdentityId {
        self.recipient
    }

    /// Initiator's signed ephemeral key.
    pub fn initiator_offer(&self) -> &SignedOffer {
        &self.initiator_offer
    }

    /// Handshake nonce.
    pub fn nonce(&self) -> &HandshakeNonce {
        &self.nonce
    }

    /// When `initiate` created the session.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.phase.state()
    }

    /// Recipient's signed ephemeral key. `Some` iff `Responded` or
    /// `Completed`.
    pub fn recipient_offer(&self) -> Option<&SignedOffer> {
        match &self.phase {
            Phase::Responded { response } | Phase::Completed { response, .. } => Some(response),
            Phase::Pending | Phase::Failed { .. } => None,
        }
    }

    /// Confirmation tag. `Some` iff `Completed`.
    pub fn confirmation(&self) -> Option<&ConfirmationTag> {
        match &self.phase {
            Phase::Completed { confirmation, .. } => Some(confirmation),
            _ => None,
        }
    }

    /// Failure reason. `Some` iff `Failed`.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match &self.phase {
            Phase::Failed { reason } => Some(*reason),
            _ => None,
        }
    }

    /// Returns true if `identity` is the initiator or the recipient.
    pub fn is_party(&self, identity: IdentityId) -> bool {
        identity == self.initiator || identity == self.recipient
    }

    /// `Pending → Responded`.
    pub fn record_response(&mut self, response: SignedOffer) -> Result<(), KeyExchangeError> {
        match self.phase {
            Phase::Pending => {
                self.phase = Phase::Responded { response };
                Ok(())
            },
            _ => Err(self.invalid_transition("respond")),
        }
    }

    /// `Responded → Completed`.
    pub fn record_confirmation(
        &mut self,
        confirmation: ConfirmationTag,
    ) -> Result<(), KeyExchangeError> {
        match mem::replace(&mut self.phase, Phase::Pending) {
            Phase::Responded { response } => {
                self.phase = Phase::Completed { response, confirmation };
                Ok(())
            },
            other => {
                self.phase = other;
                Err(self.invalid_transition("confirm"))
            },
        }
    }

    /// `Pending | Responded → Failed`.
    pub fn fail(&mut self, reason: FailureReason) -> Result<(), KeyExchangeError> {
        match self.phase {
            Phase::Pending | Phase::Responded { .. } => {
                self.phase = Phase::Failed { reason };
                Ok(())
            },
            _ => Err(self.invalid_transition("fail")),
        }
    }

    /// Snapshot of the session's public artifacts.
    ///
    /// Long-term keys come from the directory at snapshot time; `None` if a
    /// party is no longer registered.
    pub fn status(
        &self,
        initiator_signing_key: Option<PublicSigningKey>,
        recipient_signing_key: Option<PublicSigningKey>,
    ) -> SessionStatus {
        SessionStatus {
            id: self.id,
            state: self.state(),
            initiator: self.initiator,
            recipient: self.recipient,
            initiator_signing_key,
            recipient_signing_key,
            initiator_offer: self.initiator_offer.clone(),
            recipient_offer: self.recipient_offer().cloned(),
            nonce: self.nonce.clone(),
            confirmation: self.confirmation().cloned(),
            failure: self.failure_reason(),
            created_at: self.created_at,
        }
    }

    fn invalid_transition(&self, operation: &'static str) -> KeyExchangeError {
        KeyExchangeError::InvalidStateTransition {
            session_id: self.id,
            state: self.state(),
            operation,
        }
    }
}

/// Public view of a session, returned to either party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Session identifier
    pub id: SessionId,
    /// Current state
    pub state: SessionState,
    /// Initiating party
    pub initiator: IdentityId,
    /// Receiving party
    pub recipient: IdentityId,
    /// Initiator's registered long-term key
    pub initiator_signing_key: Option<PublicSigningKey>,
    /// Recipient's registered long-term key
    pub recipient_signing_key: Option<PublicSigningKey>,
    /// Initiator's signed ephemeral key
    pub initiator_offer: SignedOffer,
    /// Recipient's signed ephemeral key, once responded
    pub recipient_offer: Option<SignedOffer>,
    /// Handshake nonce
    pub nonce: HandshakeNonce,
    /// Confirmation tag, once completed
    pub confirmation: Option<ConfirmationTag>,
    /// Failure reason, once failed
    pub failure: Option<FailureReason>,
    /// Creation time
    pub created_at: Timestamp,
}
