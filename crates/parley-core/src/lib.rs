//! Parley protocol core.
//!
//! Authenticated ephemeral key exchange and replay-protected message
//! sequencing for a point-to-point channel. Everything here is Sans-IO: time
//! and randomness come from an [`Environment`], identities from an
//! [`IdentityDirectory`], and audit records leave through an [`AuditSink`].
//! The crate never touches ciphertext; it only decides whether the metadata
//! accompanying it is acceptable.
//!
//! # Components
//!
//! - [`signature`]: stateless signature verification over handshake offers
//! - [`handshake`]: key-exchange session state machine and its manager
//! - [`sequence`]: per-direction monotonic sequence counters
//! - [`freshness`]: claimed-timestamp window checks
//! - [`envelope`]: the combined accept/reject decision per inbound message
//! - [`config`]: the tunables of both halves in one place
//!
//! # Flow
//!
//! ```text
//! initiate ──> Pending ──respond──> Responded ──confirm──> Completed
//!                 │                     │
//!                 └──── bad signature / abort / expiry ───> Failed
//!
//! every message afterwards: validate_envelope(sender, recipient, seq, ts)
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod audit;
pub mod config;
pub mod env;
pub mod envelope;
pub mod error;
pub mod freshness;
pub mod handshake;
pub mod identity;
pub mod sequence;
pub mod signature;

pub use audit::{AuditEvent, AuditEventKind, AuditSink, NullAuditSink, Severity};
pub use config::ChannelConfig;
pub use env::{Environment, Timestamp};
pub use envelope::{EnvelopeValidator, MessageEnvelope};
pub use error::{
    AuditError, EnvelopeError, FreshnessError, KeyExchangeError, SequenceError, SignatureError,
};
pub use freshness::FreshnessWindow;
pub use handshake::{
    ConfirmationTag, DEFAULT_HANDSHAKE_TTL, DEFAULT_TERMINAL_RETENTION, EphemeralPublicKey,
    FailureReason, HandshakeNonce, InitiateRequest, KeyExchangeConfig, KeyExchangeManager, KeyExchangeSession, SessionId,
    SessionState, SessionStatus, SignedOffer,
};
pub use identity::{Identity, IdentityDirectory, IdentityId, PublicSigningKey};
pub use sequence::{DirectionKey, SequenceStore, SequenceTracker};
pub use signature::{Ed25519Verifier, HandshakeRole, SignatureVerifier, signing_payload};
