//! Authenticated ephemeral key exchange.
//!
//! - [`session`]: the per-handshake state machine (pure)
//! - [`manager`]: concurrent session registry that authorizes callers,
//!   verifies signatures and drives the state machine

pub mod manager;
pub mod session;

pub use manager::{
    DEFAULT_HANDSHAKE_TTL, DEFAULT_TERMINAL_RETENTION, InitiateRequest, KeyExchangeConfig,
    KeyExchangeManager,
};
pub use session::{
    ConfirmationTag, EphemeralPublicKey, FailureReason, HandshakeNonce, KeyExchangeSession,
    SessionId, SessionState, SessionStatus, SignedOffer,
};
