//! Signature verification for handshake offers.
//!
//! Each party signs its ephemeral public key with its long-term identity
//! key. An intermediary who substitutes its own ephemeral key cannot produce
//! a signature that verifies against the legitimate party's registered key.
//!
//! The signed bytes are not the bare ephemeral key: [`signing_payload`]
//! binds the signer's role and the handshake nonce as well, so a signed
//! offer lifted from one handshake does not verify in another.

use ed25519_dalek::{Signature, VerifyingKey};

use crate::{
    error::SignatureError,
    handshake::{EphemeralPublicKey, HandshakeNonce},
    identity::PublicSigningKey,
};

/// Domain separation prefix for handshake signatures.
pub const SIGNING_CONTEXT: &[u8] = b"parley-kex-v1";

/// Which side of the handshake produced a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeRole {
    /// Party that called `initiate`
    Initiator,
    /// Party that called `respond`
    Responder,
}

impl HandshakeRole {
    fn tag(self) -> u8 {
        match self {
            Self::Initiator => 0x01,
            Self::Responder => 0x02,
        }
    }
}

/// Bytes a party signs to authenticate its ephemeral key.
///
/// Layout: `SIGNING_CONTEXT || role || len(nonce) || nonce || len(key) ||
/// key`, lengths as big-endian `u32`.
pub fn signing_payload(
    role: HandshakeRole,
    nonce: &HandshakeNonce,
    ephemeral_key: &EphemeralPublicKey,
) -> Vec<u8> {
    let nonce = nonce.as_bytes();
    let key = ephemeral_key.as_bytes();

    let mut payload = Vec::with_capacity(SIGNING_CONTEXT.len() + 9 + nonce.len() + key.len());
    payload.extend_from_slice(SIGNING_CONTEXT);
    payload.push(role.tag());
    payload.extend_from_slice(&(nonce.len() as u32).to_be_bytes());
    payload.extend_from_slice(nonce);
    payload.extend_from_slice(&(key.len() as u32).to_be_bytes());
    payload.extend_from_slice(key);
    payload
}

/// Stateless signature check.
pub trait SignatureVerifier: Send + Sync {
    /// Verify `signature` over `message` against `key`.
    fn verify(
        &self,
        key: &PublicSigningKey,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), SignatureError>;
}

/// Ed25519 verifier with strict (non-malleable) verification.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(
        &self,
        key: &PublicSigningKey,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), SignatureError> {
        let verifying_key =
            VerifyingKey::from_bytes(key.as_bytes()).map_err(|_| SignatureError::MalformedKey)?;

        let signature =
            Signature::from_slice(signature).map_err(|_| SignatureError::MalformedSignature)?;

        verifying_key.verify_strict(message, &signature).map_err(|_| SignatureError::Mismatch)
    }
}
