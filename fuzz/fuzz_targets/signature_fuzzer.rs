//! Fuzz target for handshake signature verification
//!
//! # Strategy
//!
//! - Arbitrary key bytes, messages and signatures of any length
//! - Genuine signatures with a single mutation to the payload inputs
//!
//! # Invariants
//!
//! - Verification never panics on malformed keys or signatures
//! - A signature only verifies for the exact role, nonce and key it covers

#![no_main]

use arbitrary::Arbitrary;
use ed25519_dalek::{Signer, SigningKey};
use libfuzzer_sys::fuzz_target;
use parley_core::{
    Ed25519Verifier, EphemeralPublicKey, HandshakeNonce, HandshakeRole, PublicSigningKey,
    SignatureVerifier, signing_payload,
};

#[derive(Debug, Clone, Arbitrary)]
enum SignatureInput {
    Garbage { key: [u8; 32], message: Vec<u8>, signature: Vec<u8> },
    Mutated { seed: [u8; 32], nonce: Vec<u8>, ephemeral: Vec<u8>, mutation: Mutation },
}

#[derive(Debug, Clone, Arbitrary)]
enum Mutation {
    None,
    SwapRole,
    ExtendNonce(u8),
    ExtendKey(u8),
    MoveBoundary,
}

fuzz_target!(|input: SignatureInput| {
    match input {
        SignatureInput::Garbage { key, message, signature } => {
            let _ = Ed25519Verifier.verify(&PublicSigningKey(key), &message, &signature);
        },
        SignatureInput::Mutated { seed, nonce, ephemeral, mutation } => {
            let signing_key = SigningKey::from_bytes(&seed);
            let public = PublicSigningKey(signing_key.verifying_key().to_bytes());
            let signed = signing_payload(
                HandshakeRole::Initiator,
                &HandshakeNonce::new(nonce.clone()),
                &EphemeralPublicKey::new(ephemeral.clone()),
            );
            let signature = signing_key.sign(&signed).to_bytes();

            let (role, nonce, ephemeral, unchanged) = match mutation.clone() {
                Mutation::None => (HandshakeRole::Initiator, nonce, ephemeral, true),
                Mutation::SwapRole => (HandshakeRole::Responder, nonce, ephemeral, false),
                Mutation::ExtendNonce(b) => {
                    let mut nonce = nonce;
                    nonce.push(b);
                    (HandshakeRole::Initiator, nonce, ephemeral, false)
                },
                Mutation::ExtendKey(b) => {
                    let mut ephemeral = ephemeral;
                    ephemeral.push(b);
                    (HandshakeRole::Initiator, nonce, ephemeral, false)
                },
                Mutation::MoveBoundary => {
                    if ephemeral.is_empty() {
                        return;
                    }
                    let mut nonce = nonce;
                    let mut ephemeral = ephemeral;
                    nonce.push(ephemeral.remove(0));
                    (HandshakeRole::Initiator, nonce, ephemeral, false)
                },
            };

            let presented = signing_payload(
                role,
                &HandshakeNonce::new(nonce),
                &EphemeralPublicKey::new(ephemeral),
            );
            let result = Ed25519Verifier.verify(&public, &presented, &signature);

            assert_eq!(result.is_ok(), unchanged, "verification outcome wrong for {mutation:?}");
        },
    }
});
