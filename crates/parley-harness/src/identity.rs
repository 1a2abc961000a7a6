//! Identities that can sign, and a fixed directory to register them in.

use std::collections::HashMap;

use bytes::Bytes;
use ed25519_dalek::{Signer, SigningKey};
use parley_core::{
    EphemeralPublicKey, HandshakeNonce, HandshakeRole, Identity, IdentityDirectory, IdentityId,
    PublicSigningKey, SignedOffer, signing_payload,
};

/// An identity together with its private signing key.
///
/// Keys are derived from the id, so the same id always has the same key.
#[derive(Clone)]
pub struct TestIdentity {
    id: IdentityId,
    username: String,
    signing_key: SigningKey,
}

impl TestIdentity {
    /// Identity `id` named `username`.
    pub fn new(id: u64, username: &str) -> Self {
        let mut seed = [0u8; 32];
        seed[..8].copy_from_slice(&id.to_be_bytes());
        seed[8..].fill(0x5A);

        Self {
            id: IdentityId(id),
            username: username.to_string(),
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Directory reference.
    pub fn id(&self) -> IdentityId {
        self.id
    }

    /// Public long-term key.
    pub fn public_key(&self) -> PublicSigningKey {
        PublicSigningKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Public view, as the directory would return it.
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.id,
            username: self.username.clone(),
            signing_key: self.public_key(),
        }
    }

    /// Ephemeral key signed for `role` in the handshake bound by `nonce`.
    pub fn sign_offer(
        &self,
        role: HandshakeRole,
        nonce: &HandshakeNonce,
        ephemeral_key: EphemeralPublicKey,
    ) -> SignedOffer {
        let signature = self.signing_key.sign(&signing_payload(role, nonce, &ephemeral_key));
        SignedOffer::new(ephemeral_key, Bytes::copy_from_slice(&signature.to_bytes()))
    }

    /// Ephemeral key derived from `tag`, for tests that only care that keys
    /// differ.
    pub fn ephemeral_key(&self, tag: u8) -> EphemeralPublicKey {
        let mut key = vec![tag; 32];
        key[..8].copy_from_slice(&self.id.0.to_be_bytes());
        EphemeralPublicKey::new(key)
    }
}

/// Directory over a fixed set of identities.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    identities: HashMap<IdentityId, Identity>,
}

impl StaticDirectory {
    /// Directory containing `identities`.
    pub fn new<'a>(identities: impl IntoIterator<Item = &'a TestIdentity>) -> Self {
        Self {
            identities: identities
                .into_iter()
                .map(|identity| (identity.id(), identity.identity()))
                .collect(),
        }
    }
}

impl IdentityDirectory for StaticDirectory {
    fn resolve(&self, id: IdentityId) -> Option<Identity> {
        self.identities.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use parley_core::{Ed25519Verifier, SignatureVerifier};

    use super::*;

    #[test]
    fn signed_offer_verifies_against_own_key() {
        let alice = TestIdentity::new(1, "alice");
        let nonce = HandshakeNonce::new(vec![3; 16]);
        let offer = alice.sign_offer(HandshakeRole::Initiator, &nonce, alice.ephemeral_key(1));

        let payload = signing_payload(HandshakeRole::Initiator, &nonce, &offer.ephemeral_key);
        assert_eq!(Ed25519Verifier.verify(&alice.public_key(), &payload, &offer.signature), Ok(()));
    }

    #[test]
    fn keys_are_stable_per_id() {
        assert_eq!(TestIdentity::new(4, "a").public_key(), TestIdentity::new(4, "b").public_key());
        assert_ne!(TestIdentity::new(4, "a").public_key(), TestIdentity::new(5, "a").public_key());
    }
}
