//! Scripted scenarios run by the `parley` binary.
//!
//! Each scenario drives a real [`ChannelService`] the way clients would and
//! fails if the service accepts something it must reject. Scenarios can be
//! rerun against durable counters: they continue from whatever the store
//! already accepted.

use std::{error::Error, sync::Arc, time::Duration};

use bytes::Bytes;
use ed25519_dalek::{Signer, SigningKey};
use parley_core::{
    ConfirmationTag, DirectionKey, EnvelopeError, EphemeralPublicKey, Environment,
    HandshakeNonce, HandshakeRole, Identity, IdentityId, InitiateRequest, KeyExchangeError,
    MessageEnvelope, PublicSigningKey, SequenceStore, SignedOffer, signing_payload,
};

use crate::{directory::MemoryDirectory, service::ChannelService, system_env::SystemEnv};

type Service = ChannelService<SystemEnv, Arc<MemoryDirectory>>;
type DemoResult = Result<(), Box<dyn Error>>;

/// A registered party holding its private key.
struct Party {
    identity: Identity,
    signing_key: SigningKey,
}

impl Party {
    fn register(env: &SystemEnv, directory: &MemoryDirectory, id: u64, username: &str) -> Self {
        let mut seed = [0u8; 32];
        env.random_bytes(&mut seed);
        let signing_key = SigningKey::from_bytes(&seed);
        let identity = Identity {
            id: IdentityId(id),
            username: username.to_string(),
            signing_key: PublicSigningKey(signing_key.verifying_key().to_bytes()),
        };
        directory.register(identity.clone());

        Self { identity, signing_key }
    }

    fn id(&self) -> IdentityId {
        self.identity.id
    }

    fn offer(&self, env: &SystemEnv, role: HandshakeRole, nonce: &HandshakeNonce) -> SignedOffer {
        let ephemeral_key = EphemeralPublicKey::new(random(env, 32));
        let signature = self.signing_key.sign(&signing_payload(role, nonce, &ephemeral_key));
        SignedOffer::new(ephemeral_key, Bytes::copy_from_slice(&signature.to_bytes()))
    }
}

fn random(env: &SystemEnv, len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    env.random_bytes(&mut bytes);
    bytes
}

/// Alice and Bob exchange keys while Mallory tries to answer for Bob.
pub fn handshake(env: &SystemEnv, directory: &MemoryDirectory, service: &Service) -> DemoResult {
    let alice = Party::register(env, directory, 1, "alice");
    let bob = Party::register(env, directory, 2, "bob");
    let mallory = Party::register(env, directory, 3, "mallory");

    tracing::info!("Scenario: impostor answers a key exchange");
    let nonce = HandshakeNonce::new(random(env, 16));
    let opened = service.initiate(InitiateRequest {
        initiator: alice.id(),
        recipient: bob.id(),
        offer: alice.offer(env, HandshakeRole::Initiator, &nonce),
        nonce: nonce.clone(),
    })?;
    tracing::info!(session_id = %opened.id, "Alice opened a key exchange with Bob");

    match service.respond(opened.id, bob.id(), mallory.offer(env, HandshakeRole::Responder, &nonce)) {
        Err(KeyExchangeError::SignatureInvalid { .. }) => {
            tracing::info!("Mallory's substituted key was rejected; exchange failed");
        },
        Ok(_) => return Err("impostor response was accepted".into()),
        Err(e) => return Err(e.into()),
    }

    match service.get_status(opened.id, mallory.id()) {
        Err(KeyExchangeError::Unauthorized { .. }) => {
            tracing::info!("Mallory cannot read the exchange");
        },
        Ok(_) => return Err("third party read a key exchange".into()),
        Err(e) => return Err(e.into()),
    }

    tracing::info!("Scenario: honest key exchange");
    let nonce = HandshakeNonce::new(random(env, 16));
    let opened = service.initiate(InitiateRequest {
        initiator: alice.id(),
        recipient: bob.id(),
        offer: alice.offer(env, HandshakeRole::Initiator, &nonce),
        nonce: nonce.clone(),
    })?;

    let pending = service.pending_for(bob.id());
    tracing::info!(pending = pending.len(), "Bob polls for pending exchanges");

    service.respond(opened.id, bob.id(), bob.offer(env, HandshakeRole::Responder, &nonce))?;
    let done = service.confirm(opened.id, alice.id(), ConfirmationTag::new(random(env, 32)))?;
    tracing::info!(session_id = %done.id, state = ?done.state, "Key exchange finished");

    Ok(())
}

/// A captured envelope is replayed, and stale or future envelopes arrive.
pub fn replay(env: &SystemEnv, directory: &MemoryDirectory, service: &Service) -> DemoResult {
    let alice = Party::register(env, directory, 1, "alice");
    let bob = Party::register(env, directory, 2, "bob");
    let direction = DirectionKey::new(alice.id(), bob.id());
    let base = service.envelopes().store().last_accepted(&direction)?.unwrap_or(0);
    let envelope = |offset: u64, claimed_timestamp| MessageEnvelope {
        sender: alice.id(),
        recipient: bob.id(),
        sequence_number: base + offset,
        claimed_timestamp,
        ciphertext_ref: Bytes::from(random(env, 16)),
    };

    tracing::info!(%direction, last_accepted = base, "Scenario: replayed envelope");
    let first = envelope(1, env.now());
    service.validate_envelope(&first)?;
    service.validate_envelope(&envelope(2, env.now()))?;
    tracing::info!(first = base + 1, second = base + 2, "Alice's messages accepted");

    match service.validate_envelope(&first) {
        Err(EnvelopeError::ReplayDetected { sequence_number, .. }) => {
            tracing::info!(sequence_number, "Replayed message rejected");
        },
        Ok(()) => return Err("replayed envelope was accepted".into()),
        Err(e) => return Err(e.into()),
    }

    tracing::info!("Scenario: stale and future envelopes");
    let stale = envelope(3, env.now().saturating_sub(Duration::from_secs(10 * 60)));
    match service.validate_envelope(&stale) {
        Err(EnvelopeError::TooOld { age, .. }) => {
            tracing::info!(age_secs = age.as_secs(), "Ten minute old message rejected");
        },
        Ok(()) => return Err("stale envelope was accepted".into()),
        Err(e) => return Err(e.into()),
    }

    let future = envelope(3, env.now().saturating_add(Duration::from_secs(5 * 60)));
    match service.validate_envelope(&future) {
        Err(EnvelopeError::FromFuture { ahead, .. }) => {
            tracing::info!(ahead_secs = ahead.as_secs(), "Message from the future rejected");
        },
        Ok(()) => return Err("future envelope was accepted".into()),
        Err(e) => return Err(e.into()),
    }

    // Freshness rejections did not consume the third sequence number.
    service.validate_envelope(&envelope(3, env.now()))?;
    tracing::info!(sequence_number = base + 3, "Corrected resend accepted");

    Ok(())
}
