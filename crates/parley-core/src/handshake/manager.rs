//! Concurrent key-exchange registry.
//!
//! Owns every [`KeyExchangeSession`] and is the only code that mutates
//! them. Each operation authorizes the caller against the session's
//! parties, verifies signatures through the configured
//! [`SignatureVerifier`], applies the transition, and reports the outcome
//! to the audit sink.
//!
//! # Concurrency
//!
//! Sessions live in a sharded map of `Arc<Mutex<_>>`. The shard lock is
//! held only long enough to clone the handle; the transition itself runs
//! under the per-session mutex. Two requests for the same session are
//! serialized, requests for different sessions never wait on each other's
//! verification.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};

use super::session::{
    ConfirmationTag, FailureReason, HandshakeNonce, KeyExchangeSession, SessionId, SessionState,
    SessionStatus, SignedOffer,
};
use crate::{
    audit::{AuditEvent, AuditEventKind, AuditSink, NullAuditSink, Severity, record_best_effort},
    env::{Environment, Timestamp},
    error::{KeyExchangeError, SignatureError},
    identity::{Identity, IdentityDirectory, IdentityId},
    signature::{Ed25519Verifier, HandshakeRole, SignatureVerifier, signing_payload},
};

/// Lifetime of a handshake that has not reached a terminal state.
pub const DEFAULT_HANDSHAKE_TTL: Duration = Duration::from_secs(10 * 60);

/// How long a finished handshake stays readable after its TTL has passed.
pub const DEFAULT_TERMINAL_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Key-exchange configuration.
#[derive(Debug, Clone)]
pub struct KeyExchangeConfig {
    /// Verify the initiator's signature at `initiate`. When off, only the
    /// responder is authenticated by this core.
    pub verify_initiator_signature: bool,
    /// Age after which unfinished handshakes are failed by
    /// [`KeyExchangeManager::expire_stale`]
    pub handshake_ttl: Duration,
    /// Extra time a terminal session (and its nonce) is kept past
    /// `handshake_ttl` before [`KeyExchangeManager::evict_terminal`] drops it
    pub terminal_retention: Duration,
}

impl Default for KeyExchangeConfig {
    fn default() -> Self {
        Self {
            verify_initiator_signature: true,
            handshake_ttl: DEFAULT_HANDSHAKE_TTL,
            terminal_retention: DEFAULT_TERMINAL_RETENTION,
        }
    }
}

/// Everything the initiator supplies to open a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateRequest {
    /// Party opening the exchange
    pub initiator: IdentityId,
    /// Party the exchange is addressed to
    pub recipient: IdentityId,
    /// Initiator's signed ephemeral key
    pub offer: SignedOffer,
    /// Handshake-binding random value
    pub nonce: HandshakeNonce,
}

type SessionHandle = Arc<Mutex<KeyExchangeSession>>;

/// Key-exchange registry and driver.
pub struct KeyExchangeManager<E, D, V = Ed25519Verifier> {
    env: E,
    directory: D,
    verifier: V,
    audit: Arc<dyn AuditSink>,
    config: KeyExchangeConfig,
    sessions: DashMap<SessionId, SessionHandle>,
    /// `(initiator, nonce)` pairs already used, mapped to their session
    used_nonces: DashMap<(IdentityId, HandshakeNonce), SessionId>,
}

impl<E, D, V> KeyExchangeManager<E, D, V>
where
    E: Environment,
    D: IdentityDirectory,
    V: SignatureVerifier,
{
    /// Create a manager with no sessions. Audit records are discarded until
    /// a sink is attached with [`Self::with_audit_sink`].
    pub fn new(env: E, directory: D, verifier: V, config: KeyExchangeConfig) -> Self {
        Self {
            env,
            directory,
            verifier,
            audit: Arc::new(NullAuditSink),
            config,
            sessions: DashMap::new(),
            used_nonces: DashMap::new(),
        }
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &KeyExchangeConfig {
        &self.config
    }

    /// Number of sessions held, terminal ones included.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Open a handshake in [`SessionState::Pending`].
    ///
    /// # Errors
    ///
    /// - `UnknownRecipient` if the recipient does not resolve
    /// - `UnknownInitiator` / `SignatureInvalid` if initiator verification is
    ///   enabled and the initiator is unregistered or the signature is bad
    /// - `NonceReused` if the initiator already used this nonce
    pub fn initiate(&self, request: InitiateRequest) -> Result<SessionStatus, KeyExchangeError> {
        let now = self.env.now();
        let InitiateRequest { initiator, recipient, offer, nonce } = request;

        let Some(recipient_identity) = self.directory.resolve(recipient) else {
            self.audit(
                AuditEventKind::KeyExchangeFailed,
                initiator,
                format!("failed to initiate key exchange: unknown recipient {recipient}"),
                Severity::Error,
                now,
            );
            return Err(KeyExchangeError::UnknownRecipient(recipient));
        };

        let initiator_identity = self.directory.resolve(initiator);

        if self.config.verify_initiator_signature {
            let Some(identity) = &initiator_identity else {
                self.audit(
                    AuditEventKind::KeyExchangeFailed,
                    initiator,
                    format!("failed to initiate key exchange: unknown initiator {initiator}"),
                    Severity::Error,
                    now,
                );
                return Err(KeyExchangeError::UnknownInitiator(initiator));
            };

            if let Err(e) = self.verify_offer(identity, HandshakeRole::Initiator, &nonce, &offer) {
                tracing::warn!(%initiator, %recipient, error = %e, "Initiator signature rejected");
                self.audit(
                    AuditEventKind::SignatureInvalid,
                    initiator,
                    format!(
                        "initiator signature for key exchange with {} rejected: {e}",
                        recipient_identity.username
                    ),
                    Severity::Critical,
                    now,
                );
                return Err(KeyExchangeError::SignatureInvalid { signer: initiator });
            }
        }

        let session_id = match self.used_nonces.entry((initiator, nonce.clone())) {
            Entry::Occupied(_) => {
                self.audit(
                    AuditEventKind::KeyExchangeFailed,
                    initiator,
                    format!(
                        "handshake nonce reused for key exchange with {}",
                        recipient_identity.username
                    ),
                    Severity::Critical,
                    now,
                );
                return Err(KeyExchangeError::NonceReused { initiator });
            },
            Entry::Vacant(slot) => {
                let session_id = self.insert_session(initiator, recipient, offer, nonce, now);
                slot.insert(session_id);
                session_id
            },
        };

        tracing::debug!(%session_id, %initiator, %recipient, "Key exchange initiated");
        self.audit(
            AuditEventKind::KeyExchangeInitiated,
            initiator,
            format!("key exchange initiated with {}", recipient_identity.username),
            Severity::Info,
            now,
        );

        let handle = self.session(session_id, initiator, now)?;
        let session = lock(&handle);
        Ok(session.status(
            initiator_identity.map(|identity| identity.signing_key),
            Some(recipient_identity.signing_key),
        ))
    }

    /// Record the recipient's signed ephemeral key.
    ///
    /// A signature that does not verify against the responder's registered
    /// key fails the session permanently; a retry needs a new `initiate`.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound`
    /// - `Unauthorized` if `responder` is not the session's recipient
    /// - `InvalidStateTransition` if the session is not `Pending`
    /// - `UnknownRecipient` if the responder is no longer registered
    /// - `SignatureInvalid` if verification fails (session is now `Failed`)
    pub fn respond(
        &self,
        session_id: SessionId,
        responder: IdentityId,
        offer: SignedOffer,
    ) -> Result<SessionStatus, KeyExchangeError> {
        let now = self.env.now();
        let handle = self.session(session_id, responder, now)?;
        let mut session = lock(&handle);

        if responder != session.recipient() {
            drop(session);
            return Err(self.unauthorized(session_id, responder, "respond to", now));
        }

        if session.state() != SessionState::Pending {
            let err = KeyExchangeError::InvalidStateTransition {
                session_id,
                state: session.state(),
                operation: "respond",
            };
            drop(session);
            tracing::warn!(%session_id, %responder, "Response to a settled key exchange");
            return Err(self.refused(responder, err, Severity::Warning, now));
        }

        let Some(identity) = self.directory.resolve(responder) else {
            drop(session);
            return Err(self.refused(
                responder,
                KeyExchangeError::UnknownRecipient(responder),
                Severity::Error,
                now,
            ));
        };

        let initiator = session.initiator();
        let initiator_identity = self.directory.resolve(initiator);
        let initiator_name = display_name(initiator_identity.as_ref(), initiator);

        if let Err(e) = self.verify_offer(&identity, HandshakeRole::Responder, session.nonce(), &offer)
        {
            session
                .fail(FailureReason::SignatureInvalid)
                .map_err(|err| self.refused(responder, err, Severity::Warning, now))?;
            drop(session);

            tracing::warn!(%session_id, %responder, error = %e, "Responder signature rejected");
            self.audit(
                AuditEventKind::SignatureInvalid,
                responder,
                format!("signature on response to {initiator_name} rejected: {e}"),
                Severity::Critical,
                now,
            );
            self.audit(
                AuditEventKind::KeyExchangeFailed,
                responder,
                format!("key exchange {session_id} with {initiator_name} failed: invalid signature"),
                Severity::Error,
                now,
            );
            return Err(KeyExchangeError::SignatureInvalid { signer: responder });
        }

        session
            .record_response(offer)
            .map_err(|err| self.refused(responder, err, Severity::Warning, now))?;
        let status = session.status(
            initiator_identity.map(|identity| identity.signing_key),
            Some(identity.signing_key),
        );
        drop(session);

        tracing::debug!(%session_id, %responder, "Key exchange responded");
        self.audit(
            AuditEventKind::KeyExchangeResponded,
            responder,
            format!("responded to key exchange from {initiator_name}"),
            Severity::Info,
            now,
        );

        Ok(status)
    }

    /// Record the key confirmation tag, completing the handshake.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound`
    /// - `Unauthorized` if `confirmer` is not a party to the session
    /// - `InvalidStateTransition` if the session is not `Responded`
    pub fn confirm(
        &self,
        session_id: SessionId,
        confirmer: IdentityId,
        tag: ConfirmationTag,
    ) -> Result<SessionStatus, KeyExchangeError> {
        let now = self.env.now();
        let handle = self.session(session_id, confirmer, now)?;
        let mut session = lock(&handle);

        if !session.is_party(confirmer) {
            drop(session);
            return Err(self.unauthorized(session_id, confirmer, "confirm", now));
        }

        if let Err(err) = session.record_confirmation(tag) {
            drop(session);
            return Err(self.refused(confirmer, err, Severity::Warning, now));
        }
        let status = self.snapshot(&session);
        drop(session);

        tracing::debug!(%session_id, %confirmer, "Key exchange completed");
        self.audit(
            AuditEventKind::KeyExchangeCompleted,
            confirmer,
            format!("key exchange {session_id} confirmed"),
            Severity::Info,
            now,
        );

        Ok(status)
    }

    /// Current state and public artifacts of a session.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound`
    /// - `Unauthorized` if `requester` is not a party to the session
    pub fn get_status(
        &self,
        session_id: SessionId,
        requester: IdentityId,
    ) -> Result<SessionStatus, KeyExchangeError> {
        let now = self.env.now();
        let handle = self.session(session_id, requester, now)?;
        let session = lock(&handle);

        if !session.is_party(requester) {
            drop(session);
            return Err(self.unauthorized(session_id, requester, "read", now));
        }

        Ok(self.snapshot(&session))
    }

    /// Abandon an unfinished handshake.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound`
    /// - `Unauthorized` if `requester` is not a party to the session
    /// - `InvalidStateTransition` if the session is already terminal
    pub fn abort(
        &self,
        session_id: SessionId,
        requester: IdentityId,
    ) -> Result<SessionStatus, KeyExchangeError> {
        let now = self.env.now();
        let handle = self.session(session_id, requester, now)?;
        let mut session = lock(&handle);

        if !session.is_party(requester) {
            drop(session);
            return Err(self.unauthorized(session_id, requester, "abort", now));
        }

        if let Err(err) = session.fail(FailureReason::Aborted { by: requester }) {
            drop(session);
            return Err(self.refused(requester, err, Severity::Warning, now));
        }
        let status = self.snapshot(&session);
        drop(session);

        self.audit(
            AuditEventKind::KeyExchangeFailed,
            requester,
            format!("key exchange {session_id} aborted"),
            Severity::Warning,
            now,
        );

        Ok(status)
    }

    /// Pending handshakes addressed to `recipient`, oldest first.
    pub fn pending_for(&self, recipient: IdentityId) -> Vec<SessionStatus> {
        let mut pending: Vec<SessionStatus> = self
            .handles()
            .iter()
            .filter_map(|handle| {
                let session = lock(handle);
                (session.recipient() == recipient && session.state() == SessionState::Pending)
                    .then(|| self.snapshot(&session))
            })
            .collect();

        pending.sort_by_key(|status| (status.created_at, status.id));
        pending
    }

    /// Fail every unfinished handshake older than the configured TTL.
    ///
    /// Returns the number of sessions expired.
    pub fn expire_stale(&self) -> usize {
        let now = self.env.now();
        let cutoff = now.saturating_sub(self.config.handshake_ttl);
        let mut expired = 0;

        for handle in self.handles() {
            let mut session = lock(&handle);
            if session.state().is_terminal() || session.created_at() >= cutoff {
                continue;
            }

            if session.fail(FailureReason::Expired).is_ok() {
                expired += 1;
                let (session_id, initiator) = (session.id(), session.initiator());
                drop(session);

                self.audit(
                    AuditEventKind::KeyExchangeFailed,
                    initiator,
                    format!("key exchange {session_id} expired"),
                    Severity::Warning,
                    now,
                );
            }
        }

        if expired > 0 {
            tracing::info!(expired, "Expired stale key exchanges");
        }

        expired
    }

    /// Drop terminal sessions created more than `handshake_ttl +
    /// terminal_retention` ago, along with their nonce records.
    ///
    /// Unfinished sessions are never dropped; run [`Self::expire_stale`]
    /// first so they become terminal. Returns the number of sessions evicted.
    pub fn evict_terminal(&self) -> usize {
        let keep_for = self.config.handshake_ttl.saturating_add(self.config.terminal_retention);
        let cutoff = self.env.now().saturating_sub(keep_for);
        let mut evicted = 0;

        for handle in self.handles() {
            let session = lock(&handle);
            if !session.state().is_terminal() || session.created_at() >= cutoff {
                continue;
            }

            let session_id = session.id();
            let nonce_key = (session.initiator(), session.nonce().clone());
            drop(session);

            if self.sessions.remove(&session_id).is_some() {
                self.used_nonces.remove_if(&nonce_key, |_, owner| *owner == session_id);
                evicted += 1;
            }
        }

        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.sessions.len(), "Evicted finished key exchanges");
        }

        evicted
    }

    fn insert_session(
        &self,
        initiator: IdentityId,
        recipient: IdentityId,
        offer: SignedOffer,
        nonce: HandshakeNonce,
        now: Timestamp,
    ) -> SessionId {
        loop {
            let session_id = SessionId(self.env.random_u128());
            if let Entry::Vacant(slot) = self.sessions.entry(session_id) {
                let session =
                    KeyExchangeSession::new(session_id, initiator, recipient, offer, nonce, now);
                slot.insert(Arc::new(Mutex::new(session)));
                break session_id;
            }
        }
    }

    fn session(
        &self,
        session_id: SessionId,
        requester: IdentityId,
        now: Timestamp,
    ) -> Result<SessionHandle, KeyExchangeError> {
        let handle = self.sessions.get(&session_id).map(|entry| Arc::clone(entry.value()));
        handle.ok_or_else(|| {
            self.refused(
                requester,
                KeyExchangeError::SessionNotFound(session_id),
                Severity::Warning,
                now,
            )
        })
    }

    /// Clone all handles so no shard lock is held while sessions are locked.
    fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    fn snapshot(&self, session: &KeyExchangeSession) -> SessionStatus {
        session.status(
            self.directory.resolve(session.initiator()).map(|identity| identity.signing_key),
            self.directory.resolve(session.recipient()).map(|identity| identity.signing_key),
        )
    }

    fn verify_offer(
        &self,
        identity: &Identity,
        role: HandshakeRole,
        nonce: &HandshakeNonce,
        offer: &SignedOffer,
    ) -> Result<(), SignatureError> {
        let payload = signing_payload(role, nonce, &offer.ephemeral_key);
        self.verifier.verify(&identity.signing_key, &payload, &offer.signature)
    }

    fn unauthorized(
        &self,
        session_id: SessionId,
        requester: IdentityId,
        action: &str,
        now: Timestamp,
    ) -> KeyExchangeError {
        tracing::warn!(%session_id, %requester, action, "Unauthorized key exchange access");
        self.audit(
            AuditEventKind::KeyExchangeFailed,
            requester,
            format!("not a party to key exchange {session_id}: cannot {action} it"),
            Severity::Warning,
            now,
        );
        KeyExchangeError::Unauthorized { session_id, requester }
    }

    /// Audit a refused request and hand the error back.
    fn refused(
        &self,
        requester: IdentityId,
        err: KeyExchangeError,
        severity: Severity,
        now: Timestamp,
    ) -> KeyExchangeError {
        self.audit(
            AuditEventKind::KeyExchangeFailed,
            requester,
            format!("key exchange request refused: {err}"),
            severity,
            now,
        );
        err
    }

    fn audit(
        &self,
        kind: AuditEventKind,
        actor: IdentityId,
        details: String,
        severity: Severity,
        at: Timestamp,
    ) {
        record_best_effort(
            self.audit.as_ref(),
            AuditEvent::new(kind, Some(actor), details, severity, at),
        );
    }
}

fn lock(handle: &Mutex<KeyExchangeSession>) -> MutexGuard<'_, KeyExchangeSession> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

fn display_name(identity: Option<&Identity>, id: IdentityId) -> String {
    identity.map_or_else(|| id.to_string(), |identity| identity.username.clone())
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicU64, Ordering},
    };

    use bytes::Bytes;
    use ed25519_dalek::{Signer, SigningKey};

    use super::*;
    use crate::{
        error::AuditError, handshake::session::EphemeralPublicKey, identity::PublicSigningKey,
    };

    #[derive(Clone, Default)]
    struct TestEnv {
        clock: Arc<AtomicU64>,
        counter: Arc<AtomicU64>,
    }

    impl TestEnv {
        fn advance(&self, by: Duration) {
            self.clock.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
        }
    }

    impl Environment for TestEnv {
        fn now(&self) -> Timestamp {
            Timestamp::from_millis(self.clock.load(Ordering::SeqCst))
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            let next = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = next.to_be_bytes()[i % 8];
            }
        }
    }

    struct Party {
        id: IdentityId,
        key: SigningKey,
    }

    impl Party {
        fn new(id: u64) -> Self {
            Self { id: IdentityId(id), key: SigningKey::from_bytes(&[id as u8; 32]) }
        }

        fn identity(&self, name: &str) -> Identity {
            Identity {
                id: self.id,
                username: name.to_string(),
                signing_key: PublicSigningKey(self.key.verifying_key().to_bytes()),
            }
        }

        fn offer(&self, role: HandshakeRole, nonce: &HandshakeNonce, key: u8) -> SignedOffer {
            let ephemeral = EphemeralPublicKey::new(vec![key; 32]);
            let signature = self.key.sign(&signing_payload(role, nonce, &ephemeral));
            SignedOffer::new(ephemeral, signature.to_bytes().to_vec())
        }
    }

    struct MapDirectory(Mutex<HashMap<IdentityId, Identity>>);

    impl MapDirectory {
        fn remove(&self, id: IdentityId) {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
        }
    }

    impl IdentityDirectory for MapDirectory {
        fn resolve(&self, id: IdentityId) -> Option<Identity> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).get(&id).cloned()
        }
    }

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<AuditEvent>>);

    impl AuditSink for CollectingSink {
        fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).push(event);
            Ok(())
        }
    }

    impl CollectingSink {
        fn kinds(&self) -> Vec<AuditEventKind> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).iter().map(|e| e.kind).collect()
        }

        fn last(&self) -> Option<AuditEvent> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).last().cloned()
        }

        fn len(&self) -> usize {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
        }
    }

    struct Fixture {
        env: TestEnv,
        alice: Party,
        bob: Party,
        eve: Party,
        sink: Arc<CollectingSink>,
        directory: Arc<MapDirectory>,
        manager: KeyExchangeManager<TestEnv, Arc<MapDirectory>>,
    }

    fn fixture(config: KeyExchangeConfig) -> Fixture {
        let env = TestEnv::default();
        let (alice, bob, eve) = (Party::new(1), Party::new(2), Party::new(3));
        let directory = Arc::new(MapDirectory(Mutex::new(HashMap::from([
            (alice.id, alice.identity("alice")),
            (bob.id, bob.identity("bob")),
            (eve.id, eve.identity("eve")),
        ]))));
        let sink = Arc::new(CollectingSink::default());
        let manager =
            KeyExchangeManager::new(env.clone(), Arc::clone(&directory), Ed25519Verifier, config)
                .with_audit_sink(sink.clone());

        Fixture { env, alice, bob, eve, sink, directory, manager }
    }

    fn nonce(byte: u8) -> HandshakeNonce {
        HandshakeNonce::new(Bytes::from(vec![byte; 16]))
    }

    fn initiate(f: &Fixture, nonce: &HandshakeNonce) -> SessionStatus {
        f.manager
            .initiate(InitiateRequest {
                initiator: f.alice.id,
                recipient: f.bob.id,
                offer: f.alice.offer(HandshakeRole::Initiator, nonce, 0xA1),
                nonce: nonce.clone(),
            })
            .expect("initiate")
    }

    #[test]
    fn full_handshake() {
        let f = fixture(KeyExchangeConfig::default());
        let n = nonce(1);

        let status = initiate(&f, &n);
        assert_eq!(status.state, SessionState::Pending);
        assert_eq!(status.recipient_signing_key, Some(f.bob.identity("bob").signing_key));

        let status = f
            .manager
            .respond(status.id, f.bob.id, f.bob.offer(HandshakeRole::Responder, &n, 0xB2))
            .expect("respond");
        assert_eq!(status.state, SessionState::Responded);

        let status = f
            .manager
            .confirm(status.id, f.alice.id, ConfirmationTag::new(vec![7; 32]))
            .expect("confirm");
        assert_eq!(status.state, SessionState::Completed);

        assert_eq!(
            f.sink.kinds(),
            vec![
                AuditEventKind::KeyExchangeInitiated,
                AuditEventKind::KeyExchangeResponded,
                AuditEventKind::KeyExchangeCompleted,
            ]
        );
    }

    #[test]
    fn unknown_recipient_creates_nothing() {
        let f = fixture(KeyExchangeConfig::default());
        let n = nonce(1);

        let err = f
            .manager
            .initiate(InitiateRequest {
                initiator: f.alice.id,
                recipient: IdentityId(404),
                offer: f.alice.offer(HandshakeRole::Initiator, &n, 0xA1),
                nonce: n,
            })
            .unwrap_err();

        assert_eq!(err, KeyExchangeError::UnknownRecipient(IdentityId(404)));
        assert_eq!(f.manager.session_count(), 0);
    }

    #[test]
    fn forged_initiator_signature_rejected_when_verification_enabled() {
        let f = fixture(KeyExchangeConfig::default());
        let n = nonce(1);

        let err = f
            .manager
            .initiate(InitiateRequest {
                initiator: f.alice.id,
                recipient: f.bob.id,
                offer: f.eve.offer(HandshakeRole::Initiator, &n, 0xEE),
                nonce: n,
            })
            .unwrap_err();

        assert_eq!(err, KeyExchangeError::SignatureInvalid { signer: f.alice.id });
        assert_eq!(f.manager.session_count(), 0);
        assert_eq!(f.sink.kinds(), vec![AuditEventKind::SignatureInvalid]);
    }

    #[test]
    fn forged_initiator_signature_accepted_when_verification_disabled() {
        let f = fixture(KeyExchangeConfig {
            verify_initiator_signature: false,
            ..KeyExchangeConfig::default()
        });
        let n = nonce(1);

        let status = f
            .manager
            .initiate(InitiateRequest {
                initiator: f.alice.id,
                recipient: f.bob.id,
                offer: f.eve.offer(HandshakeRole::Initiator, &n, 0xEE),
                nonce: n,
            })
            .expect("initiate without verification");

        assert_eq!(status.state, SessionState::Pending);
    }

    #[test]
    fn impostor_response_fails_session() {
        let f = fixture(KeyExchangeConfig::default());
        let n = nonce(1);
        let status = initiate(&f, &n);

        let err = f
            .manager
            .respond(status.id, f.bob.id, f.eve.offer(HandshakeRole::Responder, &n, 0xEE))
            .unwrap_err();

        assert_eq!(err, KeyExchangeError::SignatureInvalid { signer: f.bob.id });
        let status = f.manager.get_status(status.id, f.alice.id).expect("status");
        assert_eq!(status.state, SessionState::Failed);
        assert_eq!(status.failure, Some(FailureReason::SignatureInvalid));
        assert!(status.recipient_offer.is_none());

        // Retrying with a good signature does not resurrect the session.
        let err = f
            .manager
            .respond(status.id, f.bob.id, f.bob.offer(HandshakeRole::Responder, &n, 0xB2))
            .unwrap_err();
        assert!(matches!(
            err,
            KeyExchangeError::InvalidStateTransition { state: SessionState::Failed, .. }
        ));
    }

    #[test]
    fn third_party_cannot_respond_or_read() {
        let f = fixture(KeyExchangeConfig::default());
        let n = nonce(1);
        let status = initiate(&f, &n);

        let err = f
            .manager
            .respond(status.id, f.eve.id, f.eve.offer(HandshakeRole::Responder, &n, 0xEE))
            .unwrap_err();
        assert_eq!(err, KeyExchangeError::Unauthorized { session_id: status.id, requester: f.eve.id });

        let err = f.manager.get_status(status.id, f.eve.id).unwrap_err();
        assert!(err.is_protocol_violation());

        // The session is untouched by the rejected attempts.
        let status = f.manager.get_status(status.id, f.bob.id).expect("status");
        assert_eq!(status.state, SessionState::Pending);
    }

    #[test]
    fn initiator_cannot_respond_to_own_exchange() {
        let f = fixture(KeyExchangeConfig::default());
        let n = nonce(1);
        let status = initiate(&f, &n);

        let err = f
            .manager
            .respond(status.id, f.alice.id, f.alice.offer(HandshakeRole::Responder, &n, 0xA2))
            .unwrap_err();

        assert!(matches!(err, KeyExchangeError::Unauthorized { .. }));
    }

    #[test]
    fn nonce_reuse_is_rejected() {
        let f = fixture(KeyExchangeConfig::default());
        let n = nonce(9);
        initiate(&f, &n);

        let err = f
            .manager
            .initiate(InitiateRequest {
                initiator: f.alice.id,
                recipient: f.bob.id,
                offer: f.alice.offer(HandshakeRole::Initiator, &n, 0xA1),
                nonce: n,
            })
            .unwrap_err();

        assert_eq!(err, KeyExchangeError::NonceReused { initiator: f.alice.id });
        assert_eq!(f.manager.session_count(), 1);
    }

    #[test]
    fn missing_session_is_not_found() {
        let f = fixture(KeyExchangeConfig::default());

        let err = f.manager.get_status(SessionId(99), f.alice.id).unwrap_err();

        assert_eq!(err, KeyExchangeError::SessionNotFound(SessionId(99)));
        assert!(!err.is_protocol_violation());
        let event = f.sink.last().expect("audited");
        assert_eq!(event.kind, AuditEventKind::KeyExchangeFailed);
        assert_eq!(event.actor, Some(f.alice.id));
        assert_eq!(event.severity, Severity::Warning);
    }

    #[test]
    fn repeated_response_is_refused_and_audited() {
        let f = fixture(KeyExchangeConfig::default());
        let n = nonce(1);
        let status = initiate(&f, &n);
        let response = f.bob.offer(HandshakeRole::Responder, &n, 0xB2);
        f.manager.respond(status.id, f.bob.id, response.clone()).expect("respond");
        let before = f.sink.len();

        let err = f.manager.respond(status.id, f.bob.id, response).unwrap_err();

        assert!(matches!(
            err,
            KeyExchangeError::InvalidStateTransition { state: SessionState::Responded, .. }
        ));
        assert_eq!(f.sink.len(), before + 1);
        let event = f.sink.last().expect("audited");
        assert_eq!(event.kind, AuditEventKind::KeyExchangeFailed);
        assert_eq!(event.actor, Some(f.bob.id));
        assert_eq!(event.severity, Severity::Warning);
    }

    #[test]
    fn repeated_confirmation_is_refused_and_audited() {
        let f = fixture(KeyExchangeConfig::default());
        let n = nonce(1);
        let status = initiate(&f, &n);
        f.manager
            .respond(status.id, f.bob.id, f.bob.offer(HandshakeRole::Responder, &n, 0xB2))
            .expect("respond");
        f.manager.confirm(status.id, f.alice.id, ConfirmationTag::new(vec![7; 32])).expect("confirm");

        let err =
            f.manager.confirm(status.id, f.bob.id, ConfirmationTag::new(vec![8; 32])).unwrap_err();

        assert!(matches!(
            err,
            KeyExchangeError::InvalidStateTransition { state: SessionState::Completed, .. }
        ));
        assert_eq!(
            f.sink.kinds(),
            vec![
                AuditEventKind::KeyExchangeInitiated,
                AuditEventKind::KeyExchangeResponded,
                AuditEventKind::KeyExchangeCompleted,
                AuditEventKind::KeyExchangeFailed,
            ]
        );
        let status = f.manager.get_status(status.id, f.alice.id).expect("status");
        assert_eq!(status.confirmation, Some(ConfirmationTag::new(vec![7; 32])));
    }

    #[test]
    fn deregistered_responder_is_refused_and_audited() {
        let f = fixture(KeyExchangeConfig::default());
        let n = nonce(1);
        let status = initiate(&f, &n);
        f.directory.remove(f.bob.id);

        let err = f
            .manager
            .respond(status.id, f.bob.id, f.bob.offer(HandshakeRole::Responder, &n, 0xB2))
            .unwrap_err();

        assert_eq!(err, KeyExchangeError::UnknownRecipient(f.bob.id));
        let event = f.sink.last().expect("audited");
        assert_eq!(event.kind, AuditEventKind::KeyExchangeFailed);
        assert_eq!(event.severity, Severity::Error);
        let status = f.manager.get_status(status.id, f.alice.id).expect("status");
        assert_eq!(status.state, SessionState::Pending);
    }

    #[test]
    fn terminal_sessions_are_evicted_after_retention() {
        let f = fixture(KeyExchangeConfig {
            handshake_ttl: Duration::from_secs(60),
            terminal_retention: Duration::from_secs(120),
            ..KeyExchangeConfig::default()
        });
        let n = nonce(1);
        let done = initiate(&f, &n);
        f.manager
            .respond(done.id, f.bob.id, f.bob.offer(HandshakeRole::Responder, &n, 0xB2))
            .expect("respond");
        f.manager.confirm(done.id, f.bob.id, ConfirmationTag::new(vec![1])).expect("confirm");
        let stale = initiate(&f, &nonce(2));

        f.env.advance(Duration::from_secs(61));
        assert_eq!(f.manager.expire_stale(), 1);
        assert_eq!(f.manager.evict_terminal(), 0);
        assert_eq!(f.manager.session_count(), 2);

        // Nonce still remembered while the session is retained.
        let err = f
            .manager
            .initiate(InitiateRequest {
                initiator: f.alice.id,
                recipient: f.bob.id,
                offer: f.alice.offer(HandshakeRole::Initiator, &n, 0xA1),
                nonce: n.clone(),
            })
            .unwrap_err();
        assert_eq!(err, KeyExchangeError::NonceReused { initiator: f.alice.id });

        f.env.advance(Duration::from_secs(120));
        let fresh = initiate(&f, &nonce(3));
        assert_eq!(f.manager.evict_terminal(), 2);
        assert_eq!(f.manager.session_count(), 1);

        assert!(matches!(
            f.manager.get_status(stale.id, f.alice.id),
            Err(KeyExchangeError::SessionNotFound(_))
        ));
        assert_eq!(
            f.manager.get_status(fresh.id, f.alice.id).expect("status").state,
            SessionState::Pending
        );
    }

    #[test]
    fn unfinished_sessions_are_never_evicted() {
        let f = fixture(KeyExchangeConfig {
            handshake_ttl: Duration::from_secs(60),
            terminal_retention: Duration::ZERO,
            ..KeyExchangeConfig::default()
        });
        initiate(&f, &nonce(1));
        f.env.advance(Duration::from_secs(600));

        assert_eq!(f.manager.evict_terminal(), 0);
        assert_eq!(f.manager.session_count(), 1);
    }

    #[test]
    fn pending_lists_only_pending_for_recipient() {
        let f = fixture(KeyExchangeConfig::default());
        let first = initiate(&f, &nonce(1));
        f.env.advance(Duration::from_secs(1));
        let second = initiate(&f, &nonce(2));
        f.env.advance(Duration::from_secs(1));
        let third = initiate(&f, &nonce(3));
        f.manager.abort(third.id, f.bob.id).expect("abort");

        let pending = f.manager.pending_for(f.bob.id);

        assert_eq!(pending.iter().map(|s| s.id).collect::<Vec<_>>(), vec![first.id, second.id]);
        assert!(f.manager.pending_for(f.alice.id).is_empty());
    }

    #[test]
    fn stale_sessions_expire() {
        let f = fixture(KeyExchangeConfig {
            handshake_ttl: Duration::from_secs(60),
            ..KeyExchangeConfig::default()
        });
        let n = nonce(1);
        let old = initiate(&f, &n);
        f.manager
            .respond(old.id, f.bob.id, f.bob.offer(HandshakeRole::Responder, &n, 0xB2))
            .expect("respond");
        f.env.advance(Duration::from_secs(61));
        let fresh = initiate(&f, &nonce(2));

        assert_eq!(f.manager.expire_stale(), 1);

        let old = f.manager.get_status(old.id, f.alice.id).expect("status");
        assert_eq!(old.failure, Some(FailureReason::Expired));
        let fresh = f.manager.get_status(fresh.id, f.alice.id).expect("status");
        assert_eq!(fresh.state, SessionState::Pending);
        assert_eq!(f.manager.expire_stale(), 0);
    }

    #[test]
    fn abort_after_completion_is_rejected() {
        let f = fixture(KeyExchangeConfig::default());
        let n = nonce(1);
        let status = initiate(&f, &n);
        f.manager
            .respond(status.id, f.bob.id, f.bob.offer(HandshakeRole::Responder, &n, 0xB2))
            .expect("respond");
        f.manager.confirm(status.id, f.bob.id, ConfirmationTag::new(vec![1])).expect("confirm");

        let err = f.manager.abort(status.id, f.alice.id).unwrap_err();

        assert!(matches!(
            err,
            KeyExchangeError::InvalidStateTransition { state: SessionState::Completed, .. }
        ));
    }
}
