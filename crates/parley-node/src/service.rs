//! Channel service: one key-exchange manager and one envelope validator
//! sharing an environment, a directory and an audit sink.

use std::{sync::Arc, time::Duration};

use parley_core::{
    AuditSink, ChannelConfig, ConfirmationTag, Ed25519Verifier, EnvelopeError, EnvelopeValidator,
    Environment, IdentityDirectory, IdentityId, InitiateRequest, KeyExchangeError,
    KeyExchangeManager, MessageEnvelope, SequenceError, SequenceStore, SessionId, SessionStatus,
    SignedOffer,
};
use tokio::{sync::oneshot, task::JoinHandle};

use crate::{
    audit::{audit_channel, run_audit_writer},
    config::NodeConfig,
    error::NodeError,
    storage::SequenceBackend,
};

/// Both halves of the channel protocol behind one handle.
///
/// Every method is synchronous and safe to call from many tasks at once.
pub struct ChannelService<E, D, S = SequenceBackend> {
    key_exchange: KeyExchangeManager<E, D, Ed25519Verifier>,
    envelopes: EnvelopeValidator<E, S>,
}

impl<E, D, S> ChannelService<E, D, S>
where
    E: Environment,
    D: IdentityDirectory,
    S: SequenceStore,
{
    /// Wire a service from its parts.
    pub fn new(
        env: E,
        directory: D,
        store: S,
        config: &ChannelConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let key_exchange = KeyExchangeManager::new(
            env.clone(),
            directory,
            Ed25519Verifier,
            config.key_exchange.clone(),
        )
        .with_audit_sink(Arc::clone(&audit));
        let envelopes = EnvelopeValidator::new(env, store, config.freshness).with_audit_sink(audit);

        Self { key_exchange, envelopes }
    }

    /// The key-exchange manager.
    pub fn key_exchange(&self) -> &KeyExchangeManager<E, D, Ed25519Verifier> {
        &self.key_exchange
    }

    /// The envelope validator.
    pub fn envelopes(&self) -> &EnvelopeValidator<E, S> {
        &self.envelopes
    }

    /// See [`KeyExchangeManager::initiate`].
    pub fn initiate(&self, request: InitiateRequest) -> Result<SessionStatus, KeyExchangeError> {
        self.key_exchange.initiate(request)
    }

    /// See [`KeyExchangeManager::respond`].
    pub fn respond(
        &self,
        session_id: SessionId,
        responder: IdentityId,
        offer: SignedOffer,
    ) -> Result<SessionStatus, KeyExchangeError> {
        self.key_exchange.respond(session_id, responder, offer)
    }

    /// See [`KeyExchangeManager::confirm`].
    pub fn confirm(
        &self,
        session_id: SessionId,
        confirmer: IdentityId,
        tag: ConfirmationTag,
    ) -> Result<SessionStatus, KeyExchangeError> {
        self.key_exchange.confirm(session_id, confirmer, tag)
    }

    /// See [`KeyExchangeManager::get_status`].
    pub fn get_status(
        &self,
        session_id: SessionId,
        requester: IdentityId,
    ) -> Result<SessionStatus, KeyExchangeError> {
        self.key_exchange.get_status(session_id, requester)
    }

    /// See [`KeyExchangeManager::abort`].
    pub fn abort(
        &self,
        session_id: SessionId,
        requester: IdentityId,
    ) -> Result<SessionStatus, KeyExchangeError> {
        self.key_exchange.abort(session_id, requester)
    }

    /// See [`KeyExchangeManager::pending_for`].
    pub fn pending_for(&self, recipient: IdentityId) -> Vec<SessionStatus> {
        self.key_exchange.pending_for(recipient)
    }

    /// See [`EnvelopeValidator::validate_envelope`].
    pub fn validate_envelope(&self, envelope: &MessageEnvelope) -> Result<(), EnvelopeError> {
        self.envelopes.validate_envelope(envelope)
    }

    /// Reset every sequence counter. Previously seen sequence numbers become
    /// acceptable again.
    pub fn clear_sequences(&self) -> Result<(), SequenceError> {
        tracing::warn!("Resetting all sequence counters");
        self.envelopes.store().clear()
    }

    /// Expire stale handshakes and evict retained terminal ones every
    /// `every` until `shutdown` fires or its sender is dropped.
    pub async fn run_expiry(self: Arc<Self>, every: Duration, mut shutdown: oneshot::Receiver<()>) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.key_exchange.expire_stale();
                    self.key_exchange.evict_terminal();
                },
                _ = &mut shutdown => break,
            }
        }

        tracing::debug!("Expiry task stopped");
    }
}

/// A running channel service with its audit writer.
pub struct Node<E, D> {
    service: Arc<ChannelService<E, D>>,
    audit_writer: JoinHandle<Result<u64, NodeError>>,
}

impl<E, D> Node<E, D>
where
    E: Environment,
    D: IdentityDirectory,
{
    /// Open storage, spawn the audit writer and wire the service.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `Config` if `config` fails validation
    /// - `Storage` if the sequence database cannot be opened
    pub fn start(env: E, directory: D, config: &NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;

        let store = SequenceBackend::open(config.sequence_db.as_deref())?;
        let (audit, rx) = audit_channel(config.audit_buffer);
        let audit_writer = tokio::spawn(run_audit_writer(rx, config.audit_log.clone()));

        let service =
            Arc::new(ChannelService::new(env, directory, store, &config.channel, Arc::new(audit)));

        tracing::info!(
            durable_sequences = service.envelopes().store().is_durable(),
            audit_log = ?config.audit_log,
            verify_initiator = config.channel.key_exchange.verify_initiator_signature,
            "Channel service started"
        );

        Ok(Self { service, audit_writer })
    }

    /// Shared handle to the service.
    pub fn service(&self) -> &Arc<ChannelService<E, D>> {
        &self.service
    }

    /// Drop the service and wait for the audit writer to flush.
    ///
    /// The writer finishes once every clone of the service handle is gone;
    /// clones held elsewhere delay shutdown until they are dropped.
    ///
    /// # Errors
    ///
    /// Returns the audit writer's error, if it failed.
    pub async fn shutdown(self) -> Result<u64, NodeError> {
        drop(self.service);
        self.audit_writer
            .await
            .map_err(|e| NodeError::AuditLog(format!("audit writer task failed: {e}")))?
    }
}
