//! Audit sinks for the running node.
//!
//! - [`TracingAuditSink`] writes each record as a tracing event, inline
//! - [`ForwardingAuditSink`] hands records to a bounded channel drained by
//!   [`run_audit_writer`], which logs them and appends them to a CBOR file
//!
//! The forwarding sink never blocks the protocol path. When the writer
//! falls behind and the buffer fills, records are refused and the core
//! drops them with a warning.

use std::path::{Path, PathBuf};

use parley_core::{AuditError, AuditEvent, AuditSink, Severity};
use tokio::{
    fs::OpenOptions,
    io::AsyncWriteExt,
    sync::mpsc::{self, error::TrySendError},
};

use crate::error::NodeError;

/// Sink that emits each record as a tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        emit(&event);
        Ok(())
    }
}

/// Sink that forwards records to a background writer.
#[derive(Debug, Clone)]
pub struct ForwardingAuditSink {
    tx: mpsc::Sender<AuditEvent>,
}

/// Bounded audit channel holding up to `capacity` unwritten records.
pub fn audit_channel(capacity: usize) -> (ForwardingAuditSink, mpsc::Receiver<AuditEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ForwardingAuditSink { tx }, rx)
}

impl AuditSink for ForwardingAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => AuditError::Unavailable("audit buffer full".to_string()),
            TrySendError::Closed(_) => {
                AuditError::Unavailable("audit writer stopped".to_string())
            },
        })
    }
}

/// Drain `rx` until every sender is dropped.
///
/// Each record is emitted as a tracing event and, if `log_path` is set,
/// appended to that file as one CBOR value. Returns the number of records
/// processed.
///
/// # Errors
///
/// Returns `NodeError::Io` if the log file cannot be opened or written, and
/// `NodeError::AuditLog` if a record cannot be encoded.
pub async fn run_audit_writer(
    mut rx: mpsc::Receiver<AuditEvent>,
    log_path: Option<PathBuf>,
) -> Result<u64, NodeError> {
    let mut file = match &log_path {
        Some(path) => Some(OpenOptions::new().create(true).append(true).open(path).await?),
        None => None,
    };

    let mut written = 0u64;
    let mut buf = Vec::with_capacity(256);

    while let Some(event) = rx.recv().await {
        emit(&event);

        if let Some(file) = file.as_mut() {
            buf.clear();
            ciborium::into_writer(&event, &mut buf)
                .map_err(|e| NodeError::AuditLog(e.to_string()))?;
            file.write_all(&buf).await?;
        }

        written += 1;
    }

    if let Some(mut file) = file {
        file.flush().await?;
    }

    tracing::debug!(written, "Audit writer stopped");
    Ok(written)
}

/// Decode every record in a CBOR audit log, oldest first.
///
/// # Errors
///
/// Returns `NodeError::Io` if the file cannot be read and
/// `NodeError::AuditLog` if it contains a malformed record.
pub fn read_audit_log(path: &Path) -> Result<Vec<AuditEvent>, NodeError> {
    let bytes = std::fs::read(path)?;
    let mut reader = bytes.as_slice();
    let mut events = Vec::new();

    while !reader.is_empty() {
        let event: AuditEvent =
            ciborium::from_reader(&mut reader).map_err(|e| NodeError::AuditLog(e.to_string()))?;
        events.push(event);
    }

    Ok(events)
}

fn emit(event: &AuditEvent) {
    let actor = event.actor.map(|id| id.to_string());
    let actor = actor.as_deref().unwrap_or("-");
    let kind = event.kind;
    let at = event.at.as_millis();

    match event.severity {
        Severity::Info => tracing::info!(target: "parley::audit", ?kind, actor, at, "{}", event.details),
        Severity::Warning => tracing::warn!(target: "parley::audit", ?kind, actor, at, "{}", event.details),
        Severity::Error | Severity::Critical => tracing::error!(
            target: "parley::audit",
            ?kind,
            severity = ?event.severity,
            actor,
            at,
            "{}",
            event.details
        ),
    }
}
