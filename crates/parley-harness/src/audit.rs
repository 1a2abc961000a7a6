//! Audit sinks for tests.

use std::sync::{Mutex, PoisonError};

use parley_core::{AuditError, AuditEvent, AuditEventKind, AuditSink, Severity};

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All records so far, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Event kinds so far, oldest first.
    pub fn kinds(&self) -> Vec<AuditEventKind> {
        self.events().into_iter().map(|event| event.kind).collect()
    }

    /// Records of one kind.
    pub fn of_kind(&self, kind: AuditEventKind) -> Vec<AuditEvent> {
        self.events().into_iter().filter(|event| event.kind == kind).collect()
    }

    /// Number of records at or above `severity`.
    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.events().iter().filter(|event| event.severity >= severity).count()
    }

    /// Drop all records.
    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
        Ok(())
    }
}

/// Rejects every record, like a storage backend that is down.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingAuditSink;

impl AuditSink for FailingAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Err(AuditError::Write("audit backend unavailable".to_string()))
    }
}
