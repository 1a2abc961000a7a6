//! Redb-backed durable sequence counters.
//!
//! Redb serializes write transactions, so the read-compare-write in
//! `check_and_advance` is atomic with respect to every other writer, in
//! this process or not. Counters survive restarts: a captured envelope
//! stays a replay after the node comes back.

use std::{path::Path, sync::Arc};

use parley_core::{DirectionKey, IdentityId, SequenceError, SequenceStore};
use redb::{Database, ReadableTable, TableDefinition};

use super::StorageError;

/// Table: sequences
/// Key: (sender: u64, recipient: u64) as big-endian bytes [16 bytes]
/// Value: last accepted sequence number
const SEQUENCES: TableDefinition<&[u8], u64> = TableDefinition::new("sequences");

/// Durable sequence store backed by Redb.
///
/// Clone is cheap (Arc); clones share the database.
#[derive(Clone)]
pub struct RedbSequenceStore {
    db: Arc<Database>,
}

impl RedbSequenceStore {
    /// Open or create a database at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(SEQUENCES).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Every stored direction with its counter, in key order.
    pub fn directions(&self) -> Result<Vec<(DirectionKey, u64)>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(SEQUENCES).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut directions = Vec::new();
        for entry in table.iter().map_err(|e| StorageError::Io(e.to_string()))? {
            let (key, value) = entry.map_err(|e| StorageError::Io(e.to_string()))?;
            directions.push((decode_direction(key.value())?, value.value()));
        }

        Ok(directions)
    }
}

impl SequenceStore for RedbSequenceStore {
    fn last_accepted(&self, direction: &DirectionKey) -> Result<Option<u64>, SequenceError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(SEQUENCES).map_err(|e| StorageError::Io(e.to_string()))?;

        let key = encode_direction(direction);
        let last = table
            .get(key.as_slice())
            .map_err(|e| StorageError::Io(e.to_string()))?
            .map(|guard| guard.value());

        Ok(last)
    }

    fn check_and_advance(
        &self,
        direction: &DirectionKey,
        sequence_number: u64,
    ) -> Result<(), SequenceError> {
        let key = encode_direction(direction);
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        let verdict = {
            let mut table =
                txn.open_table(SEQUENCES).map_err(|e| StorageError::Io(e.to_string()))?;

            let last_accepted = table
                .get(key.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?
                .map_or(0, |guard| guard.value());

            if sequence_number > last_accepted {
                table
                    .insert(key.as_slice(), sequence_number)
                    .map_err(|e| StorageError::Io(e.to_string()))?;
                Ok(())
            } else {
                Err(SequenceError::Replay { last_accepted })
            }
        };

        match verdict {
            Ok(()) => txn.commit().map_err(|e| StorageError::Io(e.to_string()))?,
            Err(_) => txn.abort().map_err(|e| StorageError::Io(e.to_string()))?,
        }

        verdict
    }

    fn clear(&self) -> Result<(), SequenceError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let mut table =
                txn.open_table(SEQUENCES).map_err(|e| StorageError::Io(e.to_string()))?;
            table.retain(|_, _| false).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        tracing::info!("Cleared all sequence counters");
        Ok(())
    }
}

fn encode_direction(direction: &DirectionKey) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&direction.sender.0.to_be_bytes());
    key[8..].copy_from_slice(&direction.recipient.0.to_be_bytes());
    key
}

fn decode_direction(bytes: &[u8]) -> Result<DirectionKey, StorageError> {
    if bytes.len() != 16 {
        return Err(StorageError::Corrupt(format!("direction key of {} bytes", bytes.len())));
    }

    let mut sender = [0u8; 8];
    let mut recipient = [0u8; 8];
    sender.copy_from_slice(&bytes[..8]);
    recipient.copy_from_slice(&bytes[8..]);

    Ok(DirectionKey::new(
        IdentityId(u64::from_be_bytes(sender)),
        IdentityId(u64::from_be_bytes(recipient)),
    ))
}
