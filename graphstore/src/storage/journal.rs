//! Durable commit path.
//!
//! The journal owns the `LogStorage` and turns a batch of pending writes into
//! WAL records. A commit appends `Begin`, one `Put`/`Delete` per mutated key,
//! and `Commit`, then syncs. If any step fails the WAL is cut back to its
//! previous length, so a failed commit leaves no trace on disk.
//!
//! # Invariants
//!
//! - `wal_len` equals the length of the WAL on storage between calls
//! - Transaction ids and LSNs strictly increase and are never reused, even for
//!   commits that failed

use crate::storage::checkpoint::{
    CheckpointConfig, CheckpointResult, CheckpointState, encode_snapshot,
};
use crate::storage::engine::{PendingWrites, Snapshot, Table};
use crate::storage::io::{LogStorage, StorageError};
use crate::storage::recovery::{RecoveredState, RecoveryError, recover};
use crate::storage::wal::{LogRecord, LogRecordPayload, Lsn, TxnId};

/// Durability settings of the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalConfig {
    /// Sync the WAL before a commit is acknowledged.
    pub sync_on_commit: bool,
    /// Automatic checkpoint triggers.
    pub checkpoint: CheckpointConfig,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            checkpoint: CheckpointConfig::default(),
        }
    }
}

/// Details of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitInfo {
    /// Transaction id written to the WAL.
    pub txn_id: TxnId,
    /// LSN of the `Commit` record.
    pub commit_lsn: Lsn,
    /// Number of keys written or removed.
    pub operations: usize,
    /// Bytes appended to the WAL.
    pub wal_bytes: u64,
}

/// WAL writer and checkpointer.
pub struct Journal {
    storage: Box<dyn LogStorage>,
    config: JournalConfig,
    next_txn_id: TxnId,
    next_lsn: Lsn,
    wal_len: u64,
    checkpoint: CheckpointState,
    /// Set when a failed commit could not be rolled back. The WAL may then
    /// hold records of a transaction reported as failed.
    broken: bool,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("config", &self.config)
            .field("next_txn_id", &self.next_txn_id)
            .field("next_lsn", &self.next_lsn)
            .field("wal_len", &self.wal_len)
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl Journal {
    /// Recover the committed state from `storage` and prepare to append after it.
    pub fn open(
        mut storage: Box<dyn LogStorage>,
        config: JournalConfig,
    ) -> Result<(Self, RecoveredState), RecoveryError> {
        let recovered = recover(storage.as_mut())?;
        let journal = Self {
            storage,
            config,
            next_txn_id: recovered.next_txn_id,
            next_lsn: recovered.next_lsn,
            wal_len: recovered.wal_len,
            checkpoint: CheckpointState::new(
                config.checkpoint,
                recovered.result.checkpoint_lsn,
                recovered.wal_len,
            ),
            broken: false,
        };
        Ok((journal, recovered))
    }

    /// Current WAL length in bytes.
    #[must_use]
    pub const fn wal_len(&self) -> u64 {
        self.wal_len
    }

    /// Next transaction id that will be written.
    #[must_use]
    pub const fn next_txn_id(&self) -> TxnId {
        self.next_txn_id
    }

    /// Make `pending` durable.
    ///
    /// # Post-conditions
    ///
    /// - On `Ok`, the transaction's `Commit` record is in the WAL (and synced
    ///   when `sync_on_commit` is set)
    /// - On `Err`, the WAL has its previous length
    pub fn commit(&mut self, pending: &PendingWrites) -> Result<CommitInfo, StorageError> {
        if self.broken {
            return Err(StorageError::Corruption(
                "WAL holds an unrolled-back transaction".to_string(),
            ));
        }

        let txn_id = self.next_txn_id;
        self.next_txn_id += 1;

        let mut lsn = self.next_lsn;
        let mut bytes = Vec::new();
        LogRecord::new(txn_id, lsn, LogRecordPayload::Begin).write_to(&mut bytes)?;
        for (table, key, value) in pending.iter() {
            lsn += 1;
            let payload = match value {
                Some(value) => LogRecordPayload::Put {
                    table,
                    key: key.to_vec(),
                    value: value.to_vec(),
                },
                None => LogRecordPayload::Delete {
                    table,
                    key: key.to_vec(),
                },
            };
            LogRecord::new(txn_id, lsn, payload).write_to(&mut bytes)?;
        }
        lsn += 1;
        LogRecord::new(txn_id, lsn, LogRecordPayload::Commit).write_to(&mut bytes)?;

        if let Err(e) = self.append_and_sync(&bytes) {
            self.rollback();
            return Err(e);
        }

        let wal_bytes = bytes.len() as u64;
        self.next_lsn = lsn + 1;
        self.wal_len += wal_bytes;
        self.checkpoint.record_commit(wal_bytes);

        Ok(CommitInfo {
            txn_id,
            commit_lsn: lsn,
            operations: pending.len(),
            wal_bytes,
        })
    }

    fn append_and_sync(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        self.storage.append_wal(bytes)?;
        if self.config.sync_on_commit {
            self.storage.sync()?;
        }
        Ok(())
    }

    fn rollback(&mut self) {
        if let Err(e) = self.storage.truncate_wal(self.wal_len) {
            tracing::error!(error = %e, wal_len = self.wal_len, "Failed to roll back WAL");
            self.broken = true;
        }
    }

    /// Whether the WAL grew past the checkpoint threshold.
    #[must_use]
    pub const fn should_checkpoint(&self) -> bool {
        self.checkpoint.should_checkpoint()
    }

    /// Write `snapshot` as the new checkpoint image and reset the WAL.
    ///
    /// # Pre-conditions
    ///
    /// - `snapshot` is the state after every transaction committed so far
    pub fn checkpoint(&mut self, snapshot: &Snapshot) -> Result<CheckpointResult, StorageError> {
        let lsn = self.next_lsn.saturating_sub(1);
        let image = encode_snapshot(snapshot, self.next_txn_id, lsn)?;
        self.storage.write_snapshot(&image)?;
        self.storage.truncate_wal(0)?;
        self.wal_len = 0;
        self.broken = false;

        let result = CheckpointResult {
            checkpoint_lsn: lsn,
            entries_written: snapshot_entries(snapshot),
            image_bytes: image.len(),
            transactions_folded: self.checkpoint.txns_since_checkpoint(),
        };
        self.checkpoint.reset(lsn);
        Ok(result)
    }

    /// Remove every durable artifact.
    pub fn destroy(&mut self) -> Result<(), StorageError> {
        self.storage.destroy()?;
        self.wal_len = 0;
        Ok(())
    }
}

fn snapshot_entries(snapshot: &Snapshot) -> u64 {
    Table::ALL
        .iter()
        .map(|&t| snapshot.len(t) as u64)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::engine::{KvRead, WriteBatch};
    use crate::storage::memory::{FaultConfig, MemoryStorage};
    use std::sync::Arc;

    fn pending_with(key: &[u8]) -> PendingWrites {
        let mut batch = WriteBatch::new(Arc::new(Snapshot::new()));
        batch.put(Table::Datasets, key.to_vec(), b"v".to_vec());
        batch.into_parts().1
    }

    fn open(storage: &MemoryStorage) -> (Journal, RecoveredState) {
        Journal::open(Box::new(storage.handle()), JournalConfig::default()).expect("open journal")
    }

    #[test]
    fn test_commit_is_recovered() {
        let storage = MemoryStorage::new(1);
        let (mut journal, _) = open(&storage);
        let info = journal.commit(&pending_with(b"a")).expect("commit");
        assert_eq!(info.txn_id, 1);
        assert_eq!(info.operations, 1);
        assert_eq!(journal.wal_len(), info.wal_bytes);
        drop(journal);

        let (journal, recovered) = open(&storage);
        assert!(recovered.snapshot.contains(Table::Datasets, b"a"));
        assert_eq!(journal.next_txn_id(), 2);
    }

    #[test]
    fn test_failed_sync_rolls_back() {
        let storage = MemoryStorage::new(1);
        let (mut journal, _) = open(&storage);
        journal.commit(&pending_with(b"a")).expect("commit");
        let len_before = storage.wal_len().expect("len");

        storage
            .set_fault_config(FaultConfig::failing_sync())
            .expect("config");
        assert!(journal.commit(&pending_with(b"b")).is_err());
        assert_eq!(storage.wal_len().expect("len"), len_before);
        // The failed transaction still consumed its id.
        assert_eq!(journal.next_txn_id(), 3);

        storage
            .set_fault_config(FaultConfig::no_faults())
            .expect("config");
        drop(journal);
        let (_, recovered) = open(&storage);
        assert!(recovered.snapshot.contains(Table::Datasets, b"a"));
        assert!(!recovered.snapshot.contains(Table::Datasets, b"b"));
    }

    #[test]
    fn test_torn_append_rolls_back() {
        let storage = MemoryStorage::with_config(
            3,
            FaultConfig {
                torn_append_rate: 1.0,
                ..FaultConfig::default()
            },
        );
        let (mut journal, _) = open(&storage);
        assert!(journal.commit(&pending_with(b"a")).is_err());
        assert_eq!(storage.wal_len().expect("len"), 0);
    }

    #[test]
    fn test_checkpoint_resets_wal() {
        let storage = MemoryStorage::new(1);
        let (mut journal, _) = open(&storage);
        journal.commit(&pending_with(b"a")).expect("commit");

        let mut snapshot = Snapshot::new();
        snapshot.put(Table::Datasets, b"a".to_vec(), b"v".to_vec());
        let result = journal.checkpoint(&snapshot).expect("checkpoint");
        assert_eq!(result.entries_written, 1);
        assert_eq!(result.transactions_folded, 1);
        assert_eq!(journal.wal_len(), 0);
        assert_eq!(storage.wal_len().expect("len"), 0);

        journal.commit(&pending_with(b"b")).expect("commit");
        drop(journal);

        let (journal, recovered) = open(&storage);
        assert!(recovered.snapshot.contains(Table::Datasets, b"a"));
        assert!(recovered.snapshot.contains(Table::Datasets, b"b"));
        assert_eq!(journal.next_txn_id(), 3);
    }

    #[test]
    fn test_should_checkpoint_after_threshold() {
        let storage = MemoryStorage::new(1);
        let config = JournalConfig {
            sync_on_commit: true,
            checkpoint: CheckpointConfig::new(1),
        };
        let (mut journal, _) = Journal::open(Box::new(storage.handle()), config).expect("open");
        assert!(!journal.should_checkpoint());
        journal.commit(&pending_with(b"a")).expect("commit");
        assert!(journal.should_checkpoint());
    }
}
