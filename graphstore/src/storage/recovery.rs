//! Crash recovery for the storage engine.
//!
//! Recovery loads the last checkpoint image, then replays WAL records written
//! after it to restore the committed state after a crash.
//!
//! # Recovery Process
//!
//! 1. Load the snapshot image, or start from empty tables
//! 2. Scan the WAL from the start, stopping at the first torn or corrupt record
//! 3. For each committed transaction not already in the image:
//!    - Replay PUT and DELETE operations
//!    - Skip uncommitted transactions (no COMMIT record)
//! 4. Cut the WAL back to the end of the last committed transaction

use std::collections::HashMap;

use crate::storage::checkpoint::{CheckpointError, decode_snapshot};
use crate::storage::engine::{Snapshot, Table};
use crate::storage::io::{LogStorage, StorageError};
use crate::storage::wal::{LogRecord, LogRecordPayload, Lsn, TxnId};

/// Result of a recovery operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of WAL records scanned.
    pub records_scanned: usize,

    /// Number of committed transactions replayed.
    pub transactions_replayed: usize,

    /// Number of committed transactions already contained in the image.
    pub transactions_skipped: usize,

    /// Number of uncommitted transactions discarded.
    pub transactions_discarded: usize,

    /// Number of operations applied (puts and deletes).
    pub operations_applied: usize,

    /// LSN covered by the checkpoint image.
    pub checkpoint_lsn: Lsn,

    /// Highest LSN seen during recovery.
    pub recovered_lsn: Lsn,

    /// Bytes cut from the end of the WAL.
    pub discarded_bytes: u64,
}

/// State rebuilt by recovery.
#[derive(Debug)]
pub struct RecoveredState {
    /// Committed tables.
    pub snapshot: Snapshot,
    /// Next transaction id to hand out.
    pub next_txn_id: TxnId,
    /// Next LSN to hand out.
    pub next_lsn: Lsn,
    /// Length of the WAL after recovery.
    pub wal_len: u64,
    /// Statistics.
    pub result: RecoveryResult,
}

/// Pending operations for a transaction being replayed.
#[derive(Debug, Default)]
struct PendingTransaction {
    writes: Vec<(Table, Vec<u8>, Option<Vec<u8>>)>,
}

/// Perform crash recovery over `storage`.
///
/// A torn or corrupt record ends the scan: everything from that record on is
/// treated as never written. Transactions whose COMMIT was not reached are
/// discarded, and the WAL is truncated to the end of the last COMMIT so new
/// records are appended after valid data.
pub fn recover(storage: &mut dyn LogStorage) -> Result<RecoveredState, RecoveryError> {
    let (mut snapshot, mut next_txn_id, checkpoint_lsn) = match storage.read_snapshot()? {
        Some(bytes) => {
            let image = decode_snapshot(&bytes)?;
            (image.snapshot, image.next_txn_id, image.lsn)
        }
        None => (Snapshot::new(), 1, 0),
    };

    let wal = storage.read_wal()?;
    let mut result = RecoveryResult {
        checkpoint_lsn,
        recovered_lsn: checkpoint_lsn,
        ..RecoveryResult::default()
    };

    let mut pending_txns: HashMap<TxnId, PendingTransaction> = HashMap::new();
    let mut offset = 0;
    let mut committed_end = 0;

    while offset < wal.len() {
        let (record, consumed) = match LogRecord::from_bytes(&wal[offset..]) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(offset, error = %e, "Stopping WAL replay at invalid record");
                break;
            }
        };
        offset += consumed;
        result.records_scanned += 1;
        result.recovered_lsn = result.recovered_lsn.max(record.lsn);
        next_txn_id = next_txn_id.max(record.txn_id + 1);

        match record.payload {
            LogRecordPayload::Begin => {
                pending_txns.insert(record.txn_id, PendingTransaction::default());
            }
            LogRecordPayload::Put { table, key, value } => {
                if let Some(txn) = pending_txns.get_mut(&record.txn_id) {
                    txn.writes.push((table, key, Some(value)));
                }
            }
            LogRecordPayload::Delete { table, key } => {
                if let Some(txn) = pending_txns.get_mut(&record.txn_id) {
                    txn.writes.push((table, key, None));
                }
            }
            LogRecordPayload::Commit => {
                committed_end = offset;
                let Some(txn) = pending_txns.remove(&record.txn_id) else {
                    continue;
                };
                if record.lsn <= checkpoint_lsn {
                    result.transactions_skipped += 1;
                    continue;
                }
                for (table, key, value) in txn.writes {
                    match value {
                        Some(value) => snapshot.put(table, key, value),
                        None => snapshot.delete(table, &key),
                    }
                    result.operations_applied += 1;
                }
                result.transactions_replayed += 1;
            }
        }
    }

    result.transactions_discarded = pending_txns.len();

    let wal_len = committed_end as u64;
    if committed_end < wal.len() {
        result.discarded_bytes = (wal.len() - committed_end) as u64;
        tracing::warn!(
            discarded_bytes = result.discarded_bytes,
            transactions_discarded = result.transactions_discarded,
            "Discarding incomplete WAL tail"
        );
        storage.truncate_wal(wal_len)?;
    }

    Ok(RecoveredState {
        snapshot,
        next_txn_id,
        next_lsn: result.recovered_lsn + 1,
        wal_len,
        result,
    })
}

/// Errors that can occur during recovery.
#[derive(Debug)]
pub enum RecoveryError {
    /// Storage error.
    Storage(StorageError),
    /// The checkpoint image is unreadable.
    Checkpoint(CheckpointError),
}

impl std::fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "recovery storage error: {e}"),
            Self::Checkpoint(e) => write!(f, "recovery checkpoint error: {e}"),
        }
    }
}

impl std::error::Error for RecoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Checkpoint(e) => Some(e),
        }
    }
}

impl From<StorageError> for RecoveryError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<CheckpointError> for RecoveryError {
    fn from(e: CheckpointError) -> Self {
        Self::Checkpoint(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::checkpoint::encode_snapshot;
    use crate::storage::engine::KvRead;
    use crate::storage::memory::MemoryStorage;

    fn put(txn_id: TxnId, lsn: Lsn, key: &[u8]) -> LogRecord {
        LogRecord::new(
            txn_id,
            lsn,
            LogRecordPayload::Put {
                table: Table::Datasets,
                key: key.to_vec(),
                value: b"v".to_vec(),
            },
        )
    }

    fn transaction(txn_id: TxnId, first_lsn: Lsn, keys: &[&[u8]], commit: bool) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut lsn = first_lsn;
        LogRecord::new(txn_id, lsn, LogRecordPayload::Begin).write_to(&mut bytes).expect("encode");
        for key in keys {
            lsn += 1;
            put(txn_id, lsn, key).write_to(&mut bytes).expect("encode");
        }
        if commit {
            lsn += 1;
            LogRecord::new(txn_id, lsn, LogRecordPayload::Commit)
                .write_to(&mut bytes)
                .expect("encode");
        }
        bytes
    }

    #[test]
    fn test_recover_empty_storage() {
        let mut storage = MemoryStorage::new(1);
        let state = recover(&mut storage).expect("recover");
        assert!(state.snapshot.is_empty());
        assert_eq!(state.next_txn_id, 1);
        assert_eq!(state.next_lsn, 1);
        assert_eq!(state.result, RecoveryResult::default());
    }

    #[test]
    fn test_recover_committed_transaction() {
        let mut storage = MemoryStorage::new(1);
        storage
            .append_wal(&transaction(1, 1, &[b"a", b"b"], true))
            .expect("append");

        let state = recover(&mut storage).expect("recover");
        assert!(state.snapshot.contains(Table::Datasets, b"a"));
        assert!(state.snapshot.contains(Table::Datasets, b"b"));
        assert_eq!(state.result.transactions_replayed, 1);
        assert_eq!(state.result.operations_applied, 2);
        assert_eq!(state.next_txn_id, 2);
        assert_eq!(state.next_lsn, 5);
    }

    #[test]
    fn test_recover_uncommitted_transaction_discarded() {
        let mut storage = MemoryStorage::new(1);
        let committed = transaction(1, 1, &[b"a"], true);
        let mut wal = committed.clone();
        wal.extend(transaction(2, 4, &[b"b"], false));
        storage.append_wal(&wal).expect("append");

        let state = recover(&mut storage).expect("recover");
        assert!(state.snapshot.contains(Table::Datasets, b"a"));
        assert!(!state.snapshot.contains(Table::Datasets, b"b"));
        assert_eq!(state.result.transactions_discarded, 1);
        // The uncommitted tail is cut, but its txn id is still never reused.
        assert_eq!(state.wal_len, committed.len() as u64);
        assert_eq!(storage.read_wal().expect("read"), committed);
        assert_eq!(state.next_txn_id, 3);
    }

    #[test]
    fn test_recover_torn_tail() {
        let mut storage = MemoryStorage::new(1);
        let committed = transaction(1, 1, &[b"a"], true);
        let second = transaction(2, 4, &[b"b"], true);
        storage.append_wal(&committed).expect("append");
        storage
            .append_wal(&second[..second.len() - 3])
            .expect("append");

        let state = recover(&mut storage).expect("recover");
        assert!(state.snapshot.contains(Table::Datasets, b"a"));
        assert!(!state.snapshot.contains(Table::Datasets, b"b"));
        assert!(state.result.discarded_bytes > 0);
        assert_eq!(storage.read_wal().expect("read"), committed);
    }

    #[test]
    fn test_recover_delete_after_put() {
        let mut storage = MemoryStorage::new(1);
        let mut wal = transaction(1, 1, &[b"a"], true);
        LogRecord::new(2, 4, LogRecordPayload::Begin).write_to(&mut wal).expect("encode");
        LogRecord::new(
            2,
            5,
            LogRecordPayload::Delete {
                table: Table::Datasets,
                key: b"a".to_vec(),
            },
        )
        .write_to(&mut wal)
        .expect("encode");
        LogRecord::new(2, 6, LogRecordPayload::Commit).write_to(&mut wal).expect("encode");
        storage.append_wal(&wal).expect("append");

        let state = recover(&mut storage).expect("recover");
        assert!(!state.snapshot.contains(Table::Datasets, b"a"));
        assert_eq!(state.result.transactions_replayed, 2);
    }

    #[test]
    fn test_recover_skips_transactions_in_image() {
        let mut storage = MemoryStorage::new(1);
        let mut image = Snapshot::new();
        image.put(Table::Datasets, b"a".to_vec(), b"v".to_vec());
        storage
            .write_snapshot(&encode_snapshot(&image, 2, 3).expect("encode"))
            .expect("snapshot");
        // The WAL was not reset before the crash.
        let mut wal = transaction(1, 1, &[b"a"], true);
        wal.extend(transaction(2, 4, &[b"b"], true));
        storage.append_wal(&wal).expect("append");

        let state = recover(&mut storage).expect("recover");
        assert_eq!(state.result.checkpoint_lsn, 3);
        assert_eq!(state.result.transactions_skipped, 1);
        assert_eq!(state.result.transactions_replayed, 1);
        assert!(state.snapshot.contains(Table::Datasets, b"a"));
        assert!(state.snapshot.contains(Table::Datasets, b"b"));
        assert_eq!(state.next_txn_id, 3);
    }

    #[test]
    fn test_recover_corrupt_image_fails() {
        let mut storage = MemoryStorage::new(1);
        storage.write_snapshot(b"garbage").expect("snapshot");
        assert!(matches!(
            recover(&mut storage),
            Err(RecoveryError::Checkpoint(_))
        ));
    }
}
