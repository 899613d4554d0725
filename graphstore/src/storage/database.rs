//! Committed state plus the single-writer commit path.
//!
//! Readers take an `Arc` of the current snapshot and never block, nor are
//! blocked by, writers. Writers serialize on one async mutex around the
//! journal. A write transaction builds a `WriteBatch` over the snapshot that
//! was current when it acquired the mutex; no other writer can publish while
//! it holds the mutex, so that snapshot stays current until it commits.
//!
//! # Invariants
//!
//! - A snapshot is published only after its writes are in the WAL
//! - Dropping a `WriteTransaction` without committing leaves every table
//!   unchanged
//! - The closed flag is only set while holding the journal mutex, and every
//!   path that writes the journal checks it after taking the mutex, so
//!   nothing is written once `close` returned

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, MutexGuard};

use crate::storage::checkpoint::CheckpointResult;
use crate::storage::engine::{Snapshot, WriteBatch};
use crate::storage::io::{LogStorage, StorageError};
use crate::storage::journal::{CommitInfo, Journal, JournalConfig};
use crate::storage::recovery::{RecoveryError, RecoveryResult};

/// A database instance.
///
/// This is the main entry point for working with the storage engine.
/// It owns the journal and the committed snapshot and provides methods for
/// creating transactions.
#[derive(Debug)]
pub struct Database {
    committed: RwLock<Arc<Snapshot>>,
    journal: Mutex<Journal>,
    closed: AtomicBool,
}

impl Database {
    /// Open a database over `storage`, running crash recovery first.
    pub fn open(
        storage: Box<dyn LogStorage>,
        config: JournalConfig,
    ) -> Result<(Self, RecoveryResult), RecoveryError> {
        let (journal, recovered) = Journal::open(storage, config)?;
        let database = Self {
            committed: RwLock::new(Arc::new(recovered.snapshot)),
            journal: Mutex::new(journal),
            closed: AtomicBool::new(false),
        };
        Ok((database, recovered.result))
    }

    /// The current committed snapshot.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn snapshot(&self) -> Result<Arc<Snapshot>, StorageError> {
        let committed = self
            .committed
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(Arc::clone(&committed))
    }

    fn publish(&self, snapshot: Arc<Snapshot>) -> Result<(), StorageError> {
        let mut committed = self
            .committed
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        *committed = snapshot;
        Ok(())
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn lock_journal(&self) -> Result<MutexGuard<'_, Journal>, StorageError> {
        let journal = self.journal.lock().await;
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        Ok(journal)
    }

    /// Begin a write transaction, waiting for the current writer to finish.
    pub async fn begin_write(&self) -> Result<WriteTransaction<'_>, StorageError> {
        let journal = self.lock_journal().await?;
        let batch = WriteBatch::new(self.snapshot()?);
        Ok(WriteTransaction {
            database: self,
            journal,
            batch,
        })
    }

    /// Write a checkpoint of the committed state and reset the WAL.
    pub async fn checkpoint(&self) -> Result<CheckpointResult, StorageError> {
        let mut journal = self.lock_journal().await?;
        let snapshot = self.snapshot()?;
        let result = journal.checkpoint(&snapshot)?;
        drop(journal);
        tracing::info!(
            lsn = result.checkpoint_lsn,
            entries = result.entries_written,
            bytes = result.image_bytes,
            transactions = result.transactions_folded,
            "Checkpoint written"
        );
        Ok(result)
    }

    /// Close the database once every queued writer has finished.
    ///
    /// With `destroy` the durable artifacts are removed; otherwise a final
    /// checkpoint is written. Writers still waiting for the journal afterwards
    /// fail with `StorageError::Closed`.
    pub async fn close(&self, destroy: bool) -> Result<(), StorageError> {
        let mut journal = self.lock_journal().await?;
        self.closed.store(true, Ordering::Release);
        if destroy {
            journal.destroy()
        } else {
            let snapshot = self.snapshot()?;
            journal.checkpoint(&snapshot).map(|_| ())
        }
    }
}

/// A write transaction holding the writer lock.
#[derive(Debug)]
pub struct WriteTransaction<'a> {
    database: &'a Database,
    journal: MutexGuard<'a, Journal>,
    batch: WriteBatch,
}

impl WriteTransaction<'_> {
    /// The batch collecting this transaction's writes.
    #[must_use]
    pub const fn batch(&self) -> &WriteBatch {
        &self.batch
    }

    /// Mutable access to the batch.
    pub const fn batch_mut(&mut self) -> &mut WriteBatch {
        &mut self.batch
    }

    /// Make the batch durable and publish it.
    ///
    /// Returns `None` when the batch was empty; nothing is logged then.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn commit(self) -> Result<Option<CommitInfo>, StorageError> {
        let Self {
            database,
            mut journal,
            batch,
        } = self;

        if batch.pending().is_empty() {
            return Ok(None);
        }

        let info = journal.commit(batch.pending())?;

        let (base, pending) = batch.into_parts();
        let mut next = Arc::unwrap_or_clone(base);
        next.apply(pending);
        let next = Arc::new(next);
        database.publish(Arc::clone(&next))?;

        if journal.should_checkpoint() {
            match journal.checkpoint(&next) {
                Ok(result) => tracing::info!(
                    lsn = result.checkpoint_lsn,
                    entries = result.entries_written,
                    bytes = result.image_bytes,
                    "Automatic checkpoint written"
                ),
                // The commit itself is durable in the WAL.
                Err(e) => tracing::warn!(error = %e, "Automatic checkpoint failed"),
            }
        }

        Ok(Some(info))
    }

    /// Discard the batch.
    pub fn abort(self) {
        tracing::debug!(
            operations = self.batch.pending().len(),
            "Write transaction aborted"
        );
    }
}
