//! The dataset-scoped graph store.
//!
//! `GraphStore` is the only entry point callers need. It owns the database,
//! manages the dataset registry and runs caller logic inside read or write
//! transactions scoped to one dataset.
//!
//! # Transaction lifecycle
//!
//! 1. The dataset name is resolved in the transaction's snapshot. An unknown
//!    name fails with `StoreError::DatasetNotFound` before caller logic runs.
//! 2. Reads pin the current committed snapshot. Writes also take the single
//!    writer lock and collect their mutations in a batch.
//! 3. Caller logic runs synchronously against the handle.
//! 4. `Ok` commits the batch (WAL append, sync, publish). `Err` drops it and
//!    hands the caller's error back unchanged.
//!
//! # Invariants
//!
//! - Once `close` has been called every operation fails with
//!   `StoreError::Closed`, including writers that were already waiting for
//!   the writer lock
//! - Deleting a dataset removes its statements and references in the same
//!   commit that removes its name

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::storage::checkpoint::CheckpointResult;
use crate::storage::database::Database;
use crate::storage::gc;
use crate::storage::integrity::{self, IntegrityViolation};
use crate::storage::io::{FileStorage, LogStorage};
use crate::storage::journal::JournalConfig;
use crate::storage::memory::MemoryStorage;
use crate::storage::recovery::RecoveryResult;
use crate::storage::registry;
use crate::storage::transaction::{ReadTxn, WriteTxn};
use crate::types::Dataset;

/// A handle onto an open graph store.
#[derive(Debug)]
pub struct GraphStore {
    database: Database,
}

impl GraphStore {
    /// Open the store described by `config`, recovering its durable state.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let storage = FileStorage::open(&config.data_directory)?;
        tracing::info!(
            directory = %config.data_directory.display(),
            "Opening graph store"
        );
        Self::with_storage(Box::new(storage), config.journal_config())
    }

    /// Open an empty store that lives in memory only.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_storage(Box::new(MemoryStorage::default()), JournalConfig::default())
    }

    /// Open a store over any `LogStorage`.
    pub fn with_storage(
        storage: Box<dyn LogStorage>,
        config: JournalConfig,
    ) -> Result<Self, StoreError> {
        let (database, recovery) = Database::open(storage, config)?;
        log_recovery(&recovery);
        Ok(Self { database })
    }

    /// Whether `close` has not been called yet.
    pub fn is_open(&self) -> bool {
        !self.database.is_closed()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(StoreError::Closed)
        }
    }

    /// Create the dataset `name`, or return it unchanged if it exists.
    pub async fn create_dataset(&self, name: &str) -> Result<Dataset, StoreError> {
        self.ensure_open()?;
        let mut txn = self.database.begin_write().await?;
        let (dataset, created) = registry::create(txn.batch_mut(), name)?;
        if created {
            txn.commit()?;
            tracing::info!(dataset = %dataset, "Created dataset");
        } else {
            txn.abort();
        }
        Ok(dataset)
    }

    /// Delete the dataset `name` with all of its statements, releasing its
    /// interned references.
    ///
    /// Returns the deleted dataset, or `None` if no dataset had that name.
    pub async fn delete_dataset(&self, name: &str) -> Result<Option<Dataset>, StoreError> {
        self.ensure_open()?;
        let mut txn = self.database.begin_write().await?;
        let Some(dataset) = registry::resolve(txn.batch(), name)? else {
            txn.abort();
            return Ok(None);
        };
        let report = match gc::collect_dataset(txn.batch_mut(), &dataset) {
            Ok(report) => report,
            Err(e) => {
                txn.abort();
                return Err(e);
            }
        };
        txn.commit()?;
        tracing::info!(
            dataset = %dataset,
            statements = report.statements_removed,
            evicted = report.entries_evicted,
            "Deleted dataset"
        );
        Ok(Some(dataset))
    }

    /// Whether a dataset called `name` exists.
    pub async fn dataset_exists(&self, name: &str) -> Result<bool, StoreError> {
        self.ensure_open()?;
        let snapshot = self.database.snapshot()?;
        Ok(registry::exists(&*snapshot, name))
    }

    /// Every dataset, in name order.
    pub async fn all_datasets(&self) -> Result<Vec<Dataset>, StoreError> {
        self.ensure_open()?;
        let snapshot = self.database.snapshot()?;
        registry::all(&*snapshot)
    }

    /// Every dataset whose name starts with `prefix`, in name order.
    pub async fn match_dataset_prefix(&self, prefix: &str) -> Result<Vec<Dataset>, StoreError> {
        self.ensure_open()?;
        let snapshot = self.database.snapshot()?;
        registry::match_prefix(&*snapshot, prefix)
    }

    /// Every dataset whose name lies in `[start, end)`, in name order.
    pub async fn match_dataset_range(
        &self,
        start: &str,
        end: &str,
    ) -> Result<Vec<Dataset>, StoreError> {
        self.ensure_open()?;
        let snapshot = self.database.snapshot()?;
        registry::match_range(&*snapshot, start, end)
    }

    /// Run `logic` against a read-only view of dataset `name`.
    pub async fn query<T, E, F>(&self, name: &str, logic: F) -> Result<T, E>
    where
        F: FnOnce(&ReadTxn) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.ensure_open()?;
        let snapshot = self.database.snapshot().map_err(StoreError::from)?;
        let dataset = registry::resolve(&*snapshot, name)?
            .ok_or_else(|| StoreError::DatasetNotFound(name.to_string()))?;
        logic(&ReadTxn::new(dataset, snapshot))
    }

    /// Run `logic` against a writable view of dataset `name`, committing its
    /// writes if it returns `Ok`.
    pub async fn write<T, E, F>(&self, name: &str, logic: F) -> Result<T, E>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.ensure_open()?;
        let txn = self
            .database
            .begin_write()
            .await
            .map_err(StoreError::from)?;
        let Some(dataset) = registry::resolve(txn.batch(), name)? else {
            txn.abort();
            return Err(StoreError::DatasetNotFound(name.to_string()).into());
        };

        let mut scoped = WriteTxn::new(dataset, txn);
        match logic(&mut scoped) {
            Ok(value) => {
                if let Some(info) = scoped.into_inner().commit().map_err(StoreError::from)? {
                    tracing::debug!(
                        dataset = name,
                        txn_id = info.txn_id,
                        operations = info.operations,
                        "Write transaction committed"
                    );
                }
                Ok(value)
            }
            Err(e) => {
                scoped.into_inner().abort();
                Err(e)
            }
        }
    }

    /// Write a checkpoint of the committed state.
    pub async fn checkpoint(&self) -> Result<CheckpointResult, StoreError> {
        self.ensure_open()?;
        Ok(self.database.checkpoint().await?)
    }

    /// Check every storage invariant against the committed state.
    pub async fn verify_integrity(&self) -> Result<Vec<IntegrityViolation>, StoreError> {
        self.ensure_open()?;
        let snapshot = self.database.snapshot()?;
        Ok(integrity::verify(&*snapshot))
    }

    /// Close the store.
    ///
    /// Waits for the writer holding the lock, if any. With
    /// `delete_underlying_store` the WAL and snapshot are removed; otherwise a
    /// final checkpoint is written so the next open replays nothing.
    pub async fn close(&self, delete_underlying_store: bool) -> Result<(), StoreError> {
        self.database.close(delete_underlying_store).await?;
        tracing::info!(deleted = delete_underlying_store, "Closed graph store");
        Ok(())
    }
}

fn log_recovery(result: &RecoveryResult) {
    if result.transactions_replayed > 0 || result.transactions_discarded > 0 {
        tracing::info!(
            replayed = result.transactions_replayed,
            skipped = result.transactions_skipped,
            discarded = result.transactions_discarded,
            operations = result.operations_applied,
            lsn = result.recovered_lsn,
            "Recovered graph store"
        );
    } else {
        tracing::info!(lsn = result.recovered_lsn, "Opened graph store");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::intern::{ENTITIES, STRINGS};
    use crate::storage::memory::FaultConfig;
    use crate::storage::transaction::StatementReader;
    use crate::types::{StatementPattern, Value};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn names(datasets: &[Dataset]) -> Vec<&str> {
        datasets.iter().map(|d| d.name.as_str()).collect()
    }

    fn store_over(storage: &MemoryStorage) -> GraphStore {
        GraphStore::with_storage(Box::new(storage.handle()), JournalConfig::default())
            .expect("open store")
    }

    async fn add_person(store: &GraphStore, dataset: &str, person: &str, name: &str) {
        store
            .write(dataset, |txn| {
                txn.assert_statement(person, "name", &Value::String(name.to_string()))
            })
            .await
            .expect("write");
    }

    async fn names_in(store: &GraphStore, dataset: &str) -> Vec<Value> {
        store
            .query(dataset, |txn| {
                txn.statements(StatementPattern::any())?
                    .into_iter()
                    .map(|s| txn.resolve(s.value))
                    .collect::<Result<Vec<_>, StoreError>>()
            })
            .await
            .expect("query")
    }

    #[tokio::test]
    async fn test_create_dataset_twice() {
        let store = GraphStore::open_in_memory().expect("open");
        let first = store.create_dataset("people").await.expect("create");
        let second = store.create_dataset("people").await.expect("create");
        assert_eq!(first, second);

        let all = store.all_datasets().await.expect("all");
        assert_eq!(names(&all), vec!["people"]);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_name() {
        let store = GraphStore::open_in_memory().expect("open");
        assert!(matches!(
            store.create_dataset("").await,
            Err(StoreError::InvalidDatasetName)
        ));
    }

    #[tokio::test]
    async fn test_delete_missing_dataset_is_noop() {
        let store = GraphStore::open_in_memory().expect("open");
        store.create_dataset("a").await.expect("create");
        let before = store.database.snapshot().expect("snapshot");

        assert_eq!(store.delete_dataset("missing").await.expect("delete"), None);
        assert_eq!(*store.database.snapshot().expect("snapshot"), *before);
    }

    #[tokio::test]
    async fn test_delete_evicts_exclusive_values_and_keeps_shared() {
        let store = GraphStore::open_in_memory().expect("open");
        store.create_dataset("d").await.expect("create");
        store.create_dataset("d2").await.expect("create");
        add_person(&store, "d", "alice", "Alice").await;
        add_person(&store, "d2", "alice", "Alicia").await;

        let deleted = store.delete_dataset("d").await.expect("delete");
        assert_eq!(deleted.map(|d| d.name), Some("d".to_string()));
        assert!(!store.dataset_exists("d").await.expect("exists"));

        let snapshot = store.database.snapshot().expect("snapshot");
        assert_eq!(
            STRINGS.lookup_by_value(&*snapshot, b"Alice").expect("lookup"),
            None
        );
        assert!(
            ENTITIES
                .lookup_by_value(&*snapshot, b"alice")
                .expect("lookup")
                .is_some()
        );

        assert_eq!(
            names_in(&store, "d2").await,
            vec![Value::String("Alicia".to_string())]
        );
        assert!(store.verify_integrity().await.expect("verify").is_empty());
    }

    #[tokio::test]
    async fn test_deleted_dataset_is_unreachable() {
        let store = GraphStore::open_in_memory().expect("open");
        store.create_dataset("d").await.expect("create");
        add_person(&store, "d", "bob", "Bob").await;
        store.delete_dataset("d").await.expect("delete");

        let result = store.query("d", |_| Ok::<_, StoreError>(())).await;
        assert!(matches!(result, Err(StoreError::DatasetNotFound(name)) if name == "d"));

        // A new dataset with the same name starts empty.
        store.create_dataset("d").await.expect("create");
        assert!(names_in(&store, "d").await.is_empty());
    }

    #[tokio::test]
    async fn test_match_prefix_and_range() {
        let store = GraphStore::open_in_memory().expect("open");
        for name in ["a1", "a2", "b1"] {
            store.create_dataset(name).await.expect("create");
        }
        let found = store.match_dataset_prefix("a").await.expect("prefix");
        assert_eq!(names(&found), vec!["a1", "a2"]);
        assert!(matches!(
            store.match_dataset_prefix("").await,
            Err(StoreError::EmptyPrefix)
        ));

        let store = GraphStore::open_in_memory().expect("open");
        for name in ["a", "b", "c", "d"] {
            store.create_dataset(name).await.expect("create");
        }
        let found = store.match_dataset_range("a", "c").await.expect("range");
        assert_eq!(names(&found), vec!["a", "b"]);
    }

    #[derive(Debug, PartialEq)]
    enum AppError {
        Store(String),
        Rejected,
    }

    impl From<StoreError> for AppError {
        fn from(e: StoreError) -> Self {
            Self::Store(e.to_string())
        }
    }

    #[tokio::test]
    async fn test_failed_write_leaves_store_unchanged() {
        let store = GraphStore::open_in_memory().expect("open");
        store.create_dataset("d").await.expect("create");
        add_person(&store, "d", "alice", "Alice").await;
        let before = store.database.snapshot().expect("snapshot");

        let result = store
            .write("d", |txn| {
                txn.assert_statement("bob", "name", &Value::String("Bob".to_string()))?;
                txn.retract_statement("alice", "name", &Value::String("Alice".to_string()))?;
                Err::<(), _>(AppError::Rejected)
            })
            .await;
        assert_eq!(result, Err(AppError::Rejected));
        assert_eq!(*store.database.snapshot().expect("snapshot"), *before);
    }

    #[tokio::test]
    async fn test_write_to_missing_dataset_skips_logic() {
        let store = GraphStore::open_in_memory().expect("open");
        let mut ran = false;
        let result = store
            .write("missing", |_| {
                ran = true;
                Ok::<_, StoreError>(())
            })
            .await;
        assert!(matches!(result, Err(StoreError::DatasetNotFound(_))));
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_insert_requires_reference() {
        let store = GraphStore::open_in_memory().expect("open");
        store.create_dataset("a").await.expect("create");
        store.create_dataset("b").await.expect("create");
        add_person(&store, "a", "alice", "Alice").await;

        let statement = store
            .query("a", |txn| {
                txn.statements(StatementPattern::any())
                    .map(|found| found[0])
            })
            .await
            .expect("query");

        // b has never interned "alice", so it cannot store a statement using it.
        let result = store.write("b", |txn| txn.insert(statement)).await;
        assert!(matches!(
            result,
            Err(StoreError::UnreferencedValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_lookups_are_scoped_to_dataset() {
        let store = GraphStore::open_in_memory().expect("open");
        store.create_dataset("a").await.expect("create");
        store.create_dataset("b").await.expect("create");
        add_person(&store, "a", "alice", "Alice").await;

        let in_a = store
            .query("a", |txn| txn.entity("alice"))
            .await
            .expect("query");
        assert!(in_a.is_some());
        let in_b = store
            .query("b", |txn| txn.entity("alice"))
            .await
            .expect("query");
        assert_eq!(in_b, None);
    }

    #[tokio::test]
    async fn test_dereference_in_use_is_rejected() {
        let store = GraphStore::open_in_memory().expect("open");
        store.create_dataset("a").await.expect("create");
        add_person(&store, "a", "alice", "Alice").await;

        let result = store
            .write("a", |txn| {
                let alice = txn.intern_entity("alice")?;
                txn.dereference(alice)
            })
            .await;
        assert!(matches!(result, Err(StoreError::InUse { .. })));

        let evicted = store
            .write("a", |txn| {
                let unused = txn.intern_entity("carol")?;
                txn.dereference(unused)
            })
            .await
            .expect("write");
        assert!(evicted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reads_see_writes_only_after_commit() {
        let store = Arc::new(GraphStore::open_in_memory().expect("open"));
        store.create_dataset("a").await.expect("create");
        store.create_dataset("b").await.expect("create");
        add_person(&store, "a", "alice", "Alice").await;
        add_person(&store, "b", "bob", "Bob").await;

        let (in_write_tx, in_write_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .write("a", move |txn| {
                        txn.assert_statement("carol", "name", &Value::String("Carol".into()))?;
                        in_write_tx.send(()).ok();
                        release_rx.recv().ok();
                        Ok::<_, StoreError>(())
                    })
                    .await
            })
        };

        in_write_rx.await.expect("writer started");
        // Both datasets are readable while the write is in flight, and the
        // uncommitted statement is invisible.
        assert_eq!(names_in(&store, "a").await.len(), 1);
        assert_eq!(names_in(&store, "b").await.len(), 1);

        release_tx.send(()).expect("release writer");
        writer.await.expect("join").expect("write");
        assert_eq!(names_in(&store, "a").await.len(), 2);
    }

    #[tokio::test]
    async fn test_reopen_restores_state() {
        let storage = MemoryStorage::new(7);
        {
            let store = store_over(&storage);
            store.create_dataset("people").await.expect("create");
            add_person(&store, "people", "alice", "Alice").await;
            store.checkpoint().await.expect("checkpoint");
            add_person(&store, "people", "bob", "Bob").await;
        }

        let store = store_over(&storage);
        assert!(store.dataset_exists("people").await.expect("exists"));
        assert_eq!(names_in(&store, "people").await.len(), 2);
        assert!(store.verify_integrity().await.expect("verify").is_empty());
    }

    #[tokio::test]
    async fn test_torn_tail_is_discarded() {
        let storage = MemoryStorage::new(3);
        {
            let store = store_over(&storage);
            store.create_dataset("a").await.expect("create");
        }
        storage.append_garbage(&[0x20, 0, 0, 0, 1, 2]).expect("garbage");

        let store = store_over(&storage);
        assert!(store.dataset_exists("a").await.expect("exists"));
        store.create_dataset("b").await.expect("create after recovery");
    }

    #[tokio::test]
    async fn test_dataset_ids_not_reused_across_reopen() {
        let storage = MemoryStorage::new(5);
        let first = {
            let store = store_over(&storage);
            let d = store.create_dataset("a").await.expect("create");
            store.delete_dataset("a").await.expect("delete");
            d
        };

        let store = store_over(&storage);
        let second = store.create_dataset("a").await.expect("create");
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn test_sync_fault_aborts_commit() {
        let storage = MemoryStorage::new(9);
        let store = store_over(&storage);
        store.create_dataset("a").await.expect("create");
        let before = store.database.snapshot().expect("snapshot");

        storage
            .set_fault_config(FaultConfig::failing_sync())
            .expect("faults");
        let result = store
            .write("a", |txn| {
                txn.assert_statement("alice", "age", &Value::Integer(30))
            })
            .await;
        assert!(matches!(result, Err(StoreError::Storage(_))));
        assert_eq!(*store.database.snapshot().expect("snapshot"), *before);

        storage
            .set_fault_config(FaultConfig::no_faults())
            .expect("faults");
        drop(store);
        let store = store_over(&storage);
        assert!(names_in(&store, "a").await.is_empty());
    }

    #[tokio::test]
    async fn test_random_faults_preserve_committed_state() {
        let storage = MemoryStorage::with_config(11, FaultConfig::low_faults());
        let store = store_over(&storage);
        let mut created = 0;
        for i in 0..200_i64 {
            let name = format!("d{}", i % 5);
            if store.create_dataset(&name).await.is_ok() {
                created += 1;
            }
            let result = store
                .write(&name, |txn| {
                    txn.assert_statement(&format!("e{}", i % 17), "n", &Value::Integer(i))
                })
                .await;
            match result {
                Ok(_) | Err(StoreError::DatasetNotFound(_) | StoreError::Storage(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
            if i % 40 == 39 {
                store.delete_dataset(&name).await.ok();
            }
        }
        assert!(created > 0);
        assert!(storage.stats().expect("stats").injected_faults > 0);

        let committed = store.database.snapshot().expect("snapshot");
        drop(store);
        storage.crash().expect("crash");
        storage
            .set_fault_config(FaultConfig::no_faults())
            .expect("faults");

        let store = store_over(&storage);
        assert_eq!(*store.database.snapshot().expect("snapshot"), *committed);
        assert!(store.verify_integrity().await.expect("verify").is_empty());
    }

    #[tokio::test]
    async fn test_integrity_after_mixed_operations() {
        let store = GraphStore::open_in_memory().expect("open");
        for round in 0..4 {
            for name in ["x", "y", "z"] {
                store.create_dataset(name).await.expect("create");
                add_person(&store, name, "shared", &format!("{name}{round}")).await;
                store
                    .write(name, |txn| {
                        txn.assert_statement("shared", "blob", &Value::Bytes(vec![round]))?;
                        txn.intern_value(&Value::Identifier("unused".into()))
                    })
                    .await
                    .expect("write");
            }
            store.delete_dataset(["x", "y", "z"][usize::from(round % 3)]).await.expect("delete");
            assert_eq!(
                store.verify_integrity().await.expect("verify"),
                Vec::new()
            );
        }
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let storage = MemoryStorage::new(1);
        let store = store_over(&storage);
        store.create_dataset("a").await.expect("create");
        store.close(false).await.expect("close");

        assert!(!store.is_open());
        assert!(matches!(
            store.create_dataset("b").await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(store.all_datasets().await, Err(StoreError::Closed)));
        assert!(matches!(
            store.query("a", |_| Ok::<_, StoreError>(())).await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(store.close(false).await, Err(StoreError::Closed)));

        // A clean close leaves nothing to replay.
        assert_eq!(storage.wal_len().expect("len"), 0);
    }

    #[tokio::test]
    async fn test_reinterning_referenced_value_commits_nothing() {
        let storage = MemoryStorage::new(1);
        let store = store_over(&storage);
        store.create_dataset("people").await.expect("create");
        add_person(&store, "people", "alice", "Alice").await;
        let wal_len = storage.wal_len().expect("len");

        store
            .write("people", |txn| {
                txn.intern_entity("alice")?;
                txn.intern_value(&Value::String("Alice".to_string()))
            })
            .await
            .expect("write");
        assert_eq!(storage.wal_len().expect("len"), wal_len);
    }

    #[tokio::test]
    async fn test_close_fails_writers_queued_behind_it() {
        let storage = MemoryStorage::new(1);
        let store = Arc::new(store_over(&storage));
        store.create_dataset("a").await.expect("create");

        let held = store.database.begin_write().await.expect("begin");
        let closer = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.close(true).await }
        });
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        // Still open: the closer is waiting for the writer lock.
        assert!(store.is_open());
        let writer = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.create_dataset("late").await }
        });
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        held.abort();

        closer.await.expect("join").expect("close");
        assert!(matches!(
            writer.await.expect("join"),
            Err(StoreError::Closed)
        ));
        assert!(!store.is_open());
        assert_eq!(storage.wal_len().expect("len"), 0);
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempdir().expect("create temp dir");
        let config = StoreConfig::in_directory(dir.path().join("store"));
        {
            let store = GraphStore::open(&config).expect("open");
            store.create_dataset("people").await.expect("create");
            add_person(&store, "people", "alice", "Alice").await;
            store.close(false).await.expect("close");
        }

        let store = GraphStore::open(&config).expect("reopen");
        assert_eq!(
            names_in(&store, "people").await,
            vec![Value::String("Alice".to_string())]
        );
        store.close(true).await.expect("close and delete");
        assert!(!config.data_directory.exists());
    }
}
