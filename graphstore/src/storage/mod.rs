//! Graph statement storage engine.
//!
//! Every piece of state lives in one set of ordered key-value tables (see
//! `engine::Table`). Writers collect mutations in a `WriteBatch`, the journal
//! makes the batch durable in a write-ahead log, and only then is the
//! batch published as a new immutable `Snapshot`.
//!
//! # Layers
//!
//! - `engine`, `key_range`: in-memory tables, snapshots and write batches
//! - `wal`, `io`, `memory`, `journal`, `checkpoint`, `recovery`: durability
//! - `database`: committed state plus the single-writer commit path
//! - `registry`, `intern`, `statements`, `allocator`: the logical tables
//! - `gc`, `integrity`: dataset deletion and invariant checks
//! - `transaction`: dataset-scoped read and write handles
//!
//! # Usage
//!
//! ```ignore
//! let (db, _) = Database::open(Box::new(MemoryStorage::default()), JournalConfig::default())?;
//!
//! let mut txn = db.begin_write().await?;
//! let (dataset, _) = registry::create(txn.batch_mut(), "people")?;
//! txn.commit()?;
//! ```

pub mod allocator;
pub mod checkpoint;
pub mod database;
pub mod engine;
pub mod gc;
pub mod integrity;
pub mod intern;
pub mod io;
pub mod journal;
pub mod key_range;
pub mod memory;
pub mod recovery;
pub mod registry;
pub mod statements;
pub mod transaction;
pub mod wal;

pub use checkpoint::{CheckpointConfig, CheckpointResult};
pub use database::{Database, WriteTransaction};
pub use engine::{KvRead, Snapshot, Table, WriteBatch};
pub use gc::GcReport;
pub use integrity::IntegrityViolation;
pub use intern::{ATTRIBUTES, BYTES, ENTITIES, InternId, InterningTable, STRINGS};
pub use io::{FileStorage, LogStorage, StorageError};
pub use journal::{CommitInfo, JournalConfig};
pub use key_range::{KeyRange, KeyRangeError};
pub use memory::{FaultConfig, MemoryStorage, MemoryStorageStats};
pub use recovery::{RecoveryError, RecoveryResult};
pub use statements::StatementScan;
pub use transaction::{ReadTxn, StatementReader, WriteTxn};
pub use wal::WalError;
