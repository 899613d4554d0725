//! Storage abstraction for the journal.
//!
//! The journal only needs two durable artifacts: an append-only write-ahead
//! log and a checkpoint snapshot. `LogStorage` abstracts over where they live
//! so that production uses real files while tests use `MemoryStorage` with
//! fault injection.
//!
//! # Implementation Notes
//!
//! Implementations must ensure:
//! - `read_wal` returns every byte appended since the last `truncate_wal`
//! - `sync` makes all previous appends durable
//! - `write_snapshot` replaces the previous snapshot atomically: a reader sees
//!   either the old or the new snapshot, never a mix

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::storage::checkpoint::CheckpointError;
use crate::storage::wal::WalError;

/// WAL file name inside the data directory.
pub const WAL_FILE_NAME: &str = "wal.log";

/// Snapshot file name inside the data directory.
pub const SNAPSHOT_FILE_NAME: &str = "snapshot.bin";

const SNAPSHOT_TEMP_FILE_NAME: &str = "snapshot.bin.tmp";

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// WAL record could not be encoded or decoded.
    Wal(WalError),
    /// Snapshot image could not be encoded.
    Checkpoint(CheckpointError),
    /// Injected fault for simulation.
    InjectedFault(String),
    /// Corruption detected.
    Corruption(String),
    /// A lock guarding engine state was poisoned.
    LockPoisoned,
    /// The database was closed.
    Closed,
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Wal(e) => write!(f, "WAL error: {e}"),
            Self::Checkpoint(e) => write!(f, "checkpoint error: {e}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::LockPoisoned => write!(f, "engine lock poisoned"),
            Self::Closed => write!(f, "database is closed"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Wal(e) => Some(e),
            Self::Checkpoint(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<WalError> for StorageError {
    fn from(e: WalError) -> Self {
        Self::Wal(e)
    }
}

impl From<CheckpointError> for StorageError {
    fn from(e: CheckpointError) -> Self {
        Self::Checkpoint(e)
    }
}

/// Durable home of the write-ahead log and the checkpoint snapshot.
pub trait LogStorage: Send {
    // ========== WAL Operations ==========

    /// Read the whole log.
    fn read_wal(&mut self) -> Result<Vec<u8>, StorageError>;

    /// Append bytes to the end of the log.
    ///
    /// The write may be buffered until `sync` is called.
    fn append_wal(&mut self, bytes: &[u8]) -> Result<(), StorageError>;

    /// Cut the log back to `len` bytes.
    fn truncate_wal(&mut self, len: u64) -> Result<(), StorageError>;

    /// Sync all pending appends to durable storage.
    fn sync(&mut self) -> Result<(), StorageError>;

    // ========== Snapshot Operations ==========

    /// Read the current snapshot, if one was ever written.
    fn read_snapshot(&mut self) -> Result<Option<Vec<u8>>, StorageError>;

    /// Atomically replace the snapshot.
    fn write_snapshot(&mut self, bytes: &[u8]) -> Result<(), StorageError>;

    // ========== Lifecycle ==========

    /// Remove every durable artifact.
    fn destroy(&mut self) -> Result<(), StorageError>;
}

/// File-backed storage: a directory holding `wal.log` and `snapshot.bin`.
#[derive(Debug)]
pub struct FileStorage {
    directory: PathBuf,
    wal: File,
}

impl FileStorage {
    /// Open the storage in `directory`, creating the directory and an empty
    /// log if needed.
    pub fn open(directory: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(directory)?;
        let wal = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(directory.join(WAL_FILE_NAME))?;
        Ok(Self {
            directory: directory.to_path_buf(),
            wal,
        })
    }
}

impl LogStorage for FileStorage {
    fn read_wal(&mut self) -> Result<Vec<u8>, StorageError> {
        let mut bytes = Vec::new();
        self.wal.seek(SeekFrom::Start(0))?;
        self.wal.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn append_wal(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        self.wal.seek(SeekFrom::End(0))?;
        self.wal.write_all(bytes)?;
        Ok(())
    }

    fn truncate_wal(&mut self, len: u64) -> Result<(), StorageError> {
        self.wal.set_len(len)?;
        self.wal.seek(SeekFrom::End(0))?;
        self.wal.sync_data()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        self.wal.flush()?;
        self.wal.sync_data()?;
        Ok(())
    }

    fn read_snapshot(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        match std::fs::read(self.directory.join(SNAPSHOT_FILE_NAME)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn write_snapshot(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        // Write-then-rename so a crash leaves either the old or the new file.
        let temp_path = self.directory.join(SNAPSHOT_TEMP_FILE_NAME);
        {
            let mut temp = File::create(&temp_path)?;
            temp.write_all(bytes)?;
            temp.sync_all()?;
        }
        std::fs::rename(&temp_path, self.directory.join(SNAPSHOT_FILE_NAME))?;
        Ok(())
    }

    /// Remove the WAL and snapshot files. The directory itself is removed
    /// only if nothing else lives in it.
    fn destroy(&mut self) -> Result<(), StorageError> {
        for name in [WAL_FILE_NAME, SNAPSHOT_FILE_NAME, SNAPSHOT_TEMP_FILE_NAME] {
            match std::fs::remove_file(self.directory.join(name)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
        }
        let is_empty = match std::fs::read_dir(&self.directory) {
            Ok(mut entries) => entries.next().is_none(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::Io(e)),
        };
        if is_empty {
            match std::fs::remove_dir(&self.directory) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
        }
        Ok(())
    }
}
