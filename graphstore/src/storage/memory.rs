//! In-memory storage with fault injection.
//!
//! This module provides an in-memory implementation of the `LogStorage`
//! trait with support for fault injection at various levels:
//! - Append errors
//! - Torn appends (only a prefix of the bytes reaches the log)
//! - Sync failures
//! - Snapshot write failures
//!
//! Faults are drawn from a seeded RNG, so the same seed produces the same
//! sequence of faults.
//!
//! Handles returned by `MemoryStorage::handle` share the same underlying
//! bytes, which lets a test drop a store and reopen it over the "disk" it
//! left behind. `crash` discards everything appended since the last sync.

use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::io::{LogStorage, StorageError};

/// Configuration for fault injection.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultConfig {
    /// Probability of an append error (0.0 - 1.0).
    pub append_error_rate: f64,
    /// Probability of a torn append (0.0 - 1.0).
    pub torn_append_rate: f64,
    /// Probability of a sync error (0.0 - 1.0).
    pub sync_error_rate: f64,
    /// Probability of a snapshot write error (0.0 - 1.0).
    pub snapshot_error_rate: f64,
}

impl FaultConfig {
    /// Create a fault config with no faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Fail every sync.
    #[must_use]
    pub const fn failing_sync() -> Self {
        Self {
            append_error_rate: 0.0,
            torn_append_rate: 0.0,
            sync_error_rate: 1.0,
            snapshot_error_rate: 0.0,
        }
    }

    /// Create a fault config with low fault rates (for stress testing).
    #[must_use]
    pub const fn low_faults() -> Self {
        Self {
            append_error_rate: 0.01,
            torn_append_rate: 0.01,
            sync_error_rate: 0.01,
            snapshot_error_rate: 0.01,
        }
    }
}

/// Statistics about memory storage operations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStorageStats {
    /// Number of appends attempted.
    pub appends: u64,
    /// Number of syncs attempted.
    pub syncs: u64,
    /// Number of snapshots written.
    pub snapshots: u64,
    /// Number of injected faults of any kind.
    pub injected_faults: u64,
}

#[derive(Debug)]
struct MemoryState {
    wal: Vec<u8>,
    synced_len: usize,
    snapshot: Option<Vec<u8>>,
    fault_config: FaultConfig,
    rng: StdRng,
    stats: MemoryStorageStats,
}

impl MemoryState {
    /// Check if a fault should be injected based on the given rate.
    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        let hit = self.rng.random::<f64>() < rate;
        if hit {
            self.stats.injected_faults += 1;
        }
        hit
    }
}

/// In-memory `LogStorage`.
#[derive(Debug)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(0)
    }
}

impl MemoryStorage {
    /// Create an empty storage without faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, FaultConfig::no_faults())
    }

    /// Create an empty storage with custom fault configuration.
    #[must_use]
    pub fn with_config(seed: u64, fault_config: FaultConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                wal: Vec::new(),
                synced_len: 0,
                snapshot: None,
                fault_config,
                rng: StdRng::seed_from_u64(seed),
                stats: MemoryStorageStats::default(),
            })),
        }
    }

    /// Another handle onto the same bytes.
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn handle(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Update the fault configuration.
    pub fn set_fault_config(&self, config: FaultConfig) -> Result<(), StorageError> {
        self.lock()?.fault_config = config;
        Ok(())
    }

    /// Get the current statistics.
    pub fn stats(&self) -> Result<MemoryStorageStats, StorageError> {
        Ok(self.lock()?.stats)
    }

    /// Current log length in bytes.
    pub fn wal_len(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.wal.len())
    }

    /// Drop every byte appended since the last successful sync.
    pub fn crash(&self) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        let synced = state.synced_len;
        state.wal.truncate(synced);
        Ok(())
    }

    /// Append raw bytes to the log, bypassing faults. Used to simulate a torn
    /// or corrupt tail left by a crash.
    pub fn append_garbage(&self, bytes: &[u8]) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        state.wal.extend_from_slice(bytes);
        state.synced_len = state.wal.len();
        Ok(())
    }
}

impl LogStorage for MemoryStorage {
    fn read_wal(&mut self) -> Result<Vec<u8>, StorageError> {
        Ok(self.lock()?.wal.to_vec())
    }

    fn append_wal(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        state.stats.appends += 1;

        let rate = state.fault_config.append_error_rate;
        if state.should_inject_fault(rate) {
            return Err(StorageError::InjectedFault(
                "simulated append error".to_string(),
            ));
        }

        let rate = state.fault_config.torn_append_rate;
        if state.should_inject_fault(rate) {
            let cutoff = state.rng.random_range(0..bytes.len().max(1));
            state.wal.extend_from_slice(&bytes[..cutoff.min(bytes.len())]);
            return Err(StorageError::InjectedFault(
                "simulated torn append".to_string(),
            ));
        }

        state.wal.extend_from_slice(bytes);
        Ok(())
    }

    fn truncate_wal(&mut self, len: u64) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        let len = usize::try_from(len).map_err(|_| {
            StorageError::Corruption(format!("truncate length {len} out of range"))
        })?;
        state.wal.truncate(len);
        state.synced_len = state.synced_len.min(len);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        state.stats.syncs += 1;

        let rate = state.fault_config.sync_error_rate;
        if state.should_inject_fault(rate) {
            return Err(StorageError::InjectedFault(
                "simulated sync error".to_string(),
            ));
        }

        state.synced_len = state.wal.len();
        Ok(())
    }

    fn read_snapshot(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.lock()?.snapshot.as_deref().map(<[u8]>::to_vec))
    }

    fn write_snapshot(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        let mut state = self.lock()?;

        let rate = state.fault_config.snapshot_error_rate;
        if state.should_inject_fault(rate) {
            return Err(StorageError::InjectedFault(
                "simulated snapshot write error".to_string(),
            ));
        }

        state.snapshot = Some(bytes.to_vec());
        state.stats.snapshots += 1;
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        state.wal.clear();
        state.synced_len = 0;
        state.snapshot = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_basic() {
        let mut storage = MemoryStorage::new(12345);
        storage.append_wal(b"abc").expect("append");
        storage.sync().expect("sync");
        assert_eq!(storage.read_wal().expect("read"), b"abc");

        storage.write_snapshot(b"snap").expect("snapshot");
        assert_eq!(
            storage.read_snapshot().expect("read"),
            Some(b"snap".to_vec())
        );
    }

    #[test]
    fn test_handles_share_bytes() {
        let mut storage = MemoryStorage::new(1);
        let mut other = storage.handle();
        storage.append_wal(b"shared").expect("append");
        assert_eq!(other.read_wal().expect("read"), b"shared");
    }

    #[test]
    fn test_crash_drops_unsynced_appends() {
        let mut storage = MemoryStorage::new(1);
        storage.append_wal(b"kept").expect("append");
        storage.sync().expect("sync");
        storage.append_wal(b"lost").expect("append");

        storage.crash().expect("crash");
        assert_eq!(storage.read_wal().expect("read"), b"kept");
    }

    #[test]
    fn test_fault_injection() {
        let mut storage = MemoryStorage::with_config(42, FaultConfig::failing_sync());
        storage.append_wal(b"x").expect("append");
        assert!(matches!(
            storage.sync(),
            Err(StorageError::InjectedFault(_))
        ));
        let stats = storage.stats().expect("stats");
        assert_eq!(stats.syncs, 1);
        assert_eq!(stats.injected_faults, 1);
    }

    #[test]
    fn test_fault_injection_deterministic() {
        let run = |seed| {
            let mut storage = MemoryStorage::with_config(
                seed,
                FaultConfig {
                    append_error_rate: 0.3,
                    ..FaultConfig::default()
                },
            );
            (0..50)
                .map(|_| storage.append_wal(b"r").is_ok())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn test_destroy_clears_everything() {
        let mut storage = MemoryStorage::new(1);
        storage.append_wal(b"x").expect("append");
        storage.write_snapshot(b"y").expect("snapshot");
        storage.destroy().expect("destroy");
        assert!(storage.read_wal().expect("read").is_empty());
        assert_eq!(storage.read_snapshot().expect("read"), None);
    }
}
