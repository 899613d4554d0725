//! Store configuration module.
//!
//! This module provides configuration loading for a `GraphStore` from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `GRAPHSTORE_DATA_DIRECTORY`: Directory holding the WAL and snapshot (default: `./data`)
//! - `GRAPHSTORE_SYNC_ON_COMMIT`: Sync the WAL before a commit returns (default: `true`)
//! - `GRAPHSTORE_CHECKPOINT_BYTES`: WAL bytes that trigger a checkpoint (default: 4 MiB, `0` disables)
//!
//! # Invariants
//!
//! - `data_directory` is always a valid path (may not exist yet)

use std::path::PathBuf;

use crate::storage::checkpoint::{CheckpointConfig, DEFAULT_BYTES_THRESHOLD};
use crate::storage::journal::JournalConfig;

const DATA_DIRECTORY_VAR: &str = "GRAPHSTORE_DATA_DIRECTORY";
const SYNC_ON_COMMIT_VAR: &str = "GRAPHSTORE_SYNC_ON_COMMIT";
const CHECKPOINT_BYTES_VAR: &str = "GRAPHSTORE_CHECKPOINT_BYTES";

/// Store configuration.
///
/// # Post-conditions
///
/// When constructed via `from_env()`, every field holds either the parsed
/// variable or its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory holding `wal.log` and `snapshot.bin`.
    pub data_directory: PathBuf,
    /// Whether a commit syncs the WAL before returning.
    pub sync_on_commit: bool,
    /// WAL bytes since the last checkpoint that trigger a new one.
    /// `None` disables automatic checkpoints.
    pub checkpoint_bytes: Option<u64>,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_directory(Self::DEFAULT_DATA_DIRECTORY)
    }
}

impl StoreConfig {
    /// Default data directory.
    pub const DEFAULT_DATA_DIRECTORY: &'static str = "./data";

    /// Default configuration rooted at `directory`.
    pub fn in_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            data_directory: directory.into(),
            sync_on_commit: true,
            checkpoint_bytes: Some(DEFAULT_BYTES_THRESHOLD),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `GRAPHSTORE_SYNC_ON_COMMIT` is set but not `true` or `false`
    /// - `GRAPHSTORE_CHECKPOINT_BYTES` is set but not a non-negative integer
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_directory = lookup(DATA_DIRECTORY_VAR)
            .map_or_else(|| PathBuf::from(Self::DEFAULT_DATA_DIRECTORY), PathBuf::from);
        let sync_on_commit = Self::load_sync_on_commit(lookup(SYNC_ON_COMMIT_VAR))?;
        let checkpoint_bytes = Self::load_checkpoint_bytes(lookup(CHECKPOINT_BYTES_VAR))?;

        Ok(Self {
            data_directory,
            sync_on_commit,
            checkpoint_bytes,
        })
    }

    fn load_sync_on_commit(value: Option<String>) -> Result<bool, ConfigError> {
        match value.as_deref() {
            None => Ok(true),
            Some("true" | "1") => Ok(true),
            Some("false" | "0") => Ok(false),
            Some(other) => Err(ConfigError::InvalidValue {
                name: SYNC_ON_COMMIT_VAR.to_string(),
                message: format!("'{other}' is not a boolean (expected true or false)"),
            }),
        }
    }

    fn load_checkpoint_bytes(value: Option<String>) -> Result<Option<u64>, ConfigError> {
        let Some(value) = value else {
            return Ok(Some(DEFAULT_BYTES_THRESHOLD));
        };
        match value.parse::<u64>() {
            Ok(0) => Ok(None),
            Ok(bytes) => Ok(Some(bytes)),
            Err(_) => Err(ConfigError::InvalidValue {
                name: CHECKPOINT_BYTES_VAR.to_string(),
                message: format!("'{value}' is not a byte count"),
            }),
        }
    }

    /// The journal settings this configuration describes.
    #[must_use]
    pub fn journal_config(&self) -> JournalConfig {
        JournalConfig {
            sync_on_commit: self.sync_on_commit,
            checkpoint: self
                .checkpoint_bytes
                .map_or_else(CheckpointConfig::disabled, CheckpointConfig::new),
        }
    }
}
