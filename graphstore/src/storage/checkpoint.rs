//! Checkpointing for fast crash recovery.
//!
//! A checkpoint serializes every table of the committed snapshot into a
//! single checksummed image, replaces the previous image atomically, then
//! resets the WAL. Recovery loads the image and replays only the WAL written
//! after it.
//!
//! # Checkpoint Triggers
//!
//! Checkpoints can be triggered by:
//! - Bytes written threshold (default: 4MB)
//! - Manual trigger via API
//! - Clean shutdown
//!
//! # Snapshot Image Format
//!
//! ```text
//! +----------+--------------------------------------------------+
//! | 0-3      | magic "GSNP"                                     |
//! | 4-7      | format version (4 bytes)                         |
//! | 8-15     | next transaction id (8 bytes)                    |
//! | 16-23    | lsn covered by the image (8 bytes)               |
//! | 24-31    | entry count (8 bytes)                            |
//! | 32-N     | entries: table (1) | key_len (4) | key |        |
//! |          |          value_len (4) | value                  |
//! | N-N+3    | CRC32 checksum (4 bytes)                         |
//! +----------+--------------------------------------------------+
//! ```
//!
//! All integers are little-endian, like the WAL.
//!
//! A crash between writing the image and resetting the WAL leaves WAL
//! records the image already contains. Replaying them is harmless: every
//! record is a whole-key put or delete.

use crate::storage::engine::{Snapshot, Table};
use crate::storage::wal::{Lsn, TxnId};

/// Default number of bytes written between checkpoints (4MB).
pub const DEFAULT_BYTES_THRESHOLD: u64 = 4 * 1024 * 1024;

const SNAPSHOT_MAGIC: &[u8; 4] = b"GSNP";
const SNAPSHOT_VERSION: u32 = 1;
const SNAPSHOT_HEADER_SIZE: usize = 32;
const CHECKSUM_SIZE: usize = 4;

/// Checkpoint configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CheckpointConfig {
    /// Number of bytes written to WAL between automatic checkpoints.
    /// Set to 0 to disable automatic checkpoints.
    pub bytes_threshold: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            bytes_threshold: DEFAULT_BYTES_THRESHOLD,
        }
    }
}

impl CheckpointConfig {
    /// Create a new checkpoint configuration.
    #[must_use]
    pub const fn new(bytes_threshold: u64) -> Self {
        Self { bytes_threshold }
    }

    /// Disable automatic checkpoints (manual only).
    #[must_use]
    pub const fn disabled() -> Self {
        Self { bytes_threshold: 0 }
    }
}

/// Tracks state needed for checkpoint decisions.
#[derive(Debug)]
pub struct CheckpointState {
    config: CheckpointConfig,

    /// LSN of the last checkpoint.
    last_checkpoint_lsn: Lsn,

    /// Number of transactions since last checkpoint.
    txns_since_checkpoint: u64,

    /// Bytes written to WAL since last checkpoint.
    bytes_since_checkpoint: u64,
}

impl CheckpointState {
    /// Create a new checkpoint state.
    ///
    /// `wal_bytes` is the size of the WAL found on open, which still counts
    /// towards the next checkpoint.
    #[must_use]
    pub const fn new(config: CheckpointConfig, last_lsn: Lsn, wal_bytes: u64) -> Self {
        Self {
            config,
            last_checkpoint_lsn: last_lsn,
            txns_since_checkpoint: 0,
            bytes_since_checkpoint: wal_bytes,
        }
    }

    /// Get the LSN of the last checkpoint.
    #[must_use]
    pub const fn last_checkpoint_lsn(&self) -> Lsn {
        self.last_checkpoint_lsn
    }

    /// Get the number of transactions since last checkpoint.
    #[must_use]
    pub const fn txns_since_checkpoint(&self) -> u64 {
        self.txns_since_checkpoint
    }

    /// Get the bytes written since last checkpoint.
    #[must_use]
    pub const fn bytes_since_checkpoint(&self) -> u64 {
        self.bytes_since_checkpoint
    }

    /// Record that a transaction of `bytes` WAL bytes was committed.
    pub const fn record_commit(&mut self, bytes: u64) {
        self.txns_since_checkpoint += 1;
        self.bytes_since_checkpoint += bytes;
    }

    /// Check if a checkpoint should be triggered based on current state.
    #[must_use]
    pub const fn should_checkpoint(&self) -> bool {
        self.config.bytes_threshold > 0
            && self.bytes_since_checkpoint >= self.config.bytes_threshold
    }

    /// Reset counters after a successful checkpoint.
    pub const fn reset(&mut self, lsn: Lsn) {
        self.last_checkpoint_lsn = lsn;
        self.txns_since_checkpoint = 0;
        self.bytes_since_checkpoint = 0;
    }
}

/// Result of a checkpoint operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointResult {
    /// LSN covered by the image.
    pub checkpoint_lsn: Lsn,

    /// Number of table entries written.
    pub entries_written: u64,

    /// Size of the image in bytes.
    pub image_bytes: usize,

    /// Transactions folded into the image since the previous checkpoint.
    pub transactions_folded: u64,
}

/// A decoded snapshot image.
#[derive(Debug)]
pub struct SnapshotImage {
    /// Every table's contents.
    pub snapshot: Snapshot,
    /// Next transaction id to hand out.
    pub next_txn_id: TxnId,
    /// Highest LSN contained in the image.
    pub lsn: Lsn,
}

/// Serialize `snapshot` into a checksummed image.
///
/// Fails with `CheckpointError::EntryTooLarge` when a key or value is longer
/// than a 4-byte length field can describe.
pub fn encode_snapshot(
    snapshot: &Snapshot,
    next_txn_id: TxnId,
    lsn: Lsn,
) -> Result<Vec<u8>, CheckpointError> {
    let entry_count: usize = Table::ALL.iter().map(|&t| snapshot.len(t)).sum();

    let mut bytes = Vec::with_capacity(SNAPSHOT_HEADER_SIZE + CHECKSUM_SIZE);
    bytes.extend_from_slice(SNAPSHOT_MAGIC);
    bytes.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&next_txn_id.to_le_bytes());
    bytes.extend_from_slice(&lsn.to_le_bytes());
    bytes.extend_from_slice(&(entry_count as u64).to_le_bytes());

    for table in Table::ALL {
        for (key, value) in snapshot.table(table) {
            bytes.push(table as u8);
            write_chunk(&mut bytes, key)?;
            write_chunk(&mut bytes, value)?;
        }
    }

    let checksum = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&checksum.to_le_bytes());
    Ok(bytes)
}

/// Deserialize an image written by `encode_snapshot`.
pub fn decode_snapshot(bytes: &[u8]) -> Result<SnapshotImage, CheckpointError> {
    if bytes.len() < SNAPSHOT_HEADER_SIZE + CHECKSUM_SIZE {
        return Err(CheckpointError::Truncated);
    }
    if &bytes[..4] != SNAPSHOT_MAGIC {
        return Err(CheckpointError::BadMagic);
    }

    let body_len = bytes.len() - CHECKSUM_SIZE;
    let stored = read_u32(bytes, body_len)?;
    let computed = crc32fast::hash(&bytes[..body_len]);
    if stored != computed {
        return Err(CheckpointError::ChecksumMismatch {
            expected: stored,
            actual: computed,
        });
    }

    let version = read_u32(bytes, 4)?;
    if version != SNAPSHOT_VERSION {
        return Err(CheckpointError::UnsupportedVersion(version));
    }
    let next_txn_id = read_u64(bytes, 8)?;
    let lsn = read_u64(bytes, 16)?;
    let entry_count = read_u64(bytes, 24)?;

    let body = &bytes[..body_len];
    let mut snapshot = Snapshot::new();
    let mut offset = SNAPSHOT_HEADER_SIZE;
    for _ in 0..entry_count {
        let table_byte = *body.get(offset).ok_or(CheckpointError::Truncated)?;
        let table = Table::try_from(table_byte).map_err(CheckpointError::InvalidTable)?;
        offset += 1;
        let key = read_chunk(body, &mut offset)?;
        let value = read_chunk(body, &mut offset)?;
        snapshot.put(table, key.to_vec(), value.to_vec());
    }
    if offset != body_len {
        return Err(CheckpointError::TrailingBytes(body_len - offset));
    }

    Ok(SnapshotImage {
        snapshot,
        next_txn_id,
        lsn,
    })
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, CheckpointError> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or(CheckpointError::Truncated)
}

fn read_u64(bytes: &[u8], offset: usize) -> Result<u64, CheckpointError> {
    bytes
        .get(offset..offset + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or(CheckpointError::Truncated)
}

fn length_field(len: usize) -> Result<[u8; 4], CheckpointError> {
    u32::try_from(len)
        .map(u32::to_le_bytes)
        .map_err(|_| CheckpointError::EntryTooLarge(len))
}

fn write_chunk(bytes: &mut Vec<u8>, chunk: &[u8]) -> Result<(), CheckpointError> {
    bytes.extend_from_slice(&length_field(chunk.len())?);
    bytes.extend_from_slice(chunk);
    Ok(())
}

fn read_chunk<'a>(bytes: &'a [u8], offset: &mut usize) -> Result<&'a [u8], CheckpointError> {
    let len = read_u32(bytes, *offset)? as usize;
    *offset += 4;
    let chunk = bytes
        .get(*offset..*offset + len)
        .ok_or(CheckpointError::Truncated)?;
    *offset += len;
    Ok(chunk)
}

/// Errors from encoding or decoding a snapshot image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    /// The image ends early.
    Truncated,
    /// The image does not start with the expected magic.
    BadMagic,
    /// The image was written by an unknown format version.
    UnsupportedVersion(u32),
    /// Stored and computed checksums differ.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Unknown table byte.
    InvalidTable(u8),
    /// Bytes left over after the declared entries.
    TrailingBytes(usize),
    /// A key or value of this many bytes does not fit the length field.
    EntryTooLarge(usize),
}

impl std::fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated snapshot image"),
            Self::BadMagic => write!(f, "not a snapshot image"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported snapshot version {v}"),
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "snapshot checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
            ),
            Self::InvalidTable(t) => write!(f, "invalid table in snapshot: {t:#04x}"),
            Self::TrailingBytes(n) => write!(f, "{n} trailing bytes after snapshot entries"),
            Self::EntryTooLarge(len) => write!(f, "snapshot entry too large: {len} bytes"),
        }
    }
}

impl std::error::Error for CheckpointError {}
