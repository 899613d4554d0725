//! Write-Ahead Log (WAL) records.
//!
//! Every committed write transaction is appended to the log as a `Begin`
//! record, one `Put` or `Delete` record per mutated key, and a `Commit`
//! record. Recovery only replays transactions whose `Commit` made it to disk.
//!
//! # Log Record Format
//!
//! Each record has the following layout:
//! ```text
//! +----------+--------------------------------------------------+
//! | 0-3      | record_length (4 bytes, includes header+payload) |
//! | 4        | record_type (1 byte)                             |
//! | 5-12     | transaction_id (8 bytes)                         |
//! | 13-20    | lsn (8 bytes) - Log Sequence Number              |
//! | 21-N     | payload (variable, depends on type)              |
//! | N-N+3    | CRC32 checksum (4 bytes)                         |
//! +----------+--------------------------------------------------+
//! ```
//!
//! `Put` payloads are `table (1) | key_len (4) | key | value`, `Delete`
//! payloads are `table (1) | key`. All integers are little-endian.

use crate::storage::engine::Table;

/// Log record header size (before payload).
/// `record_length` (4) + `record_type` (1) + `txn_id` (8) + lsn (8) = 21 bytes
const RECORD_HEADER_SIZE: usize = 21;

/// CRC32 checksum size at end of record.
const CHECKSUM_SIZE: usize = 4;

/// Transaction ID.
pub type TxnId = u64;

/// Log Sequence Number - monotonically increasing identifier for log records.
pub type Lsn = u64;

/// Log record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// Transaction begin marker.
    Begin = 0x01,
    /// Key written.
    Put = 0x02,
    /// Key removed.
    Delete = 0x03,
    /// Transaction commit marker.
    Commit = 0x04,
}

impl TryFrom<u8> for LogRecordType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Begin),
            0x02 => Ok(Self::Put),
            0x03 => Ok(Self::Delete),
            0x04 => Ok(Self::Commit),
            _ => Err(value),
        }
    }
}

/// Payload for different log record types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecordPayload {
    /// Begin transaction - no additional data.
    Begin,
    /// Write `value` under `key` in `table`.
    Put {
        table: Table,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// Remove `key` from `table`.
    Delete { table: Table, key: Vec<u8> },
    /// Commit transaction - no additional data.
    Commit,
}

impl LogRecordPayload {
    /// Get the record type for this payload.
    #[must_use]
    pub const fn record_type(&self) -> LogRecordType {
        match self {
            Self::Begin => LogRecordType::Begin,
            Self::Put { .. } => LogRecordType::Put,
            Self::Delete { .. } => LogRecordType::Delete,
            Self::Commit => LogRecordType::Commit,
        }
    }

    /// Encoded payload length.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        match self {
            Self::Begin | Self::Commit => 0,
            Self::Put { key, value, .. } => 1 + 4 + key.len() + value.len(),
            Self::Delete { key, .. } => 1 + key.len(),
        }
    }

    /// Append the serialized payload to `bytes`.
    fn write_to(&self, bytes: &mut Vec<u8>) -> Result<(), WalError> {
        match self {
            Self::Begin | Self::Commit => {}
            Self::Put { table, key, value } => {
                let key_len = length_field(key.len())?;
                bytes.push(*table as u8);
                bytes.extend_from_slice(&key_len);
                bytes.extend_from_slice(key);
                bytes.extend_from_slice(value);
            }
            Self::Delete { table, key } => {
                bytes.push(*table as u8);
                bytes.extend_from_slice(key);
            }
        }
        Ok(())
    }

    /// Deserialize a payload from bytes.
    pub fn from_bytes(record_type: LogRecordType, bytes: &[u8]) -> Result<Self, WalError> {
        match record_type {
            LogRecordType::Begin => Ok(Self::Begin),
            LogRecordType::Commit => Ok(Self::Commit),
            LogRecordType::Put => {
                let (&table, rest) = bytes.split_first().ok_or(WalError::CorruptRecord)?;
                let key_len = le_u32(rest, 0).ok_or(WalError::CorruptRecord)? as usize;
                let (key, value) = rest
                    .get(4..)
                    .filter(|tail| tail.len() >= key_len)
                    .map(|tail| tail.split_at(key_len))
                    .ok_or(WalError::CorruptRecord)?;
                Ok(Self::Put {
                    table: Table::try_from(table).map_err(WalError::InvalidTable)?,
                    key: key.to_vec(),
                    value: value.to_vec(),
                })
            }
            LogRecordType::Delete => {
                let (&table, key) = bytes.split_first().ok_or(WalError::CorruptRecord)?;
                Ok(Self::Delete {
                    table: Table::try_from(table).map_err(WalError::InvalidTable)?,
                    key: key.to_vec(),
                })
            }
        }
    }
}

/// A complete log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Transaction ID that wrote this record.
    pub txn_id: TxnId,
    /// Log Sequence Number (position in the log).
    pub lsn: Lsn,
    /// The record payload.
    pub payload: LogRecordPayload,
}

impl LogRecord {
    /// Create a new log record.
    #[must_use]
    pub const fn new(txn_id: TxnId, lsn: Lsn, payload: LogRecordPayload) -> Self {
        Self {
            txn_id,
            lsn,
            payload,
        }
    }

    /// Calculate the total serialized size of this record.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.serialized_size() + CHECKSUM_SIZE
    }

    /// Append the serialized record to `bytes`.
    ///
    /// Fails with `WalError::RecordTooLarge`, leaving `bytes` untouched, when
    /// the record length does not fit the 4-byte length field.
    pub fn write_to(&self, bytes: &mut Vec<u8>) -> Result<(), WalError> {
        let start = bytes.len();
        let total_len = length_field(self.serialized_size())?;

        bytes.extend_from_slice(&total_len);
        bytes.push(self.payload.record_type() as u8);
        bytes.extend_from_slice(&self.txn_id.to_le_bytes());
        bytes.extend_from_slice(&self.lsn.to_le_bytes());
        self.payload.write_to(bytes)?;

        let checksum = crc32fast::hash(&bytes[start..]);
        bytes.extend_from_slice(&checksum.to_le_bytes());
        Ok(())
    }

    /// Serialize this record to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WalError> {
        let mut bytes = Vec::with_capacity(self.serialized_size());
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    /// Decode the record at the start of `bytes`.
    ///
    /// Returns the record and its encoded length, so that callers can step
    /// through a log buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), WalError> {
        let record_len = le_u32(bytes, 0).ok_or(WalError::Truncated)? as usize;
        if record_len < RECORD_HEADER_SIZE + CHECKSUM_SIZE {
            return Err(WalError::CorruptRecord);
        }
        let record = bytes.get(..record_len).ok_or(WalError::Truncated)?;
        let (body, trailer) = record.split_at(record_len - CHECKSUM_SIZE);

        let expected = le_u32(trailer, 0).ok_or(WalError::Truncated)?;
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(WalError::ChecksumMismatch { expected, actual });
        }

        let record_type = LogRecordType::try_from(body[4]).map_err(WalError::InvalidRecordType)?;
        let txn_id = le_u64(body, 5).ok_or(WalError::CorruptRecord)?;
        let lsn = le_u64(body, 13).ok_or(WalError::CorruptRecord)?;
        let payload = LogRecordPayload::from_bytes(record_type, &body[RECORD_HEADER_SIZE..])?;

        Ok((Self::new(txn_id, lsn, payload), record_len))
    }
}

/// Encode `len` as a little-endian 4-byte length field.
fn length_field(len: usize) -> Result<[u8; 4], WalError> {
    u32::try_from(len)
        .map(u32::to_le_bytes)
        .map_err(|_| WalError::RecordTooLarge(len))
}

fn le_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes.get(at..at + 4)?.try_into().ok().map(u32::from_le_bytes)
}

fn le_u64(bytes: &[u8], at: usize) -> Option<u64> {
    bytes.get(at..at + 8)?.try_into().ok().map(u64::from_le_bytes)
}

/// Errors from decoding log records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalError {
    /// The log ends in the middle of a record.
    Truncated,
    /// The record is malformed.
    CorruptRecord,
    /// Stored and computed checksums differ.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Unknown record type byte.
    InvalidRecordType(u8),
    /// Unknown table byte.
    InvalidTable(u8),
    /// A record of this many bytes does not fit the length field.
    RecordTooLarge(usize),
}

impl std::fmt::Display for WalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated log record"),
            Self::CorruptRecord => write!(f, "corrupt log record"),
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
            ),
            Self::InvalidRecordType(t) => write!(f, "invalid record type: {t:#04x}"),
            Self::InvalidTable(t) => write!(f, "invalid table: {t:#04x}"),
            Self::RecordTooLarge(len) => write!(f, "log record too large: {len} bytes"),
        }
    }
}

impl std::error::Error for WalError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(key: &[u8], value: &[u8]) -> LogRecordPayload {
        LogRecordPayload::Put {
            table: Table::Datasets,
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    #[test]
    fn test_put_record_layout() {
        let record = LogRecord::new(7, 3, put(b"abc", b"xy"));
        let bytes = record.to_bytes().expect("encode");
        assert_eq!(bytes.len(), record.serialized_size());
        assert_eq!(bytes.len(), RECORD_HEADER_SIZE + 1 + 4 + 3 + 2 + CHECKSUM_SIZE);
        assert_eq!(bytes[4], LogRecordType::Put as u8);

        let (decoded, consumed) = LogRecord::from_bytes(&bytes).expect("decode");
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_put_with_empty_value() {
        let record = LogRecord::new(1, 1, put(b"key", b""));
        let bytes = record.to_bytes().expect("encode");
        let (decoded, _) = LogRecord::from_bytes(&bytes).expect("decode");
        assert_eq!(decoded.payload, put(b"key", b""));
    }

    #[test]
    fn test_consecutive_records_decode_in_order() {
        let mut bytes = Vec::new();
        LogRecord::new(1, 1, LogRecordPayload::Begin).write_to(&mut bytes).expect("encode");
        LogRecord::new(
            1,
            2,
            LogRecordPayload::Delete {
                table: Table::Statements,
                key: vec![1, 2, 3],
            },
        )
        .write_to(&mut bytes)
        .expect("encode");
        LogRecord::new(1, 3, LogRecordPayload::Commit).write_to(&mut bytes).expect("encode");

        let mut offset = 0;
        let mut lsns = Vec::new();
        while offset < bytes.len() {
            let (record, consumed) = LogRecord::from_bytes(&bytes[offset..]).expect("decode");
            lsns.push(record.lsn);
            offset += consumed;
        }
        assert_eq!(lsns, vec![1, 2, 3]);
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let mut bytes = LogRecord::new(1, 1, put(b"k", b"v")).to_bytes().expect("encode");
        bytes[RECORD_HEADER_SIZE + 2] ^= 0xFF;
        assert!(matches!(
            LogRecord::from_bytes(&bytes),
            Err(WalError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_record_detected() {
        let bytes = LogRecord::new(1, 1, put(b"key", b"value")).to_bytes().expect("encode");
        assert_eq!(
            LogRecord::from_bytes(&bytes[..bytes.len() - 2]),
            Err(WalError::Truncated)
        );
        assert_eq!(LogRecord::from_bytes(&bytes[..5]), Err(WalError::Truncated));
    }

    #[test]
    fn test_length_field_rejects_oversized_records() {
        assert_eq!(length_field(5), Ok(5u32.to_le_bytes()));
        assert_eq!(length_field(u32::MAX as usize), Ok(u32::MAX.to_le_bytes()));
        let too_large = u32::MAX as usize + 1;
        assert_eq!(
            length_field(too_large),
            Err(WalError::RecordTooLarge(too_large))
        );
    }
}
