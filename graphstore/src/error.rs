//! Errors surfaced by the store.

use crate::storage::io::StorageError;
use crate::storage::key_range::KeyRangeError;
use crate::storage::recovery::RecoveryError;
use crate::storage::wal::WalError;
use crate::types::InternKind;

/// Errors that can occur during store operations.
#[derive(Debug)]
pub enum StoreError {
    /// No dataset with this name exists.
    DatasetNotFound(String),
    /// Dataset names must be non-empty.
    InvalidDatasetName,
    /// Prefix lookups need a non-empty prefix.
    EmptyPrefix,
    /// The store was closed.
    Closed,
    /// A statement refers to an interned entry that does not list the
    /// statement's dataset in its reference set.
    UnreferencedValue { kind: InternKind, id: u64 },
    /// No interned entry with this id exists.
    UnknownId { kind: InternKind, id: u64 },
    /// The entry is still used by a statement of the dataset giving up its
    /// reference.
    InUse { kind: InternKind, id: u64 },
    /// Stored data violates an invariant of the store.
    Corrupt(String),
    /// Storage error.
    Storage(StorageError),
    /// A WAL record could not be encoded.
    Wal(WalError),
    /// A lock guarding store state was poisoned.
    LockPoisoned,
}

impl StoreError {
    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DatasetNotFound(name) => write!(f, "dataset not found: {name}"),
            Self::InvalidDatasetName => write!(f, "dataset name must not be empty"),
            Self::EmptyPrefix => write!(f, "prefix must not be empty"),
            Self::Closed => write!(f, "store is closed"),
            Self::UnreferencedValue { kind, id } => write!(
                f,
                "{} #{id} is not referenced by the statement's dataset",
                kind.name()
            ),
            Self::UnknownId { kind, id } => write!(f, "unknown {} id #{id}", kind.name()),
            Self::InUse { kind, id } => {
                write!(f, "{} #{id} is still used by a statement", kind.name())
            }
            Self::Corrupt(msg) => write!(f, "corrupt store: {msg}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Wal(e) => write!(f, "WAL error: {e}"),
            Self::LockPoisoned => write!(f, "store lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Wal(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for StoreError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::LockPoisoned => Self::LockPoisoned,
            StorageError::Closed => Self::Closed,
            StorageError::Wal(e) => Self::Wal(e),
            other => Self::Storage(other),
        }
    }
}

impl From<KeyRangeError> for StoreError {
    fn from(e: KeyRangeError) -> Self {
        match e {
            KeyRangeError::EmptyPrefix => Self::EmptyPrefix,
        }
    }
}

impl From<RecoveryError> for StoreError {
    fn from(e: RecoveryError) -> Self {
        match e {
            RecoveryError::Storage(e) => e.into(),
            RecoveryError::Checkpoint(e) => Self::Corrupt(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        assert_eq!(
            StoreError::DatasetNotFound("people".to_string()).to_string(),
            "dataset not found: people"
        );
        assert_eq!(
            StoreError::UnknownId {
                kind: InternKind::String,
                id: 4
            }
            .to_string(),
            "unknown string-values id #4"
        );
    }

    #[test]
    fn test_storage_error_conversion() {
        assert!(matches!(
            StoreError::from(StorageError::LockPoisoned),
            StoreError::LockPoisoned
        ));
        assert!(matches!(
            StoreError::from(StorageError::InjectedFault("x".to_string())),
            StoreError::Storage(StorageError::InjectedFault(_))
        ));
        assert!(matches!(
            StoreError::from(StorageError::Closed),
            StoreError::Closed
        ));
        assert!(matches!(
            StoreError::from(StorageError::Wal(WalError::RecordTooLarge(1 << 33))),
            StoreError::Wal(WalError::RecordTooLarge(_))
        ));
        assert!(matches!(
            StoreError::from(KeyRangeError::EmptyPrefix),
            StoreError::EmptyPrefix
        ));
    }
}
