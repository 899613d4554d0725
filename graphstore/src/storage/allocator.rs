//! Identifier allocation from persisted counters.
//!
//! Each counter lives in the `Meta` table as `name -> next id (u64 BE)`.
//! Allocation reads and bumps the counter inside the caller's write batch,
//! so an id handed to an aborted transaction is simply never committed and
//! a committed id is never handed out again, not even after reopen.

use crate::error::StoreError;
use crate::storage::engine::{KvRead, Table, WriteBatch};
use crate::types::InternKind;

/// First id handed out by every counter.
pub const FIRST_ID: u64 = 1;

/// A persisted id counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdCounter {
    Dataset,
    Interned(InternKind),
}

impl IdCounter {
    /// Key of this counter in the `Meta` table.
    #[must_use]
    pub const fn key(self) -> &'static [u8] {
        match self {
            Self::Dataset => b"next_dataset_id",
            Self::Interned(InternKind::Entity) => b"next_entity_id",
            Self::Interned(InternKind::Attribute) => b"next_attribute_id",
            Self::Interned(InternKind::String) => b"next_string_id",
            Self::Interned(InternKind::Bytes) => b"next_bytes_id",
        }
    }
}

/// The id the next `allocate` will return.
pub fn peek<R: KvRead + ?Sized>(reader: &R, counter: IdCounter) -> Result<u64, StoreError> {
    match reader.get(Table::Meta, counter.key()) {
        None => Ok(FIRST_ID),
        Some(bytes) => bytes
            .try_into()
            .map(u64::from_be_bytes)
            .map_err(|_| StoreError::corrupt(format!("malformed counter {counter:?}"))),
    }
}

/// Take the next id from `counter`.
pub fn allocate(batch: &mut WriteBatch, counter: IdCounter) -> Result<u64, StoreError> {
    let id = peek(&*batch, counter)?;
    let next = id
        .checked_add(1)
        .ok_or_else(|| StoreError::corrupt(format!("counter {counter:?} exhausted")))?;
    batch.put(Table::Meta, counter.key().to_vec(), next.to_be_bytes().to_vec());
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::engine::Snapshot;
    use std::sync::Arc;

    #[test]
    fn test_allocate_is_monotonic_per_counter() {
        let mut batch = WriteBatch::new(Arc::new(Snapshot::new()));
        assert_eq!(allocate(&mut batch, IdCounter::Dataset).expect("alloc"), 1);
        assert_eq!(allocate(&mut batch, IdCounter::Dataset).expect("alloc"), 2);
        let entity = IdCounter::Interned(InternKind::Entity);
        assert_eq!(allocate(&mut batch, entity).expect("alloc"), 1);
        assert_eq!(peek(&batch, IdCounter::Dataset).expect("peek"), 3);
    }

    #[test]
    fn test_counter_survives_in_snapshot() {
        let mut batch = WriteBatch::new(Arc::new(Snapshot::new()));
        allocate(&mut batch, IdCounter::Dataset).expect("alloc");
        let (base, pending) = batch.into_parts();
        let mut next = (*base).clone();
        next.apply(pending);

        let mut batch = WriteBatch::new(Arc::new(next));
        assert_eq!(allocate(&mut batch, IdCounter::Dataset).expect("alloc"), 2);
    }

    #[test]
    fn test_malformed_counter_is_corrupt() {
        let mut snapshot = Snapshot::new();
        snapshot.put(Table::Meta, IdCounter::Dataset.key().to_vec(), vec![1, 2]);
        assert!(matches!(
            peek(&snapshot, IdCounter::Dataset),
            Err(StoreError::Corrupt(_))
        ));
    }
}
