//! Dataset-scoped statement table.
//!
//! Statements are stored entirely in the key, so the value is empty:
//!
//! ```text
//! +----------+-----------------------------------------+
//! | 0-7      | dataset id (8 bytes, big-endian)        |
//! | 8-15     | entity id (8 bytes, big-endian)         |
//! | 16-23    | attribute id (8 bytes, big-endian)      |
//! | 24-N     | encoded value ref (2 or 9 bytes)        |
//! +----------+-----------------------------------------+
//! ```
//!
//! Keys of one dataset are contiguous, and within a dataset statements sort
//! by entity, then attribute, then value. A scan binds the longest key
//! prefix the pattern allows and filters the remaining fields.

use crate::error::StoreError;
use crate::storage::engine::{KvRead, RangeIter, Table, WriteBatch};
use crate::storage::key_range::KeyRange;
use crate::types::ids::ID_SIZE;
use crate::types::{AttributeId, DatasetId, EntityId, Statement, StatementPattern, ValueRef};

/// Encode the key of `statement` inside `dataset`.
#[must_use]
pub fn statement_key(dataset: DatasetId, statement: &Statement) -> Vec<u8> {
    let mut key = Vec::with_capacity(3 * ID_SIZE + statement.value.encoded_size());
    key.extend_from_slice(&dataset.to_key_bytes());
    key.extend_from_slice(&statement.entity.to_key_bytes());
    key.extend_from_slice(&statement.attribute.to_key_bytes());
    statement.value.encode_into(&mut key);
    key
}

/// Decode a statement key.
pub fn decode_statement_key(key: &[u8]) -> Result<(DatasetId, Statement), StoreError> {
    let malformed = || StoreError::corrupt("malformed statement key");
    let dataset = DatasetId::from_key_bytes(key).ok_or_else(malformed)?;
    let entity = key
        .get(ID_SIZE..)
        .and_then(EntityId::from_key_bytes)
        .ok_or_else(malformed)?;
    let attribute = key
        .get(2 * ID_SIZE..)
        .and_then(AttributeId::from_key_bytes)
        .ok_or_else(malformed)?;
    let value_bytes = key.get(3 * ID_SIZE..).ok_or_else(malformed)?;
    let (value, consumed) = ValueRef::from_bytes(value_bytes).ok_or_else(malformed)?;
    if consumed != value_bytes.len() {
        return Err(malformed());
    }
    Ok((dataset, Statement::new(entity, attribute, value)))
}

/// The longest key prefix bound by `pattern` within `dataset`.
fn scan_prefix(dataset: DatasetId, pattern: &StatementPattern) -> Vec<u8> {
    let mut prefix = dataset.to_key_bytes().to_vec();
    let Some(entity) = pattern.entity else {
        return prefix;
    };
    prefix.extend_from_slice(&entity.to_key_bytes());
    let Some(attribute) = pattern.attribute else {
        return prefix;
    };
    prefix.extend_from_slice(&attribute.to_key_bytes());
    if let Some(value) = pattern.value {
        value.encode_into(&mut prefix);
    }
    prefix
}

/// Store `statement` in `dataset`. Returns whether it was new.
pub fn insert(batch: &mut WriteBatch, dataset: DatasetId, statement: &Statement) -> bool {
    let key = statement_key(dataset, statement);
    if batch.contains(Table::Statements, &key) {
        return false;
    }
    batch.put(Table::Statements, key, Vec::new());
    true
}

/// Remove `statement` from `dataset`. Returns whether it was present.
pub fn remove(batch: &mut WriteBatch, dataset: DatasetId, statement: &Statement) -> bool {
    let key = statement_key(dataset, statement);
    if !batch.contains(Table::Statements, &key) {
        return false;
    }
    batch.delete(Table::Statements, key);
    true
}

/// Whether `dataset` contains `statement`.
pub fn contains<R: KvRead + ?Sized>(reader: &R, dataset: DatasetId, statement: &Statement) -> bool {
    reader.contains(Table::Statements, &statement_key(dataset, statement))
}

/// Lazily scan the statements of `dataset` matching `pattern`, in key order.
///
/// The scan reads the snapshot or batch it was started on; calling `scan`
/// again starts over from the beginning.
pub fn scan<'r, R: KvRead + ?Sized>(
    reader: &'r R,
    dataset: DatasetId,
    pattern: StatementPattern,
) -> StatementScan<'r> {
    let range = KeyRange::prefix(&scan_prefix(dataset, &pattern));
    StatementScan {
        inner: reader.scan(Table::Statements, &range),
        pattern,
    }
}

/// Remove every statement of `dataset`, returning the removed statements.
pub fn remove_all_for_dataset(
    batch: &mut WriteBatch,
    dataset: DatasetId,
) -> Result<Vec<Statement>, StoreError> {
    let range = KeyRange::prefix(&dataset.to_key_bytes());
    let mut keys = Vec::new();
    let mut removed = Vec::new();
    for (key, _) in batch.scan(Table::Statements, &range) {
        let (_, statement) = decode_statement_key(key)?;
        keys.push(key.to_vec());
        removed.push(statement);
    }
    for key in keys {
        batch.delete(Table::Statements, key);
    }
    Ok(removed)
}

/// Iterator returned by `scan`.
pub struct StatementScan<'r> {
    inner: RangeIter<'r>,
    pattern: StatementPattern,
}

impl Iterator for StatementScan<'_> {
    type Item = Result<Statement, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        for (key, _) in self.inner.by_ref() {
            match decode_statement_key(key) {
                Ok((_, statement)) if self.pattern.matches(&statement) => {
                    return Some(Ok(statement));
                }
                Ok(_) => {}
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}
