//! Dataset registry: name to id mapping.
//!
//! The `Datasets` table maps the UTF-8 bytes of a dataset name to its id.
//! Byte order of UTF-8 equals code point order, so table order is name order
//! and prefix/range lookups are plain ordered scans.
//!
//! # Invariants
//!
//! - Names are non-empty and unique (they are the table key)
//! - Ids come from the persisted `Dataset` counter and are never reused

use crate::error::StoreError;
use crate::storage::allocator::{IdCounter, allocate};
use crate::storage::engine::{KvRead, Table, WriteBatch};
use crate::storage::key_range::{KeyRange, name_prefix_range, name_range};
use crate::types::{Dataset, DatasetId};

fn decode_entry(key: &[u8], value: &[u8]) -> Result<Dataset, StoreError> {
    let name = std::str::from_utf8(key)
        .map_err(|_| StoreError::corrupt("dataset name is not UTF-8"))?
        .to_string();
    let id = DatasetId::from_key_bytes(value)
        .filter(|_| value.len() == 8)
        .ok_or_else(|| StoreError::corrupt(format!("malformed id for dataset {name}")))?;
    Ok(Dataset { id, name })
}

fn collect_range<R: KvRead + ?Sized>(reader: &R, range: &KeyRange) -> Result<Vec<Dataset>, StoreError> {
    reader
        .scan(Table::Datasets, range)
        .map(|(key, value)| decode_entry(key, value))
        .collect()
}

/// Look up the dataset called `name`.
pub fn resolve<R: KvRead + ?Sized>(reader: &R, name: &str) -> Result<Option<Dataset>, StoreError> {
    reader
        .get(Table::Datasets, name.as_bytes())
        .map(|value| decode_entry(name.as_bytes(), value))
        .transpose()
}

/// Whether a dataset called `name` exists.
pub fn exists<R: KvRead + ?Sized>(reader: &R, name: &str) -> bool {
    reader.contains(Table::Datasets, name.as_bytes())
}

/// Create the dataset `name`, or return the existing one.
///
/// Returns the dataset and whether it was created by this call.
///
/// # Errors
///
/// `StoreError::InvalidDatasetName` if `name` is empty.
pub fn create(batch: &mut WriteBatch, name: &str) -> Result<(Dataset, bool), StoreError> {
    if name.is_empty() {
        return Err(StoreError::InvalidDatasetName);
    }
    if let Some(existing) = resolve(&*batch, name)? {
        return Ok((existing, false));
    }
    let id = DatasetId(allocate(batch, IdCounter::Dataset)?);
    batch.put(
        Table::Datasets,
        name.as_bytes().to_vec(),
        id.to_key_bytes().to_vec(),
    );
    Ok((
        Dataset {
            id,
            name: name.to_string(),
        },
        true,
    ))
}

/// Remove the registry entry of `name`.
pub fn remove(batch: &mut WriteBatch, name: &str) {
    batch.delete(Table::Datasets, name.as_bytes().to_vec());
}

/// Every dataset, in name order.
pub fn all<R: KvRead + ?Sized>(reader: &R) -> Result<Vec<Dataset>, StoreError> {
    collect_range(reader, &KeyRange::all())
}

/// Every dataset whose name starts with `prefix`, in name order.
///
/// # Errors
///
/// `StoreError::EmptyPrefix` if `prefix` is empty.
pub fn match_prefix<R: KvRead + ?Sized>(reader: &R, prefix: &str) -> Result<Vec<Dataset>, StoreError> {
    collect_range(reader, &name_prefix_range(prefix)?)
}

/// Every dataset whose name lies in `[start, end)`, in name order.
pub fn match_range<R: KvRead + ?Sized>(
    reader: &R,
    start: &str,
    end: &str,
) -> Result<Vec<Dataset>, StoreError> {
    collect_range(reader, &name_range(start, end))
}
