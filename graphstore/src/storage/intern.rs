//! Reference-counted interning tables.
//!
//! An interning table maps a semantic value to a stable numeric id and
//! records which datasets depend on each entry. It is backed by four engine
//! tables:
//!
//! ```text
//! values:      value bytes            -> id
//! ids:         id                     -> value bytes
//! refs:        id . dataset id        -> (empty)
//! by_dataset:  dataset id . id        -> (empty)
//! ```
//!
//! `refs` is the reference set of an entry; `by_dataset` is the same relation
//! keyed the other way round so that dataset deletion can find every entry a
//! dataset touched without scanning the whole table.
//!
//! # Invariants
//!
//! - `values` and `ids` are inverse bijections
//! - Every entry has a non-empty reference set; the transaction removing the
//!   last reference also removes the entry
//! - `refs` and `by_dataset` hold exactly the same pairs
//! - Ids are allocated from a persisted counter and never reused

use std::marker::PhantomData;

use crate::error::StoreError;
use crate::storage::allocator::{IdCounter, allocate};
use crate::storage::engine::{KvRead, Table, WriteBatch};
use crate::storage::key_range::KeyRange;
use crate::types::{AttributeId, BytesId, DatasetId, EntityId, InternKind, StringId};

/// An identifier type owned by one interning table.
pub trait InternId: Copy + Eq + Ord + std::hash::Hash + std::fmt::Debug {
    /// The table this id belongs to.
    const KIND: InternKind;

    /// Wrap a raw id.
    fn from_raw(raw: u64) -> Self;

    /// The raw id.
    fn raw(self) -> u64;

    /// Encode as big-endian bytes for use inside keys.
    fn key_bytes(self) -> [u8; 8] {
        self.raw().to_be_bytes()
    }
}

macro_rules! intern_id {
    ($name:ident, $kind:expr) => {
        impl InternId for $name {
            const KIND: InternKind = $kind;

            fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

intern_id!(EntityId, InternKind::Entity);
intern_id!(AttributeId, InternKind::Attribute);
intern_id!(StringId, InternKind::String);
intern_id!(BytesId, InternKind::Bytes);

/// Entity names and entity references.
pub const ENTITIES: InterningTable<EntityId> = InterningTable::new();

/// Attribute names and identifier values.
pub const ATTRIBUTES: InterningTable<AttributeId> = InterningTable::new();

/// String values.
pub const STRINGS: InterningTable<StringId> = InterningTable::new();

/// Byte-sequence values.
pub const BYTES: InterningTable<BytesId> = InterningTable::new();

/// One interning table. Stateless: all data lives in the engine tables, so
/// the same handle works over any snapshot or write batch.
#[derive(Debug, Clone, Copy)]
pub struct InterningTable<I> {
    values: Table,
    ids: Table,
    refs: Table,
    by_dataset: Table,
    _id: PhantomData<I>,
}

impl<I: InternId> Default for InterningTable<I> {
    fn default() -> Self {
        Self::new()
    }
}

fn pair_key(first: [u8; 8], second: [u8; 8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&first);
    key.extend_from_slice(&second);
    key
}

impl<I: InternId> InterningTable<I> {
    /// Handle onto the tables of `I::KIND`.
    #[must_use]
    pub const fn new() -> Self {
        let (values, ids, refs, by_dataset) = Table::interning(I::KIND);
        Self {
            values,
            ids,
            refs,
            by_dataset,
            _id: PhantomData,
        }
    }

    /// Which table this is.
    #[must_use]
    pub const fn kind(&self) -> InternKind {
        I::KIND
    }

    /// The backing `(values, ids, refs, by_dataset)` tables.
    #[must_use]
    pub const fn tables(&self) -> (Table, Table, Table, Table) {
        (self.values, self.ids, self.refs, self.by_dataset)
    }

    fn decode_id(&self, bytes: &[u8]) -> Result<I, StoreError> {
        bytes
            .try_into()
            .map(|raw| I::from_raw(u64::from_be_bytes(raw)))
            .map_err(|_| StoreError::corrupt(format!("malformed id in {}", I::KIND.name())))
    }

    /// Intern `value` on behalf of `dataset`.
    ///
    /// Creates the entry with reference set `{dataset}` if the value is new,
    /// otherwise adds `dataset` to the existing reference set. Idempotent.
    pub fn intern_for(
        &self,
        batch: &mut WriteBatch,
        value: &[u8],
        dataset: DatasetId,
    ) -> Result<I, StoreError> {
        let id = match self.lookup_by_value(&*batch, value)? {
            Some(id) if self.is_referenced_by(&*batch, id, dataset) => return Ok(id),
            Some(id) => id,
            None => {
                let id = I::from_raw(allocate(batch, IdCounter::Interned(I::KIND))?);
                batch.put(self.values, value.to_vec(), id.key_bytes().to_vec());
                batch.put(self.ids, id.key_bytes().to_vec(), value.to_vec());
                id
            }
        };
        let dataset_key = dataset.to_key_bytes();
        batch.put(self.refs, pair_key(id.key_bytes(), dataset_key), Vec::new());
        batch.put(self.by_dataset, pair_key(dataset_key, id.key_bytes()), Vec::new());
        Ok(id)
    }

    /// The value interned under `id`.
    pub fn lookup<'r, R: KvRead + ?Sized>(&self, reader: &'r R, id: I) -> Option<&'r [u8]> {
        reader.get(self.ids, &id.key_bytes())
    }

    /// The id of `value`, if interned.
    pub fn lookup_by_value<R: KvRead + ?Sized>(
        &self,
        reader: &R,
        value: &[u8],
    ) -> Result<Option<I>, StoreError> {
        reader
            .get(self.values, value)
            .map(|bytes| self.decode_id(bytes))
            .transpose()
    }

    /// Whether `dataset` is in the reference set of `id`.
    pub fn is_referenced_by<R: KvRead + ?Sized>(&self, reader: &R, id: I, dataset: DatasetId) -> bool {
        reader.contains(self.refs, &pair_key(id.key_bytes(), dataset.to_key_bytes()))
    }

    /// The reference set of `id`, ascending.
    pub fn references<R: KvRead + ?Sized>(
        &self,
        reader: &R,
        id: I,
    ) -> Result<Vec<DatasetId>, StoreError> {
        reader
            .scan(self.refs, &KeyRange::prefix(&id.key_bytes()))
            .map(|(key, _)| {
                DatasetId::from_key_bytes(&key[8..]).ok_or_else(|| {
                    StoreError::corrupt(format!("malformed reference in {}", I::KIND.name()))
                })
            })
            .collect()
    }

    /// Every id `dataset` holds a reference to, ascending.
    pub fn ids_for_dataset<R: KvRead + ?Sized>(
        &self,
        reader: &R,
        dataset: DatasetId,
    ) -> Result<Vec<I>, StoreError> {
        reader
            .scan(self.by_dataset, &KeyRange::prefix(&dataset.to_key_bytes()))
            .map(|(key, _)| self.decode_id(&key[8..]))
            .collect()
    }

    /// Remove `dataset` from the reference set of `id`, evicting the entry
    /// when no reference is left.
    ///
    /// Returns whether the entry was evicted. Dereferencing on behalf of a
    /// dataset that holds no reference is a no-op.
    ///
    /// # Errors
    ///
    /// `StoreError::UnknownId` if no entry has this id.
    pub fn dereference(
        &self,
        batch: &mut WriteBatch,
        id: I,
        dataset: DatasetId,
    ) -> Result<bool, StoreError> {
        let Some(value) = self.lookup(&*batch, id).map(<[u8]>::to_vec) else {
            return Err(StoreError::UnknownId {
                kind: I::KIND,
                id: id.raw(),
            });
        };

        let dataset_key = dataset.to_key_bytes();
        batch.delete(self.refs, pair_key(id.key_bytes(), dataset_key));
        batch.delete(self.by_dataset, pair_key(dataset_key, id.key_bytes()));

        let still_referenced = batch
            .scan(self.refs, &KeyRange::prefix(&id.key_bytes()))
            .next()
            .is_some();
        if still_referenced {
            return Ok(false);
        }

        batch.delete(self.ids, id.key_bytes().to_vec());
        batch.delete(self.values, value);
        Ok(true)
    }

    /// Number of live entries.
    pub fn len<R: KvRead + ?Sized>(&self, reader: &R) -> usize {
        reader.scan(self.ids, &KeyRange::all()).count()
    }
}
