//! Ordered key-value engine.
//!
//! The engine holds a fixed set of logical tables, each an ordered map from
//! byte keys to byte values. It provides exactly the primitives the store is
//! built on:
//!
//! - **Snapshots**: an immutable view of every table. Each table sits behind
//!   its own `Arc`, so publishing a new snapshot only copies the tables a
//!   transaction touched.
//! - **Write batches**: a unit of work collecting pending puts and deletes
//!   per table over a base snapshot. Reads through a batch see the batch's own
//!   writes first.
//! - **Ordered range scans** over both, via `KvRead`.
//!
//! Durability (WAL, checkpoints) lives in `storage::journal`; this module is
//! purely in-memory.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::iter::Peekable;
use std::sync::Arc;

use crate::storage::key_range::KeyRange;
use crate::types::InternKind;

/// A committed table: ordered byte keys to byte values.
pub type TableMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// Logical tables of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Table {
    /// Persisted id counters.
    Meta = 0,
    /// Dataset name -> dataset id.
    Datasets = 1,
    /// dataset id . entity id . attribute id . value ref -> empty.
    Statements = 2,
    EntityValues = 3,
    EntityIds = 4,
    EntityRefs = 5,
    EntityByDataset = 6,
    AttributeValues = 7,
    AttributeIds = 8,
    AttributeRefs = 9,
    AttributeByDataset = 10,
    StringValues = 11,
    StringIds = 12,
    StringRefs = 13,
    StringByDataset = 14,
    BytesValues = 15,
    BytesIds = 16,
    BytesRefs = 17,
    BytesByDataset = 18,
}

impl Table {
    /// Number of tables.
    pub const COUNT: usize = 19;

    /// All tables, in discriminant order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Meta,
        Self::Datasets,
        Self::Statements,
        Self::EntityValues,
        Self::EntityIds,
        Self::EntityRefs,
        Self::EntityByDataset,
        Self::AttributeValues,
        Self::AttributeIds,
        Self::AttributeRefs,
        Self::AttributeByDataset,
        Self::StringValues,
        Self::StringIds,
        Self::StringRefs,
        Self::StringByDataset,
        Self::BytesValues,
        Self::BytesIds,
        Self::BytesRefs,
        Self::BytesByDataset,
    ];

    /// Position of this table inside a snapshot.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The four tables backing one interning table:
    /// `(values, ids, refs, by_dataset)`.
    #[must_use]
    pub const fn interning(kind: InternKind) -> (Self, Self, Self, Self) {
        match kind {
            InternKind::Entity => (
                Self::EntityValues,
                Self::EntityIds,
                Self::EntityRefs,
                Self::EntityByDataset,
            ),
            InternKind::Attribute => (
                Self::AttributeValues,
                Self::AttributeIds,
                Self::AttributeRefs,
                Self::AttributeByDataset,
            ),
            InternKind::String => (
                Self::StringValues,
                Self::StringIds,
                Self::StringRefs,
                Self::StringByDataset,
            ),
            InternKind::Bytes => (
                Self::BytesValues,
                Self::BytesIds,
                Self::BytesRefs,
                Self::BytesByDataset,
            ),
        }
    }
}

impl TryFrom<u8> for Table {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL.get(usize::from(value)).copied().ok_or(value)
    }
}

/// An ordered key-value pair borrowed from a table.
pub type Entry<'a> = (&'a [u8], &'a [u8]);

/// Boxed ordered iterator over a key range.
pub type RangeIter<'a> = Box<dyn Iterator<Item = Entry<'a>> + 'a>;

/// Read access to ordered tables.
pub trait KvRead {
    /// Point lookup.
    fn get(&self, table: Table, key: &[u8]) -> Option<&[u8]>;

    /// Ordered scan over `range`, ascending by key.
    fn scan<'a>(&'a self, table: Table, range: &KeyRange) -> RangeIter<'a>;

    /// Whether `key` is present.
    fn contains(&self, table: Table, key: &[u8]) -> bool {
        self.get(table, key).is_some()
    }
}

/// An immutable view of every table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    tables: Vec<Arc<TableMap>>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl Snapshot {
    /// Create a snapshot with every table empty.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: (0..Table::COUNT).map(|_| Arc::new(TableMap::new())).collect(),
        }
    }

    /// Borrow one table.
    #[must_use]
    pub fn table(&self, table: Table) -> &TableMap {
        &self.tables[table.index()]
    }

    /// Number of entries in one table.
    #[must_use]
    pub fn len(&self, table: Table) -> usize {
        self.table(table).len()
    }

    /// Whether every table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(|t| t.is_empty())
    }

    /// Write a key directly. Copies the table if it is shared.
    pub fn put(&mut self, table: Table, key: Vec<u8>, value: Vec<u8>) {
        Arc::make_mut(&mut self.tables[table.index()]).insert(key, value);
    }

    /// Remove a key directly. Copies the table if it is shared.
    pub fn delete(&mut self, table: Table, key: &[u8]) {
        let map = &mut self.tables[table.index()];
        if map.contains_key(key) {
            Arc::make_mut(map).remove(key);
        }
    }

    /// Apply a set of pending mutations.
    pub fn apply(&mut self, pending: PendingWrites) {
        for (table, writes) in pending.tables {
            if writes.is_empty() {
                continue;
            }
            let map = Arc::make_mut(&mut self.tables[table.index()]);
            for (key, value) in writes {
                match value {
                    Some(value) => {
                        map.insert(key, value);
                    }
                    None => {
                        map.remove(&key);
                    }
                }
            }
        }
    }
}

impl KvRead for Snapshot {
    fn get(&self, table: Table, key: &[u8]) -> Option<&[u8]> {
        self.table(table).get(key).map(Vec::as_slice)
    }

    fn scan<'a>(&'a self, table: Table, range: &KeyRange) -> RangeIter<'a> {
        if range.is_empty() {
            return Box::new(std::iter::empty());
        }
        Box::new(
            self.table(table)
                .range::<[u8], _>(range.bounds())
                .map(|(k, v)| (k.as_slice(), v.as_slice())),
        )
    }
}

/// Pending mutations per table. `None` marks a delete.
#[derive(Debug, Default)]
pub struct PendingWrites {
    tables: BTreeMap<Table, BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl PendingWrites {
    /// Whether no mutation is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(BTreeMap::is_empty)
    }

    /// Number of pending mutations across all tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    /// Iterate pending mutations in table then key order.
    pub fn iter(&self) -> impl Iterator<Item = (Table, &[u8], Option<&[u8]>)> {
        self.tables.iter().flat_map(|(table, writes)| {
            writes
                .iter()
                .map(move |(k, v)| (*table, k.as_slice(), v.as_deref()))
        })
    }

    fn record(&mut self, table: Table, key: Vec<u8>, value: Option<Vec<u8>>) {
        self.tables.entry(table).or_default().insert(key, value);
    }

    fn lookup(&self, table: Table, key: &[u8]) -> Option<Option<&[u8]>> {
        self.tables
            .get(&table)
            .and_then(|writes| writes.get(key))
            .map(Option::as_deref)
    }
}

/// A unit of work over a base snapshot.
///
/// Reads see pending writes layered over the base. Nothing is visible to
/// other transactions until the batch is committed by the journal.
#[derive(Debug)]
pub struct WriteBatch {
    base: Arc<Snapshot>,
    pending: PendingWrites,
}

impl WriteBatch {
    /// Start an empty batch over `base`.
    #[must_use]
    pub fn new(base: Arc<Snapshot>) -> Self {
        Self {
            base,
            pending: PendingWrites::default(),
        }
    }

    /// The snapshot this batch was started from.
    #[must_use]
    pub const fn base(&self) -> &Arc<Snapshot> {
        &self.base
    }

    /// Pending mutations.
    #[must_use]
    pub const fn pending(&self) -> &PendingWrites {
        &self.pending
    }

    /// Split into base snapshot and pending mutations.
    #[must_use]
    pub fn into_parts(self) -> (Arc<Snapshot>, PendingWrites) {
        (self.base, self.pending)
    }

    /// Write `value` under `key`.
    pub fn put(&mut self, table: Table, key: Vec<u8>, value: Vec<u8>) {
        self.pending.record(table, key, Some(value));
    }

    /// Remove `key`. Removing an absent key is a no-op at commit time.
    pub fn delete(&mut self, table: Table, key: Vec<u8>) {
        self.pending.record(table, key, None);
    }
}

impl KvRead for WriteBatch {
    fn get(&self, table: Table, key: &[u8]) -> Option<&[u8]> {
        match self.pending.lookup(table, key) {
            Some(overlay) => overlay,
            None => self.base.get(table, key),
        }
    }

    fn scan<'a>(&'a self, table: Table, range: &KeyRange) -> RangeIter<'a> {
        let base = self.base.scan(table, range);
        let Some(writes) = self.pending.tables.get(&table) else {
            return base;
        };
        if range.is_empty() {
            return base;
        }
        let overlay = writes
            .range::<[u8], _>(range.bounds())
            .map(|(k, v)| (k.as_slice(), v.as_deref()));
        Box::new(MergedRange {
            base: base.peekable(),
            overlay: overlay.peekable(),
        })
    }
}

/// Merge of a base range and an overlay range. Overlay entries shadow base
/// entries with the same key; overlay deletes hide them.
struct MergedRange<B: Iterator, O: Iterator> {
    base: Peekable<B>,
    overlay: Peekable<O>,
}

impl<'a, B, O> Iterator for MergedRange<B, O>
where
    B: Iterator<Item = Entry<'a>>,
    O: Iterator<Item = (&'a [u8], Option<&'a [u8]>)>,
{
    type Item = Entry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let order = match (self.base.peek(), self.overlay.peek()) {
                (None, None) => return None,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some((base_key, _)), Some((overlay_key, _))) => base_key.cmp(overlay_key),
            };
            match order {
                Ordering::Less => return self.base.next(),
                Ordering::Equal => {
                    self.base.next();
                    if let Some((key, Some(value))) = self.overlay.next() {
                        return Some((key, value));
                    }
                }
                Ordering::Greater => {
                    if let Some((key, Some(value))) = self.overlay.next() {
                        return Some((key, value));
                    }
                }
            }
        }
    }
}
