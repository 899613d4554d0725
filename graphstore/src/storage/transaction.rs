//! Dataset-scoped transaction handles.
//!
//! `ReadTxn` reads a pinned snapshot; `WriteTxn` reads and writes a batch
//! holding the writer lock. Both see exactly one dataset: statement scans
//! never leave the dataset's key range, and interned entries are only
//! visible through a handle when the dataset is in their reference set.
//!
//! Shared read operations live on the `StatementReader` trait so that code
//! can be written once for both handles.

use std::sync::Arc;

use crate::error::StoreError;
use crate::storage::database::WriteTransaction;
use crate::storage::engine::{KvRead, Snapshot};
use crate::storage::intern::{ATTRIBUTES, BYTES, ENTITIES, InternId, InterningTable, STRINGS};
use crate::storage::statements::{self, StatementScan};
use crate::types::{
    AttributeId, BytesId, Dataset, DatasetId, EntityId, InternKind, Statement, StatementPattern,
    StringId, Value, ValueRef,
};

fn utf8(kind: InternKind, id: u64, bytes: &[u8]) -> Result<String, StoreError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| StoreError::corrupt(format!("{} #{id} is not UTF-8", kind.name())))
}

/// Read operations shared by `ReadTxn` and `WriteTxn`.
pub trait StatementReader {
    /// The dataset this transaction is scoped to.
    fn dataset(&self) -> &Dataset;

    /// The underlying tables.
    fn tables(&self) -> &dyn KvRead;

    /// The value interned under `id`, if this dataset references it.
    fn lookup<I: InternId>(&self, id: I) -> Option<&[u8]> {
        let table = InterningTable::<I>::new();
        if !table.is_referenced_by(self.tables(), id, self.dataset().id) {
            return None;
        }
        table.lookup(self.tables(), id)
    }

    /// The id of `value`, if interned and referenced by this dataset.
    fn lookup_by_value<I: InternId>(&self, value: &[u8]) -> Result<Option<I>, StoreError> {
        let table = InterningTable::<I>::new();
        Ok(table
            .lookup_by_value(self.tables(), value)?
            .filter(|&id| table.is_referenced_by(self.tables(), id, self.dataset().id)))
    }

    /// The full reference set of `id`, across all datasets.
    fn references<I: InternId>(&self, id: I) -> Result<Vec<DatasetId>, StoreError> {
        InterningTable::<I>::new().references(self.tables(), id)
    }

    /// Every id of table `I` this dataset references.
    fn referenced_ids<I: InternId>(&self) -> Result<Vec<I>, StoreError> {
        InterningTable::<I>::new().ids_for_dataset(self.tables(), self.dataset().id)
    }

    /// The id of the entity called `name`.
    fn entity(&self, name: &str) -> Result<Option<EntityId>, StoreError> {
        self.lookup_by_value(name.as_bytes())
    }

    /// The id of the attribute called `name`.
    fn attribute(&self, name: &str) -> Result<Option<AttributeId>, StoreError> {
        self.lookup_by_value(name.as_bytes())
    }

    /// The stored form of `value`, without interning it.
    ///
    /// `None` if the value needs interning and this dataset does not
    /// reference it.
    fn find_value(&self, value: &Value) -> Result<Option<ValueRef>, StoreError> {
        if let Some(inline) = value.inline_ref() {
            return Ok(Some(inline));
        }
        let Some((kind, bytes)) = value.intern_key() else {
            return Ok(None);
        };
        let raw = match kind {
            InternKind::Entity => self.lookup_by_value::<EntityId>(bytes)?.map(EntityId::get),
            InternKind::Attribute => self
                .lookup_by_value::<AttributeId>(bytes)?
                .map(AttributeId::get),
            InternKind::String => self.lookup_by_value::<StringId>(bytes)?.map(StringId::get),
            InternKind::Bytes => self.lookup_by_value::<BytesId>(bytes)?.map(BytesId::get),
        };
        Ok(raw.map(|raw| ValueRef::from_interned(kind, raw)))
    }

    /// Turn a stored value back into a semantic value.
    ///
    /// # Errors
    ///
    /// `StoreError::UnknownId` if the referenced entry is not visible to
    /// this dataset.
    fn resolve(&self, value: ValueRef) -> Result<Value, StoreError> {
        let text = |id: u64, bytes: Option<&[u8]>, kind| {
            let bytes = bytes.ok_or(StoreError::UnknownId { kind, id })?;
            utf8(kind, id, bytes)
        };
        match value {
            ValueRef::Integer(i) => Ok(Value::Integer(i)),
            ValueRef::Float(f) => Ok(Value::Float(f)),
            ValueRef::Boolean(b) => Ok(Value::Boolean(b)),
            ValueRef::Entity(id) => {
                text(id.get(), self.lookup(id), InternKind::Entity).map(Value::EntityRef)
            }
            ValueRef::Attribute(id) => {
                text(id.get(), self.lookup(id), InternKind::Attribute).map(Value::Identifier)
            }
            ValueRef::String(id) => {
                text(id.get(), self.lookup(id), InternKind::String).map(Value::String)
            }
            ValueRef::Bytes(id) => self
                .lookup(id)
                .map(|bytes| Value::Bytes(bytes.to_vec()))
                .ok_or(StoreError::UnknownId {
                    kind: InternKind::Bytes,
                    id: id.get(),
                }),
        }
    }

    /// Whether the dataset contains `statement`.
    fn contains(&self, statement: &Statement) -> bool {
        statements::contains(self.tables(), self.dataset().id, statement)
    }

    /// Lazily scan the dataset's statements matching `pattern`.
    fn scan(&self, pattern: StatementPattern) -> StatementScan<'_> {
        statements::scan(self.tables(), self.dataset().id, pattern)
    }

    /// Collect the dataset's statements matching `pattern`.
    fn statements(&self, pattern: StatementPattern) -> Result<Vec<Statement>, StoreError> {
        self.scan(pattern).collect()
    }
}

/// A read transaction over a pinned snapshot.
#[derive(Debug)]
pub struct ReadTxn {
    dataset: Dataset,
    snapshot: Arc<Snapshot>,
}

impl ReadTxn {
    pub(crate) const fn new(dataset: Dataset, snapshot: Arc<Snapshot>) -> Self {
        Self { dataset, snapshot }
    }
}

impl StatementReader for ReadTxn {
    fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    fn tables(&self) -> &dyn KvRead {
        self.snapshot.as_ref()
    }
}

/// A write transaction scoped to one dataset.
///
/// Writes become visible to other transactions only when the closure that
/// received this handle returns `Ok` and the commit succeeds.
#[derive(Debug)]
pub struct WriteTxn<'a> {
    dataset: Dataset,
    inner: WriteTransaction<'a>,
}

impl<'a> WriteTxn<'a> {
    pub(crate) const fn new(dataset: Dataset, inner: WriteTransaction<'a>) -> Self {
        Self { dataset, inner }
    }

    pub(crate) fn into_inner(self) -> WriteTransaction<'a> {
        self.inner
    }

    /// Intern `value` in table `I` on behalf of this dataset.
    pub fn intern<I: InternId>(&mut self, value: &[u8]) -> Result<I, StoreError> {
        InterningTable::<I>::new().intern_for(self.inner.batch_mut(), value, self.dataset.id)
    }

    /// Intern an entity name.
    pub fn intern_entity(&mut self, name: &str) -> Result<EntityId, StoreError> {
        self.intern(name.as_bytes())
    }

    /// Intern an attribute name.
    pub fn intern_attribute(&mut self, name: &str) -> Result<AttributeId, StoreError> {
        self.intern(name.as_bytes())
    }

    /// The stored form of `value`, interning it if needed.
    pub fn intern_value(&mut self, value: &Value) -> Result<ValueRef, StoreError> {
        if let Some(inline) = value.inline_ref() {
            return Ok(inline);
        }
        let Some((kind, bytes)) = value.intern_key() else {
            return Err(StoreError::corrupt("value is neither inline nor interned"));
        };
        let batch = self.inner.batch_mut();
        let dataset = self.dataset.id;
        let raw = match kind {
            InternKind::Entity => ENTITIES.intern_for(batch, bytes, dataset)?.get(),
            InternKind::Attribute => ATTRIBUTES.intern_for(batch, bytes, dataset)?.get(),
            InternKind::String => STRINGS.intern_for(batch, bytes, dataset)?.get(),
            InternKind::Bytes => BYTES.intern_for(batch, bytes, dataset)?.get(),
        };
        Ok(ValueRef::from_interned(kind, raw))
    }

    /// Give up this dataset's reference to `id`, evicting the entry when no
    /// reference is left. Returns whether the entry was evicted.
    ///
    /// # Errors
    ///
    /// `StoreError::InUse` if a statement of this dataset still uses `id`.
    pub fn dereference<I: InternId>(&mut self, id: I) -> Result<bool, StoreError> {
        let in_use = self.scan(StatementPattern::any()).try_fold(false, |found, statement| {
            let statement = statement?;
            let uses = match I::KIND {
                InternKind::Entity => statement.entity.get() == id.raw(),
                InternKind::Attribute => statement.attribute.get() == id.raw(),
                InternKind::String | InternKind::Bytes => false,
            } || statement.value.interned() == Some((I::KIND, id.raw()));
            Ok::<_, StoreError>(found || uses)
        })?;
        if in_use {
            return Err(StoreError::InUse {
                kind: I::KIND,
                id: id.raw(),
            });
        }
        InterningTable::<I>::new().dereference(self.inner.batch_mut(), id, self.dataset.id)
    }

    fn check_referenced(&self, kind: InternKind, raw: u64) -> Result<(), StoreError> {
        let dataset = self.dataset.id;
        let batch = self.inner.batch();
        let referenced = match kind {
            InternKind::Entity => ENTITIES.is_referenced_by(batch, EntityId(raw), dataset),
            InternKind::Attribute => ATTRIBUTES.is_referenced_by(batch, AttributeId(raw), dataset),
            InternKind::String => STRINGS.is_referenced_by(batch, StringId(raw), dataset),
            InternKind::Bytes => BYTES.is_referenced_by(batch, BytesId(raw), dataset),
        };
        if referenced {
            Ok(())
        } else {
            Err(StoreError::UnreferencedValue { kind, id: raw })
        }
    }

    /// Store `statement` in the dataset. Returns whether it was new.
    ///
    /// # Errors
    ///
    /// `StoreError::UnreferencedValue` if the statement uses an interned
    /// entry this dataset does not reference.
    pub fn insert(&mut self, statement: Statement) -> Result<bool, StoreError> {
        self.check_referenced(InternKind::Entity, statement.entity.get())?;
        self.check_referenced(InternKind::Attribute, statement.attribute.get())?;
        if let Some((kind, raw)) = statement.value.interned() {
            self.check_referenced(kind, raw)?;
        }
        Ok(statements::insert(
            self.inner.batch_mut(),
            self.dataset.id,
            &statement,
        ))
    }

    /// Remove `statement` from the dataset. Returns whether it was present.
    pub fn remove(&mut self, statement: &Statement) -> bool {
        statements::remove(self.inner.batch_mut(), self.dataset.id, statement)
    }

    /// Intern the parts of `entity attribute value` and store the statement.
    pub fn assert_statement(
        &mut self,
        entity: &str,
        attribute: &str,
        value: &Value,
    ) -> Result<Statement, StoreError> {
        let statement = Statement::new(
            self.intern_entity(entity)?,
            self.intern_attribute(attribute)?,
            self.intern_value(value)?,
        );
        self.insert(statement)?;
        Ok(statement)
    }

    /// Remove `entity attribute value` if present, without interning anything.
    ///
    /// Interned entries keep this dataset's reference; they are released
    /// when the dataset is deleted or through `dereference`.
    pub fn retract_statement(
        &mut self,
        entity: &str,
        attribute: &str,
        value: &Value,
    ) -> Result<bool, StoreError> {
        let (Some(entity), Some(attribute), Some(value)) = (
            self.entity(entity)?,
            self.attribute(attribute)?,
            self.find_value(value)?,
        ) else {
            return Ok(false);
        };
        Ok(self.remove(&Statement::new(entity, attribute, value)))
    }
}

impl StatementReader for WriteTxn<'_> {
    fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    fn tables(&self) -> &dyn KvRead {
        self.inner.batch()
    }
}
