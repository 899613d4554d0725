//! Garbage collection of a deleted dataset.
//!
//! Runs inside the write transaction that deletes the dataset, so either the
//! dataset disappears together with every statement and reference it owned,
//! or nothing changes.
//!
//! # Design
//!
//! The ids to dereference are the union, per interning table, of
//! - every id used by a removed statement, and
//! - every id in the table's `by_dataset` index for the dataset.
//!
//! The second set covers values interned on behalf of the dataset but never
//! (or no longer) used by a statement. Each id is dereferenced once.
//!
//! # Invariants
//!
//! - After collection no statement and no reference of the dataset remains
//! - Entries left with an empty reference set are evicted in the same batch

use std::collections::BTreeSet;

use crate::error::StoreError;
use crate::storage::engine::WriteBatch;
use crate::storage::intern::{ATTRIBUTES, BYTES, ENTITIES, InternId, InterningTable, STRINGS};
use crate::storage::{registry, statements};
use crate::types::{Dataset, DatasetId, InternKind, Statement};

/// What collecting a dataset did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Statements removed.
    pub statements_removed: usize,
    /// Reference-set memberships removed, across all tables.
    pub entries_dereferenced: usize,
    /// Entries evicted because their reference set became empty.
    pub entries_evicted: usize,
}

/// Ids referenced by removed statements, per table.
#[derive(Debug, Default)]
struct ReferencedIds {
    entities: BTreeSet<u64>,
    attributes: BTreeSet<u64>,
    strings: BTreeSet<u64>,
    bytes: BTreeSet<u64>,
}

impl ReferencedIds {
    fn from_statements(removed: &[Statement]) -> Self {
        let mut ids = Self::default();
        for statement in removed {
            ids.entities.insert(statement.entity.get());
            ids.attributes.insert(statement.attribute.get());
            if let Some((kind, raw)) = statement.value.interned() {
                ids.set_mut(kind).insert(raw);
            }
        }
        ids
    }

    const fn set_mut(&mut self, kind: InternKind) -> &mut BTreeSet<u64> {
        match kind {
            InternKind::Entity => &mut self.entities,
            InternKind::Attribute => &mut self.attributes,
            InternKind::String => &mut self.strings,
            InternKind::Bytes => &mut self.bytes,
        }
    }
}

fn dereference_all<I: InternId>(
    table: InterningTable<I>,
    batch: &mut WriteBatch,
    dataset: DatasetId,
    mut ids: BTreeSet<u64>,
    report: &mut GcReport,
) -> Result<(), StoreError> {
    ids.extend(table.ids_for_dataset(&*batch, dataset)?.into_iter().map(I::raw));
    for raw in ids {
        let id = I::from_raw(raw);
        if !table.is_referenced_by(&*batch, id, dataset) {
            // Statements only use ids their dataset references.
            return Err(StoreError::corrupt(format!(
                "{} #{raw} used by {dataset} without a reference",
                I::KIND.name()
            )));
        }
        if table.dereference(batch, id, dataset)? {
            report.entries_evicted += 1;
        }
        report.entries_dereferenced += 1;
    }
    Ok(())
}

/// Remove `dataset` with every statement and reference it owns.
pub fn collect_dataset(batch: &mut WriteBatch, dataset: &Dataset) -> Result<GcReport, StoreError> {
    let removed = statements::remove_all_for_dataset(batch, dataset.id)?;
    let mut report = GcReport {
        statements_removed: removed.len(),
        ..GcReport::default()
    };

    let ids = ReferencedIds::from_statements(&removed);
    dereference_all(ENTITIES, batch, dataset.id, ids.entities, &mut report)?;
    dereference_all(ATTRIBUTES, batch, dataset.id, ids.attributes, &mut report)?;
    dereference_all(STRINGS, batch, dataset.id, ids.strings, &mut report)?;
    dereference_all(BYTES, batch, dataset.id, ids.bytes, &mut report)?;

    registry::remove(batch, &dataset.name);

    tracing::debug!(
        dataset = %dataset,
        statements = report.statements_removed,
        dereferenced = report.entries_dereferenced,
        evicted = report.entries_evicted,
        "Collected dataset"
    );
    Ok(report)
}
