//! Invariant checking over a committed snapshot.
//!
//! Walks every table and reports each place where the stored data breaks an
//! invariant of the store. Used by `GraphStore::verify_integrity` and by
//! tests after arbitrary create/write/delete sequences.

use std::collections::{BTreeMap, BTreeSet};

use crate::storage::allocator::{IdCounter, peek};
use crate::storage::engine::{KvRead, Table};
use crate::storage::intern::{ATTRIBUTES, BYTES, ENTITIES, InternId, InterningTable, STRINGS};
use crate::storage::key_range::KeyRange;
use crate::storage::statements::decode_statement_key;
use crate::types::{DatasetId, InternKind};

/// A detected invariant violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityViolation {
    /// Description of the violation.
    pub description: String,
    /// Additional context.
    pub context: String,
}

impl std::fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.context.is_empty() {
            write!(f, "{}", self.description)
        } else {
            write!(f, "{} ({})", self.description, self.context)
        }
    }
}

/// Collects violations while walking the tables.
#[derive(Debug, Default)]
struct IntegrityChecker {
    violations: Vec<IntegrityViolation>,
}

impl IntegrityChecker {
    fn add(&mut self, description: &str, context: String) {
        self.violations.push(IntegrityViolation {
            description: description.to_string(),
            context,
        });
    }

    /// Check the registry. Returns the live dataset ids.
    fn check_datasets<R: KvRead + ?Sized>(&mut self, reader: &R) -> BTreeSet<DatasetId> {
        let next = peek(reader, IdCounter::Dataset).unwrap_or(u64::MAX);
        let mut ids = BTreeSet::new();
        for (key, value) in reader.scan(Table::Datasets, &KeyRange::all()) {
            let name = String::from_utf8_lossy(key);
            if key.is_empty() {
                self.add("Empty dataset name", String::new());
            }
            if std::str::from_utf8(key).is_err() {
                self.add("Dataset name is not UTF-8", format!("{key:?}"));
            }
            let Some(id) = DatasetId::from_key_bytes(value).filter(|_| value.len() == 8) else {
                self.add("Malformed dataset id", format!("dataset {name}"));
                continue;
            };
            if !ids.insert(id) {
                self.add("Dataset id shared by two names", format!("{id}, {name}"));
            }
            if id.get() >= next {
                self.add("Dataset id not yet allocated", format!("{id}, counter {next}"));
            }
        }
        ids
    }

    /// Check one interning table. Returns `id -> reference set`.
    fn check_interning<I: InternId, R: KvRead + ?Sized>(
        &mut self,
        reader: &R,
        table: InterningTable<I>,
        datasets: &BTreeSet<DatasetId>,
    ) -> BTreeMap<u64, BTreeSet<DatasetId>> {
        let (values, ids, refs, by_dataset) = table.tables();
        let kind = table.kind().name();
        let next = peek(reader, IdCounter::Interned(I::KIND)).unwrap_or(u64::MAX);

        let mut entries = BTreeMap::new();
        for (key, value) in reader.scan(ids, &KeyRange::all()) {
            let Some(id) = decode_u64(key) else {
                self.add("Malformed interned id", kind.to_string());
                continue;
            };
            if id >= next {
                self.add("Interned id not yet allocated", format!("{kind} #{id}"));
            }
            match reader.get(values, value).and_then(decode_u64) {
                Some(back) if back == id => {}
                _ => self.add("Value index does not map back to id", format!("{kind} #{id}")),
            }
            entries.insert(id, BTreeSet::new());
        }
        for (key, value) in reader.scan(values, &KeyRange::all()) {
            let id = decode_u64(value);
            if id.is_none_or(|id| !entries.contains_key(&id)) {
                self.add(
                    "Value index points at missing id",
                    format!("{kind} {}", String::from_utf8_lossy(key)),
                );
            }
        }

        let mut forward = BTreeSet::new();
        for (key, _) in reader.scan(refs, &KeyRange::all()) {
            let (Some(id), Some(dataset)) = (decode_u64(key), decode_dataset(key.get(8..))) else {
                self.add("Malformed reference key", kind.to_string());
                continue;
            };
            if !datasets.contains(&dataset) {
                self.add("Reference to deleted dataset", format!("{kind} #{id}, {dataset}"));
            }
            match entries.get_mut(&id) {
                Some(set) => {
                    set.insert(dataset);
                }
                None => self.add("Reference to missing entry", format!("{kind} #{id}")),
            }
            forward.insert((id, dataset));
        }

        let mut backward = BTreeSet::new();
        for (key, _) in reader.scan(by_dataset, &KeyRange::all()) {
            let (Some(dataset), Some(id)) = (decode_dataset(Some(key)), key.get(8..).and_then(decode_u64))
            else {
                self.add("Malformed reverse reference key", kind.to_string());
                continue;
            };
            backward.insert((id, dataset));
        }
        if forward != backward {
            self.add(
                "Reference index and reverse index differ",
                format!("{kind}: {} vs {}", forward.len(), backward.len()),
            );
        }

        for (id, set) in &entries {
            if set.is_empty() {
                self.add("Entry with empty reference set", format!("{kind} #{id}"));
            }
        }
        entries
    }

    fn check_statements<R: KvRead + ?Sized>(
        &mut self,
        reader: &R,
        datasets: &BTreeSet<DatasetId>,
        tables: &BTreeMap<InternKind, BTreeMap<u64, BTreeSet<DatasetId>>>,
    ) {
        for (key, _) in reader.scan(Table::Statements, &KeyRange::all()) {
            let Ok((dataset, statement)) = decode_statement_key(key) else {
                self.add("Malformed statement key", format!("{key:?}"));
                continue;
            };
            if !datasets.contains(&dataset) {
                self.add("Statement in deleted dataset", format!("{dataset}"));
            }
            let mut uses = vec![
                (InternKind::Entity, statement.entity.get()),
                (InternKind::Attribute, statement.attribute.get()),
            ];
            uses.extend(statement.value.interned());
            for (kind, id) in uses {
                let referenced = tables
                    .get(&kind)
                    .and_then(|entries| entries.get(&id))
                    .is_some_and(|set| set.contains(&dataset));
                if !referenced {
                    self.add(
                        "Statement uses entry its dataset does not reference",
                        format!("{} #{id} in {dataset}", kind.name()),
                    );
                }
            }
        }
    }
}

fn decode_u64(bytes: &[u8]) -> Option<u64> {
    bytes.get(..8)?.try_into().ok().map(u64::from_be_bytes)
}

fn decode_dataset(bytes: Option<&[u8]>) -> Option<DatasetId> {
    bytes.and_then(DatasetId::from_key_bytes)
}

/// Check every invariant of the store over `reader`.
pub fn verify<R: KvRead + ?Sized>(reader: &R) -> Vec<IntegrityViolation> {
    let mut checker = IntegrityChecker::default();
    let datasets = checker.check_datasets(reader);

    let mut tables = BTreeMap::new();
    tables.insert(
        InternKind::Entity,
        checker.check_interning(reader, ENTITIES, &datasets),
    );
    tables.insert(
        InternKind::Attribute,
        checker.check_interning(reader, ATTRIBUTES, &datasets),
    );
    tables.insert(
        InternKind::String,
        checker.check_interning(reader, STRINGS, &datasets),
    );
    tables.insert(
        InternKind::Bytes,
        checker.check_interning(reader, BYTES, &datasets),
    );

    checker.check_statements(reader, &datasets, &tables);
    checker.violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::engine::{Snapshot, WriteBatch};
    use crate::storage::{gc, registry, statements};
    use crate::types::{Statement, ValueRef};
    use std::sync::Arc;

    fn populated() -> WriteBatch {
        let mut batch = WriteBatch::new(Arc::new(Snapshot::new()));
        let (a, _) = registry::create(&mut batch, "a").expect("create");
        let e = ENTITIES.intern_for(&mut batch, b"alice", a.id).expect("intern");
        let attr = ATTRIBUTES.intern_for(&mut batch, b"age", a.id).expect("intern");
        statements::insert(
            &mut batch,
            a.id,
            &Statement::new(e, attr, ValueRef::Integer(30)),
        );
        batch
    }

    #[test]
    fn test_empty_store_is_consistent() {
        assert!(verify(&Snapshot::new()).is_empty());
    }

    #[test]
    fn test_populated_store_is_consistent() {
        let batch = populated();
        assert_eq!(verify(&batch), Vec::new());
    }

    #[test]
    fn test_consistent_after_gc() {
        let mut batch = populated();
        let a = registry::resolve(&batch, "a").expect("resolve").expect("exists");
        gc::collect_dataset(&mut batch, &a).expect("collect");
        assert_eq!(verify(&batch), Vec::new());
    }

    #[test]
    fn test_detects_dangling_statement() {
        let mut batch = populated();
        let a = registry::resolve(&batch, "a").expect("resolve").expect("exists");
        let e = ENTITIES
            .lookup_by_value(&batch, b"alice")
            .expect("lookup")
            .expect("exists");
        // Drop the reference behind the store's back.
        batch.delete(Table::EntityRefs, [e.key_bytes(), a.id.to_key_bytes()].concat());

        let violations = verify(&batch);
        assert!(
            violations
                .iter()
                .any(|v| v.description == "Statement uses entry its dataset does not reference")
        );
        assert!(
            violations
                .iter()
                .any(|v| v.description == "Entry with empty reference set")
        );
    }

    #[test]
    fn test_detects_statement_in_deleted_dataset() {
        let mut batch = populated();
        registry::remove(&mut batch, "a");
        let violations = verify(&batch);
        assert!(
            violations
                .iter()
                .any(|v| v.description == "Statement in deleted dataset")
        );
    }
}
