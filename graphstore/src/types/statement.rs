//! Datasets, statements and scan patterns.

use std::fmt;

use crate::types::ids::{AttributeId, DatasetId, EntityId};
use crate::types::value::ValueRef;

/// A named, independently deletable collection of statements.
///
/// # Invariants
///
/// - `name` is non-empty and unique among live datasets.
/// - `id` is stable for the dataset's lifetime and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dataset {
    pub id: DatasetId,
    pub name: String,
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// A stored (entity, attribute, value) triple.
///
/// The owning dataset is implied by the transaction it was read in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statement {
    pub entity: EntityId,
    pub attribute: AttributeId,
    pub value: ValueRef,
}

impl Statement {
    #[must_use]
    pub const fn new(entity: EntityId, attribute: AttributeId, value: ValueRef) -> Self {
        Self {
            entity,
            attribute,
            value,
        }
    }
}

/// A statement pattern. `None` fields are wildcards.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatementPattern {
    pub entity: Option<EntityId>,
    pub attribute: Option<AttributeId>,
    pub value: Option<ValueRef>,
}

impl StatementPattern {
    /// Match every statement in the dataset.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            entity: None,
            attribute: None,
            value: None,
        }
    }

    #[must_use]
    pub const fn with_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    #[must_use]
    pub const fn with_attribute(mut self, attribute: AttributeId) -> Self {
        self.attribute = Some(attribute);
        self
    }

    #[must_use]
    pub const fn with_value(mut self, value: ValueRef) -> Self {
        self.value = Some(value);
        self
    }

    /// Check whether a statement satisfies this pattern.
    #[must_use]
    pub fn matches(&self, statement: &Statement) -> bool {
        self.entity.is_none_or(|e| e == statement.entity)
            && self.attribute.is_none_or(|a| a == statement.attribute)
            && self
                .value
                .is_none_or(|v| v.to_bytes() == statement.value.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_wildcards_match_everything() {
        let statement = Statement::new(EntityId(1), AttributeId(2), ValueRef::Integer(3));
        assert!(StatementPattern::any().matches(&statement));
    }

    #[test]
    fn test_pattern_filters_each_position() {
        let statement = Statement::new(EntityId(1), AttributeId(2), ValueRef::Integer(3));
        assert!(StatementPattern::any().with_entity(EntityId(1)).matches(&statement));
        assert!(!StatementPattern::any().with_entity(EntityId(9)).matches(&statement));
        assert!(!StatementPattern::any()
            .with_attribute(AttributeId(9))
            .matches(&statement));
        assert!(!StatementPattern::any()
            .with_value(ValueRef::Integer(4))
            .matches(&statement));
        assert!(StatementPattern::any()
            .with_value(ValueRef::Integer(3))
            .matches(&statement));
    }

    #[test]
    fn test_dataset_display() {
        let dataset = Dataset {
            id: DatasetId(4),
            name: "people".to_string(),
        };
        assert_eq!(dataset.to_string(), "people (dataset#4)");
    }
}
