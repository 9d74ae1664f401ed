//! Foreign-key style relations between synchronized tables.

use super::table::TableKey;
use crate::compare::{names_eq, NamedItem, StringComparison};
use serde::{Deserialize, Serialize};

/// A parent/child relation between two tables of a set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRelation {
    /// Relation name.
    pub relation_name: String,
    /// Referenced table.
    pub parent_table: TableKey,
    /// Referenced columns.
    pub parent_keys: Vec<String>,
    /// Referencing table.
    pub child_table: TableKey,
    /// Referencing columns.
    pub child_keys: Vec<String>,
}

impl SyncRelation {
    /// Creates a single-column relation.
    pub fn new(
        relation_name: impl Into<String>,
        parent_table: TableKey,
        parent_key: impl Into<String>,
        child_table: TableKey,
        child_key: impl Into<String>,
    ) -> Self {
        Self {
            relation_name: relation_name.into(),
            parent_table,
            parent_keys: vec![parent_key.into()],
            child_table,
            child_keys: vec![child_key.into()],
        }
    }
}

impl NamedItem for SyncRelation {
    fn equals_by_name_with(&self, other: &Self, cmp: StringComparison) -> bool {
        cmp.equals(&self.relation_name, &other.relation_name)
    }

    fn equals_by_properties_with(&self, other: &Self, cmp: StringComparison) -> bool {
        self.equals_by_name_with(other, cmp)
            && self.parent_table.matches(&other.parent_table, cmp)
            && self.child_table.matches(&other.child_table, cmp)
            && names_eq(cmp, &self.parent_keys, &other.parent_keys)
            && names_eq(cmp, &self.child_keys, &other.child_keys)
    }
}
