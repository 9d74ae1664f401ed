//! Non-destructive schema migration planning.
//!
//! A plan lists what must be created for a store holding `old` to accept
//! rows shaped by `new`. Nothing is ever dropped: tables and columns that
//! disappear from `new` stay in the store and are simply no longer synced.

use crate::compare::NamedItem;
use crate::schema::{SyncColumn, SyncSet, SyncTable, TableKey};
use serde::{Deserialize, Serialize};

/// A column to add to an existing table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddedColumn {
    /// Table receiving the column.
    pub table: TableKey,
    /// Column definition.
    pub column: SyncColumn,
}

/// Structural differences between two schema versions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MigrationPlan {
    /// Tables to create.
    pub added_tables: Vec<SyncTable>,
    /// Columns to add.
    pub added_columns: Vec<AddedColumn>,
    /// Columns whose definition changed in place.
    pub altered_columns: Vec<AddedColumn>,
    /// Tables whose primary key changed.
    pub primary_key_changes: Vec<TableKey>,
    /// Tables present in `old` but not in `new`; left untouched.
    pub retired_tables: Vec<TableKey>,
}

impl MigrationPlan {
    /// Computes the plan that takes `old` to `new`.
    #[must_use]
    pub fn between(old: &SyncSet, new: &SyncSet) -> Self {
        let cmp = new.comparison;
        let mut plan = MigrationPlan::default();
        for table in new.tables() {
            let Some(existing) = old.table_by_key(&table.key()) else {
                plan.added_tables.push(table.clone());
                continue;
            };
            for column in table.columns() {
                let previous = existing
                    .columns()
                    .iter()
                    .find(|c| c.equals_by_name_with(column, cmp));
                let entry = AddedColumn {
                    table: table.key(),
                    column: column.clone(),
                };
                match previous {
                    None => plan.added_columns.push(entry),
                    Some(p) if p.data_type != column.data_type
                        || p.allow_null != column.allow_null
                        || p.max_length != column.max_length =>
                    {
                        plan.altered_columns.push(entry);
                    }
                    Some(_) => {}
                }
            }
            let same_keys = existing.primary_keys().len() == table.primary_keys().len()
                && existing
                    .primary_keys()
                    .iter()
                    .zip(table.primary_keys())
                    .all(|(a, b)| cmp.equals(a, b));
            if !same_keys {
                plan.primary_key_changes.push(table.key());
            }
        }
        plan.retired_tables = old
            .tables()
            .iter()
            .filter(|t| new.table_by_key(&t.key()).is_none())
            .map(SyncTable::key)
            .collect();
        plan
    }

    /// Returns true if the store needs no structural change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added_tables.is_empty()
            && self.added_columns.is_empty()
            && self.altered_columns.is_empty()
            && self.primary_key_changes.is_empty()
    }
}
