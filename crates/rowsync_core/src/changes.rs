//! Per-table change counters.

use crate::row::RowState;
use crate::schema::TableKey;
use serde::{Deserialize, Serialize};

/// Rows selected from one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChangesSelected {
    /// Table key.
    pub table: TableKey,
    /// Upserts selected.
    pub upserts: u64,
    /// Deletes selected.
    pub deletes: u64,
}

/// Rows selected from a store during change capture.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatabaseChangesSelected {
    /// Per table counts, in schema order.
    pub tables: Vec<TableChangesSelected>,
}

impl DatabaseChangesSelected {
    /// Adds one selected row.
    pub fn record(&mut self, table: &TableKey, state: RowState) {
        let entry = match self.tables.iter().position(|t| &t.table == table) {
            Some(i) => &mut self.tables[i],
            None => {
                self.tables.push(TableChangesSelected {
                    table: table.clone(),
                    upserts: 0,
                    deletes: 0,
                });
                let last = self.tables.len() - 1;
                &mut self.tables[last]
            }
        };
        if state == RowState::Deleted {
            entry.deletes += 1;
        } else {
            entry.upserts += 1;
        }
    }

    /// Total selected rows.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.tables.iter().map(|t| t.upserts + t.deletes).sum()
    }
}

/// Rows applied to one table, for one state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChangesApplied {
    /// Table key.
    pub table: TableKey,
    /// `Deleted` for the delete pass, `Modified` for upserts.
    pub state: RowState,
    /// Rows written.
    pub applied: u64,
    /// Conflicts detected and resolved.
    pub resolved_conflicts: u64,
    /// Rows the store rejected.
    pub failed: u64,
}

/// Rows applied to a store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatabaseChangesApplied {
    /// Per table and state counts, in apply order.
    pub tables: Vec<TableChangesApplied>,
}

impl DatabaseChangesApplied {
    /// Returns the counter for a table and state, creating it.
    pub fn entry(&mut self, table: &TableKey, state: RowState) -> &mut TableChangesApplied {
        match self
            .tables
            .iter()
            .position(|t| &t.table == table && t.state == state)
        {
            Some(i) => &mut self.tables[i],
            None => {
                self.tables.push(TableChangesApplied {
                    table: table.clone(),
                    state,
                    applied: 0,
                    resolved_conflicts: 0,
                    failed: 0,
                });
                let last = self.tables.len() - 1;
                &mut self.tables[last]
            }
        }
    }

    /// Total rows written.
    #[must_use]
    pub fn total_applied(&self) -> u64 {
        self.tables.iter().map(|t| t.applied).sum()
    }

    /// Total conflicts resolved.
    #[must_use]
    pub fn total_resolved_conflicts(&self) -> u64 {
        self.tables.iter().map(|t| t.resolved_conflicts).sum()
    }

    /// Total rows rejected.
    #[must_use]
    pub fn total_failed(&self) -> u64 {
        self.tables.iter().map(|t| t.failed).sum()
    }

    /// Adds another set of counters into this one.
    pub fn absorb(&mut self, other: &DatabaseChangesApplied) {
        for t in &other.tables {
            let entry = self.entry(&t.table, t.state);
            entry.applied += t.applied;
            entry.resolved_conflicts += t.resolved_conflicts;
            entry.failed += t.failed;
        }
    }
}
