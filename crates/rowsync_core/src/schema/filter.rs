//! Row filters declared on a table.

use super::table::TableKey;
use crate::compare::{NamedItem, StringComparison};
use serde::{Deserialize, Serialize};

/// Restricts the rows of a table to those whose `column` equals the value
/// supplied for `parameter` in the session's extension properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncFilter {
    /// Filtered table.
    pub table: TableKey,
    /// Column compared against the parameter.
    pub column: String,
    /// Parameter name looked up in the session context.
    pub parameter: String,
}

impl SyncFilter {
    /// Creates a filter.
    pub fn new(table: TableKey, column: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            table,
            column: column.into(),
            parameter: parameter.into(),
        }
    }
}

impl NamedItem for SyncFilter {
    fn equals_by_name_with(&self, other: &Self, cmp: StringComparison) -> bool {
        self.table.matches(&other.table, cmp)
    }

    fn equals_by_properties_with(&self, other: &Self, cmp: StringComparison) -> bool {
        self.equals_by_name_with(other, cmp)
            && cmp.equals(&self.column, &other.column)
            && cmp.equals(&self.parameter, &other.parameter)
    }
}
