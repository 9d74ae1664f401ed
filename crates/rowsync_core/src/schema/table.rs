//! Table definitions.

use super::column::SyncColumn;
use crate::compare::{names_eq, NamedItem, StringComparison};
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a table by name and schema namespace.
///
/// Rows and containers refer to their table through this key instead of
/// holding a reference to it; the owning [`SyncSet`](crate::SyncSet)
/// resolves the key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TableKey {
    /// Table name.
    pub table_name: String,
    /// Schema namespace, empty when the store has none.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schema_name: String,
}

impl TableKey {
    /// Creates a key.
    pub fn new(table_name: impl Into<String>, schema_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            schema_name: schema_name.into(),
        }
    }

    /// Compares two keys under the given policy.
    #[must_use]
    pub fn matches(&self, other: &TableKey, cmp: StringComparison) -> bool {
        cmp.equals(&self.table_name, &other.table_name)
            && cmp.equals(&self.schema_name, &other.schema_name)
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.schema_name.is_empty() {
            f.write_str(&self.table_name)
        } else {
            write!(f, "{}.{}", self.schema_name, self.table_name)
        }
    }
}

/// A synchronized table: ordered columns and primary key names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTable {
    /// Table name.
    pub table_name: String,
    /// Schema namespace.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schema_name: String,
    columns: Vec<SyncColumn>,
    primary_keys: Vec<String>,
}

impl SyncTable {
    /// Creates an empty table without a schema namespace.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self::with_schema(table_name, "")
    }

    /// Creates an empty table in a schema namespace.
    pub fn with_schema(table_name: impl Into<String>, schema_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            schema_name: schema_name.into(),
            columns: Vec::new(),
            primary_keys: Vec::new(),
        }
    }

    /// Returns the lookup key of this table.
    #[must_use]
    pub fn key(&self) -> TableKey {
        TableKey::new(&self.table_name, &self.schema_name)
    }

    /// All columns in ordinal order.
    #[must_use]
    pub fn columns(&self) -> &[SyncColumn] {
        &self.columns
    }

    /// Primary key column names.
    #[must_use]
    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    /// Appends a column and recomputes ordinals.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateColumn` if a column with the same name exists.
    pub fn add_column(&mut self, column: SyncColumn) -> CoreResult<()> {
        if self.find(&column.name).is_some() {
            return Err(CoreError::DuplicateColumn {
                table: self.key().to_string(),
                column: column.name,
            });
        }
        self.columns.push(column);
        self.reorder();
        Ok(())
    }

    /// Builder-style [`add_column`](Self::add_column).
    ///
    /// # Errors
    ///
    /// Returns `DuplicateColumn` if a column with the same name exists.
    pub fn with_column(mut self, column: SyncColumn) -> CoreResult<Self> {
        self.add_column(column)?;
        Ok(self)
    }

    /// Removes a column, recomputes ordinals and drops it from the key.
    ///
    /// # Errors
    ///
    /// Returns `ColumnNotFound` if absent.
    pub fn remove_column(&mut self, name: &str) -> CoreResult<SyncColumn> {
        let index = self
            .find(name)
            .ok_or_else(|| CoreError::column_not_found(self.key().to_string(), name))?;
        let removed = self.columns.remove(index);
        let cmp = StringComparison::default();
        self.primary_keys.retain(|pk| !cmp.equals(pk, &removed.name));
        self.reorder();
        Ok(removed)
    }

    /// Designates the primary key columns by name.
    ///
    /// # Errors
    ///
    /// Returns `ColumnNotFound` if any name is not a column.
    pub fn set_primary_keys<I, S>(&mut self, names: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        for name in &names {
            self.column(name)?;
        }
        self.primary_keys = names;
        Ok(())
    }

    /// Returns a column by name.
    ///
    /// # Errors
    ///
    /// Returns `ColumnNotFound` if absent.
    pub fn column(&self, name: &str) -> CoreResult<&SyncColumn> {
        self.find(name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| CoreError::column_not_found(self.key().to_string(), name))
    }

    /// Returns a column's ordinal by name.
    ///
    /// # Errors
    ///
    /// Returns `ColumnNotFound` if absent.
    pub fn ordinal(&self, name: &str) -> CoreResult<usize> {
        self.column(name).map(|c| c.ordinal)
    }

    /// Returns true if `name` is part of the primary key.
    #[must_use]
    pub fn is_primary_key(&self, name: &str) -> bool {
        let cmp = StringComparison::default();
        self.primary_keys.iter().any(|pk| cmp.equals(pk, name))
    }

    /// Columns that may be written by sync, lazily over the live column list.
    ///
    /// Read-only and computed columns are always excluded.
    pub fn mutable_columns(
        &self,
        exclude_auto_increment: bool,
        exclude_primary_keys: bool,
    ) -> impl Iterator<Item = &SyncColumn> + '_ {
        self.columns.iter().filter(move |c| {
            c.is_transferable()
                && !(exclude_auto_increment && c.is_auto_increment)
                && !(exclude_primary_keys && self.is_primary_key(&c.name))
        })
    }

    /// Primary key columns in column order, lazily.
    pub fn primary_key_columns(&self) -> impl Iterator<Item = &SyncColumn> + '_ {
        self.columns
            .iter()
            .filter(move |c| self.is_primary_key(&c.name))
    }

    /// Returns a copy without read-only and computed columns.
    ///
    /// Primary keys are kept even when marked read-only, since rows cannot
    /// be matched without them.
    #[must_use]
    pub fn sanitized(&self) -> SyncTable {
        let mut table = SyncTable::with_schema(&self.table_name, &self.schema_name);
        table.columns = self
            .columns
            .iter()
            .filter(|c| c.is_transferable() || self.is_primary_key(&c.name))
            .cloned()
            .collect();
        table.primary_keys = self.primary_keys.clone();
        table.reorder();
        table
    }

    fn find(&self, name: &str) -> Option<usize> {
        let cmp = StringComparison::default();
        self.columns.iter().position(|c| cmp.equals(&c.name, name))
    }

    fn reorder(&mut self) {
        for (ordinal, column) in self.columns.iter_mut().enumerate() {
            column.ordinal = ordinal;
        }
    }
}

impl NamedItem for SyncTable {
    fn equals_by_name_with(&self, other: &Self, cmp: StringComparison) -> bool {
        cmp.equals(&self.table_name, &other.table_name)
            && cmp.equals(&self.schema_name, &other.schema_name)
    }

    fn equals_by_properties_with(&self, other: &Self, cmp: StringComparison) -> bool {
        self.equals_by_name_with(other, cmp)
            && names_eq(cmp, &self.primary_keys, &other.primary_keys)
            && self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.equals_by_properties_with(b, cmp))
    }
}
