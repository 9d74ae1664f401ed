//! Wire projection of rows: tables of bare value arrays.

use crate::error::{CoreError, CoreResult};
use crate::row::SyncRow;
use crate::schema::{SyncSet, SyncTable, TableKey};
use rowsync_codec::Value;
use serde::{Deserialize, Serialize};

/// Rows of one table, each a bare array (state slot first).
///
/// Column definitions are not repeated; the receiver interprets rows
/// against the schema it already holds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerTable {
    /// Table name.
    #[serde(rename = "n")]
    pub table_name: String,
    /// Schema namespace.
    #[serde(rename = "s", default, skip_serializing_if = "String::is_empty")]
    pub schema_name: String,
    /// Row buffers.
    #[serde(rename = "r")]
    pub rows: Vec<Vec<Value>>,
}

impl ContainerTable {
    /// Creates an empty container for a table.
    #[must_use]
    pub fn new(key: &TableKey) -> Self {
        Self {
            table_name: key.table_name.clone(),
            schema_name: key.schema_name.clone(),
            rows: Vec::new(),
        }
    }

    /// Builds a container from rows.
    pub fn from_rows<'a>(key: &TableKey, rows: impl IntoIterator<Item = &'a SyncRow>) -> Self {
        let mut container = Self::new(key);
        container.rows = rows.into_iter().map(|r| r.buffer().to_vec()).collect();
        container
    }

    /// Key of the table.
    #[must_use]
    pub fn key(&self) -> TableKey {
        TableKey::new(&self.table_name, &self.schema_name)
    }

    /// Interprets the rows against `table`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRow` if any row does not fit the table.
    pub fn to_rows(&self, table: &SyncTable) -> CoreResult<Vec<SyncRow>> {
        self.rows
            .iter()
            .map(|buffer| SyncRow::from_buffer(table, buffer.clone()))
            .collect()
    }
}

/// A set of container tables, the payload of one batch part.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerSet {
    /// Tables in the order rows were added.
    #[serde(rename = "t")]
    pub tables: Vec<ContainerTable>,
}

impl ContainerSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row buffer to the table's container, creating it if needed.
    pub fn push(&mut self, key: &TableKey, buffer: Vec<Value>) {
        let position = self
            .tables
            .iter()
            .rposition(|t| t.table_name == key.table_name && t.schema_name == key.schema_name);
        match position {
            Some(i) => self.tables[i].rows.push(buffer),
            None => {
                let mut table = ContainerTable::new(key);
                table.rows.push(buffer);
                self.tables.push(table);
            }
        }
    }

    /// Total number of rows.
    #[must_use]
    pub fn rows_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }

    /// Returns true if no table holds a row.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows_count() == 0
    }

    /// Returns the container of a table.
    #[must_use]
    pub fn table(&self, key: &TableKey, schema: &SyncSet) -> Option<&ContainerTable> {
        self.tables
            .iter()
            .find(|t| t.key().matches(key, schema.comparison))
    }

    /// Checks every row against the schema.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` or `InvalidRow` on the first mismatch.
    pub fn validate(&self, schema: &SyncSet) -> CoreResult<()> {
        for container in &self.tables {
            let table = schema.resolve(&container.key())?;
            let expected = table.columns().len() + 1;
            if let Some(bad) = container.rows.iter().find(|r| r.len() != expected) {
                return Err(CoreError::InvalidRow {
                    table: table.key().to_string(),
                    expected,
                    actual: bad.len(),
                });
            }
        }
        Ok(())
    }
}
