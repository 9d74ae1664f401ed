//! State-tagged rows.

use crate::error::{CoreError, CoreResult};
use crate::schema::{SyncTable, TableKey};
use rowsync_codec::Value;
use serde::{Deserialize, Serialize};

/// Change state of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowState {
    /// Not changed.
    Unchanged,
    /// Inserted.
    Added,
    /// Updated.
    Modified,
    /// Deleted (tombstone).
    Deleted,
}

impl RowState {
    /// Converts to the code stored in a row's state slot.
    #[must_use]
    pub fn to_code(self) -> i64 {
        match self {
            RowState::Unchanged => 2,
            RowState::Added => 4,
            RowState::Deleted => 8,
            RowState::Modified => 16,
        }
    }

    /// Converts from a state slot code.
    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            2 => Some(RowState::Unchanged),
            4 => Some(RowState::Added),
            8 => Some(RowState::Deleted),
            16 => Some(RowState::Modified),
            _ => None,
        }
    }
}

/// One row of a table.
///
/// The buffer holds the row state in slot 0 followed by one value per
/// column, so its length is always `table.columns().len() + 1`. Values
/// are addressed by ordinal; name lookups go through the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRow {
    table: TableKey,
    buffer: Vec<Value>,
}

impl SyncRow {
    /// Creates a row of nulls with state `Added`.
    #[must_use]
    pub fn new(table: &SyncTable) -> Self {
        let mut buffer = vec![Value::Null; table.columns().len() + 1];
        buffer[0] = Value::Integer(RowState::Added.to_code());
        Self {
            table: table.key(),
            buffer,
        }
    }

    /// Creates a row from column values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRow` if the value count does not match the columns.
    pub fn from_values(table: &SyncTable, state: RowState, values: Vec<Value>) -> CoreResult<Self> {
        let mut buffer = Vec::with_capacity(values.len() + 1);
        buffer.push(Value::Integer(state.to_code()));
        buffer.extend(values);
        Self::from_buffer(table, buffer)
    }

    /// Creates a row from a raw buffer, state slot included.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRow` if the length is wrong or slot 0 is not a state.
    pub fn from_buffer(table: &SyncTable, buffer: Vec<Value>) -> CoreResult<Self> {
        let expected = table.columns().len() + 1;
        let state_ok = buffer
            .first()
            .and_then(Value::as_integer)
            .and_then(RowState::from_code)
            .is_some();
        if buffer.len() != expected || !state_ok {
            return Err(CoreError::InvalidRow {
                table: table.key().to_string(),
                expected,
                actual: buffer.len(),
            });
        }
        Ok(Self {
            table: table.key(),
            buffer,
        })
    }

    /// Key of the table this row belongs to.
    #[must_use]
    pub fn table(&self) -> &TableKey {
        &self.table
    }

    /// The row state.
    #[must_use]
    pub fn state(&self) -> RowState {
        self.buffer
            .first()
            .and_then(Value::as_integer)
            .and_then(RowState::from_code)
            .unwrap_or(RowState::Unchanged)
    }

    /// Sets the row state.
    pub fn set_state(&mut self, state: RowState) {
        self.buffer[0] = Value::Integer(state.to_code());
    }

    /// Returns the value at a column ordinal.
    #[must_use]
    pub fn value(&self, ordinal: usize) -> Option<&Value> {
        self.buffer.get(ordinal + 1)
    }

    /// Sets the value at a column ordinal.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the ordinal is out of range.
    pub fn set_value(&mut self, ordinal: usize, value: impl Into<Value>) -> CoreResult<()> {
        let slot = self.buffer.get_mut(ordinal + 1).ok_or_else(|| {
            CoreError::invalid_operation(format!("ordinal {ordinal} out of range"))
        })?;
        *slot = value.into();
        Ok(())
    }

    /// Returns the value of a named column.
    ///
    /// # Errors
    ///
    /// Returns `ColumnNotFound` if the table has no such column.
    pub fn get(&self, table: &SyncTable, column: &str) -> CoreResult<&Value> {
        let ordinal = table.ordinal(column)?;
        self.value(ordinal)
            .ok_or_else(|| CoreError::column_not_found(table.key().to_string(), column))
    }

    /// Sets the value of a named column.
    ///
    /// # Errors
    ///
    /// Returns `ColumnNotFound` if the table has no such column.
    pub fn set(&mut self, table: &SyncTable, column: &str, value: impl Into<Value>) -> CoreResult<()> {
        let ordinal = table.ordinal(column)?;
        self.set_value(ordinal, value)
    }

    /// Column values without the state slot.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.buffer[1..]
    }

    /// The raw buffer, state slot included.
    #[must_use]
    pub fn buffer(&self) -> &[Value] {
        &self.buffer
    }

    /// Consumes the row, returning its raw buffer.
    #[must_use]
    pub fn into_buffer(self) -> Vec<Value> {
        self.buffer
    }

    /// Extracts the primary key values in column order.
    ///
    /// # Errors
    ///
    /// Returns `PrimaryKeyMissing` if the table has no primary key.
    pub fn primary_key(&self, table: &SyncTable) -> CoreResult<Vec<Value>> {
        let key: Vec<Value> = table
            .primary_key_columns()
            .filter_map(|c| self.value(c.ordinal).cloned())
            .collect();
        if key.is_empty() {
            return Err(CoreError::PrimaryKeyMissing {
                table: table.key().to_string(),
            });
        }
        Ok(key)
    }

    /// Copies values into `target`'s layout, matching columns by name.
    ///
    /// Columns `target` has but this row's table lacks are taken from
    /// `fallback` when given, and are NULL otherwise.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRow` if `fallback` does not belong to `target`.
    pub fn project(
        &self,
        source: &SyncTable,
        target: &SyncTable,
        fallback: Option<&SyncRow>,
    ) -> CoreResult<SyncRow> {
        let mut buffer = Vec::with_capacity(target.columns().len() + 1);
        buffer.push(Value::Integer(self.state().to_code()));
        for column in target.columns() {
            let value = match source.ordinal(&column.name) {
                Ok(ordinal) => self.value(ordinal).cloned().unwrap_or(Value::Null),
                Err(_) => fallback
                    .and_then(|f| f.value(column.ordinal).cloned())
                    .unwrap_or(Value::Null),
            };
            buffer.push(value);
        }
        SyncRow::from_buffer(target, buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, SyncColumn};
    use proptest::prelude::*;

    fn table(columns: usize) -> SyncTable {
        let mut t = SyncTable::new("T");
        for i in 0..columns {
            t.add_column(SyncColumn::new(format!("c{i}"), DataType::Integer))
                .unwrap();
        }
        if columns > 0 {
            t.set_primary_keys(["c0"]).unwrap();
        }
        t
    }

    #[test]
    fn named_access() {
        let t = table(3);
        let mut row = SyncRow::new(&t);
        row.set(&t, "C1", 42i64).unwrap();
        assert_eq!(row.get(&t, "c1").unwrap(), &Value::Integer(42));
        assert!(matches!(
            row.get(&t, "c9"),
            Err(CoreError::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn state_slot() {
        let t = table(2);
        let mut row = SyncRow::new(&t);
        assert_eq!(row.state(), RowState::Added);
        row.set_state(RowState::Deleted);
        assert_eq!(row.state(), RowState::Deleted);
        assert_eq!(row.buffer()[0], Value::Integer(8));
    }

    #[test]
    fn wrong_length_rejected() {
        let t = table(2);
        let err = SyncRow::from_values(&t, RowState::Modified, vec![Value::Integer(1)]);
        assert!(matches!(
            err,
            Err(CoreError::InvalidRow {
                expected: 3,
                actual: 2,
                ..
            })
        ));
        let bad_state = SyncRow::from_buffer(&t, vec![Value::Integer(3), Value::Null, Value::Null]);
        assert!(bad_state.is_err());
    }

    #[test]
    fn primary_key_extraction() {
        let t = table(3);
        let row = SyncRow::from_values(
            &t,
            RowState::Modified,
            vec![Value::Integer(7), Value::Integer(8), Value::Integer(9)],
        )
        .unwrap();
        assert_eq!(row.primary_key(&t).unwrap(), vec![Value::Integer(7)]);
        let keyless = SyncTable::new("K");
        assert!(SyncRow::new(&keyless).primary_key(&keyless).is_err());
    }

    #[test]
    fn projection_by_name() {
        let full = table(3);
        let narrow = {
            let mut t = SyncTable::new("T");
            t.add_column(SyncColumn::new("c2", DataType::Integer)).unwrap();
            t.add_column(SyncColumn::new("c0", DataType::Integer)).unwrap();
            t
        };
        let row = SyncRow::from_values(
            &narrow,
            RowState::Modified,
            vec![Value::Integer(2), Value::Integer(0)],
        )
        .unwrap();
        let existing = SyncRow::from_values(
            &full,
            RowState::Unchanged,
            vec![Value::Integer(0), Value::Integer(11), Value::Integer(22)],
        )
        .unwrap();
        let projected = row.project(&narrow, &full, Some(&existing)).unwrap();
        assert_eq!(
            projected.values(),
            &[Value::Integer(0), Value::Integer(11), Value::Integer(2)]
        );
        assert_eq!(projected.state(), RowState::Modified);
    }

    proptest! {
        #[test]
        fn buffer_length_tracks_columns(columns in 0usize..24) {
            let t = table(columns);
            let row = SyncRow::new(&t);
            prop_assert_eq!(row.buffer().len(), t.columns().len() + 1);
            prop_assert_eq!(row.values().len(), columns);
        }
    }
}
