//! Property-based test generators using proptest.
//!
//! Provides strategies for generating schemas and rows that respect the
//! invariants of the row model: one value per column, values accepted by
//! their column type, unique primary keys.

use proptest::prelude::*;
use rowsync_codec::Value;
use rowsync_core::{DataType, RowState, SyncColumn, SyncRow, SyncTable};

/// Strategy for generating identifier names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating a column type.
pub fn data_type_strategy() -> impl Strategy<Value = DataType> {
    prop_oneof![
        Just(DataType::Boolean),
        Just(DataType::Integer),
        Just(DataType::Float),
        Just(DataType::Text),
        Just(DataType::Bytes),
        Just(DataType::DateTime),
        Just(DataType::Guid),
    ]
}

/// Strategy for generating a non-null value accepted by `data_type`.
pub fn value_strategy(data_type: DataType) -> BoxedStrategy<Value> {
    match data_type {
        DataType::Boolean => any::<bool>().prop_map(Value::Bool).boxed(),
        DataType::Integer => any::<i64>().prop_map(Value::Integer).boxed(),
        DataType::DateTime => (0i64..4_102_444_800_000).prop_map(Value::Integer).boxed(),
        DataType::Float => (-1.0e9f64..1.0e9).prop_map(Value::Float).boxed(),
        DataType::Text => "[ -~]{0,32}".prop_map(Value::Text).boxed(),
        DataType::Guid => any::<u128>()
            .prop_map(|n| Value::Text(format!("{n:032x}")))
            .boxed(),
        DataType::Bytes => prop::collection::vec(any::<u8>(), 0..64)
            .prop_map(Value::Bytes)
            .boxed(),
    }
}

/// Strategy for generating a value, null allowed when `nullable`.
pub fn cell_strategy(data_type: DataType, nullable: bool) -> BoxedStrategy<Value> {
    if nullable {
        prop_oneof![1 => Just(Value::Null), 4 => value_strategy(data_type)].boxed()
    } else {
        value_strategy(data_type)
    }
}

/// Strategy for generating a table with an integer primary key `Id` and
/// one to `max_columns` further nullable columns with distinct names.
pub fn table_strategy(max_columns: usize) -> impl Strategy<Value = SyncTable> {
    (
        name_strategy(),
        prop::collection::btree_map(name_strategy(), data_type_strategy(), 1..=max_columns.max(1)),
    )
        .prop_map(|(name, columns)| {
            let mut table = SyncTable::new(name);
            table
                .add_column(SyncColumn::new("Id", DataType::Integer))
                .expect("Failed to add column");
            for (column, data_type) in columns {
                if column.eq_ignore_ascii_case("Id") {
                    continue;
                }
                // Case-insensitive duplicates are rejected; skip them.
                let _ = table.add_column(SyncColumn::new(column, data_type).nullable(true));
            }
            table
                .set_primary_keys(["Id"])
                .expect("Failed to set primary key");
            table
        })
}

/// Strategy for generating the values of one row of `table` with the
/// given primary key.
pub fn row_values_strategy(table: &SyncTable, id: i64) -> BoxedStrategy<Vec<Value>> {
    let cells: Vec<BoxedStrategy<Value>> = table
        .columns()
        .iter()
        .map(|c| {
            if table.is_primary_key(&c.name) {
                Just(Value::Integer(id)).boxed()
            } else {
                cell_strategy(c.data_type, c.allow_null)
            }
        })
        .collect();
    cells.boxed()
}

/// Strategy for generating `1..max_rows` rows of `table` with distinct
/// primary keys, in key order.
pub fn rows_strategy(table: SyncTable, max_rows: usize) -> impl Strategy<Value = Vec<SyncRow>> {
    prop::collection::btree_set(0i64..10_000, 1..max_rows.max(2)).prop_flat_map(move |ids| {
        let table = table.clone();
        let rows: Vec<_> = ids
            .into_iter()
            .map(|id| row_values_strategy(&table, id))
            .collect();
        rows.prop_map(move |all| {
            all.into_iter()
                .map(|values| {
                    SyncRow::from_values(&table, RowState::Modified, values)
                        .expect("Generated row should fit its table")
                })
                .collect()
        })
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_core::{ContainerTable, NamedItem};

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn values_fit_their_type(
            (data_type, value) in data_type_strategy().prop_flat_map(|t| (Just(t), value_strategy(t)))
        ) {
            prop_assert!(data_type.accepts(&value));
            prop_assert!(!value.is_null());
        }

        #[test]
        fn row_buffer_has_state_slot(
            (table, rows) in table_strategy(6).prop_flat_map(|t| (Just(t.clone()), rows_strategy(t, 8)))
        ) {
            for row in &rows {
                prop_assert_eq!(row.buffer().len(), table.columns().len() + 1);
                prop_assert_eq!(row.values().len(), table.columns().len());
            }
        }

        #[test]
        fn container_table_keeps_rows(
            (table, rows) in table_strategy(4).prop_flat_map(|t| (Just(t.clone()), rows_strategy(t, 16)))
        ) {
            let container = ContainerTable::from_rows(&table.key(), &rows);
            let back = container.to_rows(&table).unwrap();
            prop_assert_eq!(back.len(), rows.len());
            prop_assert_eq!(back, rows);
        }

        #[test]
        fn properties_equality_implies_name_equality(a in table_strategy(4), b in table_strategy(4)) {
            if a.equals_by_properties(&b) {
                prop_assert!(a.equals_by_name(&b));
            }
            prop_assert!(a.equals_by_properties(&a.clone()));
        }
    }
}
