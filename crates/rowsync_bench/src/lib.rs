//! Benchmark utilities.

#![warn(missing_docs)]

use rand::Rng;
use rowsync_codec::Value;
use rowsync_core::{
    ContainerSet, DataType, RowState, SyncColumn, SyncRow, SyncSet, SyncTable,
};

/// Name of the benchmark table.
pub const TABLE: &str = "Item";

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// The benchmark table: `Item(Id, Name, Score, Payload)`.
pub fn item_table() -> SyncTable {
    let mut table = SyncTable::new(TABLE);
    table
        .add_column(SyncColumn::new("Id", DataType::Integer))
        .expect("Failed to add column");
    table
        .add_column(SyncColumn::new("Name", DataType::Text).nullable(true))
        .expect("Failed to add column");
    table
        .add_column(SyncColumn::new("Score", DataType::Float).nullable(true))
        .expect("Failed to add column");
    table
        .add_column(SyncColumn::new("Payload", DataType::Bytes).nullable(true))
        .expect("Failed to add column");
    table
        .set_primary_keys(["Id"])
        .expect("Failed to set primary key");
    table
}

/// A schema holding only the benchmark table.
pub fn item_schema() -> SyncSet {
    SyncSet::new()
        .with_table(item_table())
        .expect("Failed to build schema")
}

/// Generate rows with random payloads of the specified size.
pub fn generate_rows(count: usize, payload_size: usize) -> Vec<SyncRow> {
    let table = item_table();
    let mut rng = rand::thread_rng();
    (0..count as i64)
        .map(|id| {
            let values = vec![
                Value::Integer(id),
                Value::Text(format!("item {id}")),
                Value::Float(rng.gen_range(0.0..100.0)),
                Value::Bytes(random_data(payload_size)),
            ];
            SyncRow::from_values(&table, RowState::Modified, values)
                .expect("Failed to build row")
        })
        .collect()
}

/// A batch part payload holding `rows`.
pub fn container(rows: &[SyncRow]) -> ContainerSet {
    let table = item_table();
    let mut set = ContainerSet::new();
    for row in rows {
        set.push(&table.key(), row.buffer().to_vec());
    }
    set
}
