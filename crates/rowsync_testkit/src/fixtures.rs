//! Test fixtures and store helpers.
//!
//! Provides a small two-table schema, memory stores seeded with it, and
//! temporary directories for disk-backed batches and snapshots.

use rowsync_codec::Value;
use rowsync_core::{
    DataType, MemoryProvider, SyncColumn, SyncRelation, SyncSet, SyncSetup, SyncTable,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Name of the customer table of the sample schema.
pub const CUSTOMER: &str = "Customer";
/// Name of the order table of the sample schema.
pub const ORDER: &str = "Order";

/// The sample schema: `Customer(Id, Name, Photo)` and
/// `Order(Id, CustomerId, Amount, PlacedAt)`, orders referencing customers.
pub fn sample_schema() -> SyncSet {
    let mut customer = SyncTable::new(CUSTOMER);
    customer
        .add_column(SyncColumn::new("Id", DataType::Integer))
        .expect("Failed to add column");
    customer
        .add_column(SyncColumn::new("Name", DataType::Text).nullable(true))
        .expect("Failed to add column");
    customer
        .add_column(SyncColumn::new("Photo", DataType::Bytes).nullable(true))
        .expect("Failed to add column");
    customer
        .set_primary_keys(["Id"])
        .expect("Failed to set primary key");

    let mut order = SyncTable::new(ORDER);
    order
        .add_column(SyncColumn::new("Id", DataType::Integer))
        .expect("Failed to add column");
    order
        .add_column(SyncColumn::new("CustomerId", DataType::Integer))
        .expect("Failed to add column");
    order
        .add_column(SyncColumn::new("Amount", DataType::Float).nullable(true))
        .expect("Failed to add column");
    order
        .add_column(SyncColumn::new("PlacedAt", DataType::DateTime).nullable(true))
        .expect("Failed to add column");
    order
        .set_primary_keys(["Id"])
        .expect("Failed to set primary key");

    let mut set = SyncSet::new()
        .with_table(customer.clone())
        .and_then(|s| s.with_table(order.clone()))
        .expect("Failed to build schema");
    set.relations.push(SyncRelation::new(
        "FK_Order_Customer",
        customer.key(),
        "Id",
        order.key(),
        "CustomerId",
    ));
    set
}

/// The setup selecting both sample tables.
pub fn sample_setup() -> SyncSetup {
    SyncSetup::new([CUSTOMER, ORDER])
}

/// Values of a customer row.
pub fn customer(id: i64, name: &str) -> Vec<Value> {
    vec![Value::Integer(id), Value::Text(name.to_string()), Value::Null]
}

/// Values of an order row.
pub fn order(id: i64, customer_id: i64, amount: f64) -> Vec<Value> {
    vec![
        Value::Integer(id),
        Value::Integer(customer_id),
        Value::Float(amount),
        Value::Integer(1_700_000_000_000 + id),
    ]
}

/// A store with the sample schema and no rows.
pub fn empty_store(name: &str) -> Arc<MemoryProvider> {
    Arc::new(MemoryProvider::with_schema(name, &sample_schema()).expect("Failed to provision store"))
}

/// A store with `customers` customers, each with one order.
pub fn seeded_server(name: &str, customers: usize) -> Arc<MemoryProvider> {
    let store = empty_store(name);
    for i in 1..=customers as i64 {
        store
            .upsert(CUSTOMER, customer(i, &format!("customer {i}")))
            .expect("Failed to insert customer");
        store
            .upsert(ORDER, order(i, i, i as f64 * 10.5))
            .expect("Failed to insert order");
    }
    store
}

/// A store with no schema, as a client before its first sync.
pub fn blank_client(name: &str) -> Arc<MemoryProvider> {
    Arc::new(MemoryProvider::new(name))
}

/// Temporary directories for one test, removed on drop.
pub struct TestDirs {
    batches: TempDir,
    snapshots: TempDir,
}

impl TestDirs {
    /// Creates fresh directories.
    pub fn new() -> Self {
        Self {
            batches: TempDir::new().expect("Failed to create temp directory"),
            snapshots: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Root for disk-backed batches.
    pub fn batches(&self) -> &Path {
        self.batches.path()
    }

    /// Root for snapshots.
    pub fn snapshots(&self) -> &Path {
        self.snapshots.path()
    }

    /// Number of entries left under the batch root.
    pub fn leftover_batches(&self) -> usize {
        std::fs::read_dir(self.batches())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

impl Default for TestDirs {
    fn default() -> Self {
        Self::new()
    }
}

/// Live rows of a table, as raw value lists in primary key order.
pub fn table_values(store: &MemoryProvider, table: &str) -> Vec<Vec<Value>> {
    store
        .rows(table)
        .expect("Failed to read rows")
        .into_iter()
        .map(|row| row.values().to_vec())
        .collect()
}

/// Asserts that two stores hold the same live rows in `table`.
pub fn assert_same_rows(left: &MemoryProvider, right: &MemoryProvider, table: &str) {
    assert_eq!(
        table_values(left, table),
        table_values(right, table),
        "stores differ on table {table}"
    );
}
