//! In-memory provider.

use super::{CoreProvider, TrackedRow};
use crate::error::{CoreError, CoreResult};
use crate::migration::MigrationPlan;
use crate::row::{RowState, SyncRow};
use crate::schema::{SyncSet, SyncSetup, SyncTable, TableKey};
use crate::scope::ScopeInfo;
use parking_lot::RwLock;
use rowsync_codec::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use uuid::Uuid;

type RowMap = BTreeMap<Vec<Value>, TrackedRow>;

#[derive(Debug, Default)]
struct MemoryState {
    clock: i64,
    schema: SyncSet,
    rows: HashMap<TableKey, RowMap>,
    scopes: HashMap<String, ScopeInfo>,
}

impl MemoryState {
    fn stored(&self, key: &TableKey) -> CoreResult<(SyncTable, TableKey)> {
        let table = self.schema.resolve(key)?;
        Ok((table.clone(), table.key()))
    }

    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }
}

/// A thread-safe, in-memory [`CoreProvider`].
///
/// Rows live in ordered maps keyed by primary key, each stamped with the
/// store timestamp and origin of its last change. Deletes leave tombstones
/// so that they can be synchronized.
#[derive(Debug)]
pub struct MemoryProvider {
    name: String,
    state: RwLock<MemoryState>,
}

impl MemoryProvider {
    /// Creates an empty store.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Creates a store with `schema` provisioned.
    ///
    /// # Errors
    ///
    /// Returns an error if provisioning fails.
    pub fn with_schema(name: impl Into<String>, schema: &SyncSet) -> CoreResult<Self> {
        let provider = Self::new(name);
        provider.provision(schema)?;
        Ok(provider)
    }

    /// Inserts or updates a row as a local, untracked-origin write.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound`, `InvalidRow` or `RowRejected`.
    pub fn upsert(&self, table: &str, values: Vec<Value>) -> CoreResult<()> {
        let stored = self.table_named(table)?;
        let row = SyncRow::from_values(&stored, RowState::Modified, values)?;
        self.apply_row(&stored, &row, None)
    }

    /// Deletes a row by primary key as a local write.
    ///
    /// Returns false if no live row had that key.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` or `PrimaryKeyMissing`.
    pub fn delete(&self, table: &str, primary_key: Vec<Value>) -> CoreResult<bool> {
        let stored = self.table_named(table)?;
        let Some(existing) = self.get_tracked_row(&stored, &primary_key)? else {
            return Ok(false);
        };
        if existing.row.state() == RowState::Deleted {
            return Ok(false);
        }
        let mut row = existing.row;
        row.set_state(RowState::Deleted);
        self.apply_row(&stored, &row, None)?;
        Ok(true)
    }

    /// Live rows of a table in primary key order.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound`.
    pub fn rows(&self, table: &str) -> CoreResult<Vec<SyncRow>> {
        let stored = self.table_named(table)?;
        let state = self.state.read();
        Ok(state
            .rows
            .get(&stored.key())
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|t| t.row.state() != RowState::Deleted)
            .map(|t| t.row.clone())
            .collect())
    }

    /// A live row by primary key.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound`.
    pub fn row(&self, table: &str, primary_key: Vec<Value>) -> CoreResult<Option<SyncRow>> {
        let stored = self.table_named(table)?;
        Ok(self
            .get_tracked_row(&stored, &primary_key)?
            .map(|t| t.row)
            .filter(|r| r.state() != RowState::Deleted))
    }

    /// Number of live rows in a table.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound`.
    pub fn row_count(&self, table: &str) -> CoreResult<usize> {
        self.rows(table).map(|r| r.len())
    }

    /// The stored definition of a table, looked up by name or `schema.name`.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound`.
    pub fn table_named(&self, name: &str) -> CoreResult<SyncTable> {
        let state = self.state.read();
        let cmp = state.schema.comparison;
        state
            .schema
            .tables()
            .iter()
            .find(|t| cmp.equals(&t.table_name, name) || cmp.equals(&t.key().to_string(), name))
            .cloned()
            .ok_or_else(|| CoreError::table_not_found(name))
    }
}

/// Primary key of `row` (laid out by `source`) in `stored` key order.
fn stored_key(stored: &SyncTable, source: &SyncTable, row: &SyncRow) -> CoreResult<Vec<Value>> {
    let key: Vec<Value> = stored
        .primary_key_columns()
        .map(|c| row.get(source, &c.name).cloned())
        .collect::<CoreResult<_>>()?;
    if key.is_empty() {
        return Err(CoreError::PrimaryKeyMissing {
            table: stored.key().to_string(),
        });
    }
    Ok(key)
}

fn validate(stored: &SyncTable, row: &SyncRow) -> CoreResult<()> {
    for column in stored.columns() {
        let value = row.value(column.ordinal).unwrap_or(&Value::Null);
        if value.is_null() && !column.allow_null && !column.is_auto_increment {
            return Err(CoreError::row_rejected(
                stored.key().to_string(),
                format!("column {} does not allow NULL", column.name),
            ));
        }
        if !column.data_type.accepts(value) {
            return Err(CoreError::row_rejected(
                stored.key().to_string(),
                format!("column {} expects {:?}, got {value}", column.name, column.data_type),
            ));
        }
    }
    Ok(())
}

impl CoreProvider for MemoryProvider {
    fn data_source(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn get_schema(&self, setup: &SyncSetup) -> CoreResult<SyncSet> {
        self.state.read().schema.project(setup)
    }

    fn provision(&self, schema: &SyncSet) -> CoreResult<()> {
        let mut state = self.state.write();
        state.schema.comparison = schema.comparison;
        for table in schema.tables() {
            if state.schema.table_by_key(&table.key()).is_none() {
                debug!(provider = %self.name, table = %table.key(), "provisioning table");
                state.schema.add_table(table.clone())?;
                state.rows.insert(table.key(), RowMap::new());
            }
        }
        for relation in &schema.relations {
            if !state.schema.relations.contains(relation) {
                state.schema.relations.push(relation.clone());
            }
        }
        for filter in &schema.filters {
            if !state.schema.filters.contains(filter) {
                state.schema.filters.push(filter.clone());
            }
        }
        Ok(())
    }

    fn migrate(&self, plan: &MigrationPlan, schema: &SyncSet) -> CoreResult<()> {
        let mut state = self.state.write();
        for table in &plan.added_tables {
            if state.schema.table_by_key(&table.key()).is_none() {
                state.schema.add_table(table.clone())?;
                state.rows.insert(table.key(), RowMap::new());
            }
        }

        let mut touched: Vec<TableKey> = plan
            .added_columns
            .iter()
            .chain(&plan.altered_columns)
            .map(|c| c.table.clone())
            .chain(plan.primary_key_changes.iter().cloned())
            .collect();
        touched.sort();
        touched.dedup();

        for key in touched {
            let target = schema.resolve(&key)?;
            let (old, stored_key_name) = state.stored(&key)?;

            let mut merged = SyncTable::with_schema(&old.table_name, &old.schema_name);
            for column in old.columns() {
                let definition = target.column(&column.name).unwrap_or(column);
                merged.add_column(definition.clone())?;
            }
            for column in target.columns() {
                if old.column(&column.name).is_err() {
                    merged.add_column(column.clone())?;
                }
            }
            merged.set_primary_keys(target.primary_keys().iter().cloned())?;

            let rows = state.rows.remove(&stored_key_name).unwrap_or_default();
            let mut remapped = RowMap::new();
            for tracked in rows.into_values() {
                let row = tracked.row.project(&old, &merged, None)?;
                let pk = stored_key(&merged, &merged, &row)?;
                remapped.insert(
                    pk,
                    TrackedRow {
                        row,
                        timestamp: tracked.timestamp,
                        origin: tracked.origin,
                    },
                );
            }
            state.rows.insert(stored_key_name.clone(), remapped);
            if let Some(slot) = state.schema.table_by_key_mut(&stored_key_name) {
                *slot = merged;
            }
            debug!(provider = %self.name, table = %stored_key_name, "migrated table");
        }
        Ok(())
    }

    fn reset_table(&self, table: &SyncTable) -> CoreResult<()> {
        let mut state = self.state.write();
        let (_, key) = state.stored(&table.key())?;
        state.rows.insert(key, RowMap::new());
        Ok(())
    }

    fn local_timestamp(&self) -> CoreResult<i64> {
        Ok(self.state.read().clock)
    }

    fn load_scope(&self, name: &str) -> CoreResult<Option<ScopeInfo>> {
        Ok(self.state.read().scopes.get(name).cloned())
    }

    fn save_scope(&self, scope: &ScopeInfo) -> CoreResult<()> {
        let mut stored = scope.clone();
        stored.is_new = false;
        self.state.write().scopes.insert(scope.name.clone(), stored);
        Ok(())
    }

    fn get_changes(
        &self,
        table: &SyncTable,
        since: Option<i64>,
        exclude_origin: Option<Uuid>,
    ) -> CoreResult<Vec<SyncRow>> {
        let state = self.state.read();
        let (stored, key) = state.stored(&table.key())?;
        let Some(rows) = state.rows.get(&key) else {
            return Ok(Vec::new());
        };
        rows.values()
            .filter(|t| match since {
                Some(since) => t.timestamp > since,
                None => t.row.state() != RowState::Deleted,
            })
            .filter(|t| exclude_origin.is_none() || t.origin != exclude_origin)
            .map(|t| t.row.project(&stored, table, None))
            .collect()
    }

    fn get_tracked_row(&self, table: &SyncTable, primary_key: &[Value]) -> CoreResult<Option<TrackedRow>> {
        let state = self.state.read();
        let (stored, key) = state.stored(&table.key())?;
        let source_pk: Vec<&str> = table.primary_key_columns().map(|c| c.name.as_str()).collect();
        let cmp = state.schema.comparison;
        let lookup: Vec<Value> = stored
            .primary_key_columns()
            .filter_map(|c| {
                source_pk
                    .iter()
                    .position(|n| cmp.equals(n, &c.name))
                    .and_then(|i| primary_key.get(i).cloned())
            })
            .collect();
        let Some(tracked) = state.rows.get(&key).and_then(|rows| rows.get(&lookup)) else {
            return Ok(None);
        };
        Ok(Some(TrackedRow {
            row: tracked.row.project(&stored, table, None)?,
            timestamp: tracked.timestamp,
            origin: tracked.origin,
        }))
    }

    fn apply_row(&self, table: &SyncTable, row: &SyncRow, origin: Option<Uuid>) -> CoreResult<()> {
        let mut state = self.state.write();
        let (stored, key) = state.stored(&table.key())?;
        let pk = stored_key(&stored, table, row)?;
        let existing = state.rows.get(&key).and_then(|rows| rows.get(&pk)).cloned();

        let mut merged = row.project(table, &stored, existing.as_ref().map(|t| &t.row))?;
        if row.state() == RowState::Deleted {
            merged.set_state(RowState::Deleted);
        } else {
            validate(&stored, &merged)?;
            let was_live = existing
                .as_ref()
                .is_some_and(|t| t.row.state() != RowState::Deleted);
            merged.set_state(if was_live {
                RowState::Modified
            } else {
                RowState::Added
            });
        }

        let timestamp = state.tick();
        state.rows.entry(key).or_default().insert(
            pk,
            TrackedRow {
                row: merged,
                timestamp,
                origin,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, SyncColumn};

    fn schema() -> SyncSet {
        let mut t = SyncTable::new("Customer");
        t.add_column(SyncColumn::new("Id", DataType::Integer).nullable(false))
            .unwrap();
        t.add_column(SyncColumn::new("Name", DataType::Text).nullable(false))
            .unwrap();
        t.add_column(SyncColumn::new("Stamp", DataType::Integer).computed())
            .unwrap();
        t.set_primary_keys(["Id"]).unwrap();
        SyncSet::new().with_table(t).unwrap()
    }

    fn customer(id: i64, name: &str) -> Vec<Value> {
        vec![Value::Integer(id), Value::Text(name.into()), Value::Null]
    }

    #[test]
    fn local_writes_are_tracked() {
        let p = MemoryProvider::with_schema("client", &schema()).unwrap();
        p.upsert("Customer", customer(1, "Ada")).unwrap();
        p.upsert("Customer", customer(2, "Bob")).unwrap();
        assert_eq!(p.local_timestamp().unwrap(), 2);
        assert_eq!(p.row_count("customer").unwrap(), 2);

        let table = p.table_named("Customer").unwrap();
        let tracked = p
            .get_tracked_row(&table, &[Value::Integer(1)])
            .unwrap()
            .unwrap();
        assert_eq!(tracked.timestamp, 1);
        assert_eq!(tracked.origin, None);
        assert_eq!(tracked.row.state(), RowState::Added);
    }

    #[test]
    fn changes_since_and_origin_exclusion() {
        let p = MemoryProvider::with_schema("server", &schema()).unwrap();
        let table = p.table_named("Customer").unwrap();
        let peer = Uuid::new_v4();
        p.upsert("Customer", customer(1, "Ada")).unwrap();
        let row = SyncRow::from_values(&table, RowState::Modified, customer(2, "Bob")).unwrap();
        p.apply_row(&table, &row, Some(peer)).unwrap();

        assert_eq!(p.get_changes(&table, None, None).unwrap().len(), 2);
        assert_eq!(p.get_changes(&table, Some(1), None).unwrap().len(), 1);
        assert_eq!(p.get_changes(&table, None, Some(peer)).unwrap().len(), 1);
        assert_eq!(p.estimated_change_count(&table, Some(0), Some(peer)).unwrap(), 1);
    }

    #[test]
    fn tombstones_are_synchronized_but_not_listed() {
        let p = MemoryProvider::with_schema("client", &schema()).unwrap();
        p.upsert("Customer", customer(1, "Ada")).unwrap();
        assert!(p.delete("Customer", vec![Value::Integer(1)]).unwrap());
        assert!(!p.delete("Customer", vec![Value::Integer(1)]).unwrap());
        assert_eq!(p.row_count("Customer").unwrap(), 0);

        let table = p.table_named("Customer").unwrap();
        let changes = p.get_changes(&table, Some(0), None).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].state(), RowState::Deleted);
        assert!(p.get_changes(&table, None, None).unwrap().is_empty());
    }

    #[test]
    fn sanitized_rows_merge_by_name() {
        let p = MemoryProvider::with_schema("client", &schema()).unwrap();
        p.upsert("Customer", vec![Value::Integer(1), Value::Text("Ada".into()), Value::Integer(77)])
            .unwrap();
        let sanitized = schema().sanitized();
        let narrow = sanitized.tables()[0].clone();
        assert_eq!(narrow.columns().len(), 2);

        let row = SyncRow::from_values(
            &narrow,
            RowState::Modified,
            vec![Value::Integer(1), Value::Text("Ada L.".into())],
        )
        .unwrap();
        p.apply_row(&narrow, &row, None).unwrap();

        let full = p.row("Customer", vec![Value::Integer(1)]).unwrap().unwrap();
        assert_eq!(full.values()[1], Value::Text("Ada L.".into()));
        assert_eq!(full.values()[2], Value::Integer(77));
        assert_eq!(full.state(), RowState::Modified);

        let changes = p.get_changes(&narrow, None, None).unwrap();
        assert_eq!(changes[0].values().len(), 2);
    }

    #[test]
    fn invalid_rows_are_rejected() {
        let p = MemoryProvider::with_schema("client", &schema()).unwrap();
        let err = p.upsert("Customer", vec![Value::Integer(1), Value::Null, Value::Null]);
        assert!(matches!(err, Err(CoreError::RowRejected { .. })));
        let err = p.upsert("Customer", vec![Value::Integer(1), Value::Integer(5), Value::Null]);
        assert!(matches!(err, Err(CoreError::RowRejected { .. })));
        assert!(matches!(
            p.upsert("Nope", customer(1, "x")),
            Err(CoreError::TableNotFound { .. })
        ));
    }

    #[test]
    fn migration_extends_existing_rows() {
        let p = MemoryProvider::with_schema("client", &schema()).unwrap();
        p.upsert("Customer", customer(1, "Ada")).unwrap();

        let old = p.get_schema(&SyncSetup::default()).unwrap();
        let mut new = old.clone();
        new.table_by_key_mut(&TableKey::new("Customer", ""))
            .unwrap()
            .add_column(SyncColumn::new("Email", DataType::Text))
            .unwrap();
        new.add_table({
            let mut t = SyncTable::new("Order");
            t.add_column(SyncColumn::new("Id", DataType::Integer)).unwrap();
            t.set_primary_keys(["Id"]).unwrap();
            t
        })
        .unwrap();

        let plan = MigrationPlan::between(&old, &new);
        p.migrate(&plan, &new).unwrap();

        let row = p.row("Customer", vec![Value::Integer(1)]).unwrap().unwrap();
        assert_eq!(row.values().len(), 4);
        assert_eq!(row.values()[3], Value::Null);
        assert_eq!(p.row_count("Order").unwrap(), 0);
        assert!(p.get_schema(&SyncSetup::default()).unwrap().equals_by_properties(&new));
    }

    #[test]
    fn scopes_persist() {
        let p = MemoryProvider::new("x");
        assert!(p.load_scope("default").unwrap().is_none());
        let scope = ScopeInfo::new("default", SyncSetup::default());
        p.save_scope(&scope).unwrap();
        let loaded = p.load_scope("default").unwrap().unwrap();
        assert!(!loaded.is_new);
        assert_eq!(loaded.id, scope.id);
    }
}
