//! The contract between the orchestrators and a concrete data store.

mod memory;

pub use memory::MemoryProvider;

use crate::error::CoreResult;
use crate::migration::MigrationPlan;
use crate::row::SyncRow;
use crate::schema::{SyncSet, SyncSetup, SyncTable};
use crate::scope::ScopeInfo;
use rowsync_codec::Value;
use uuid::Uuid;

/// A stored row with its change tracking metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedRow {
    /// The row, `Deleted` for tombstones.
    pub row: SyncRow,
    /// Store timestamp of the last change.
    pub timestamp: i64,
    /// Scope id of the peer the change came from; `None` for local writes.
    pub origin: Option<Uuid>,
}

/// A data store the orchestrators synchronize.
///
/// Every row passed in or out is interpreted against the `table` argument,
/// which may be a sanitized projection of the stored table; implementations
/// match columns by name. Timestamps are store-local and strictly increase
/// with every successful write.
pub trait CoreProvider: Send + Sync {
    /// Identity of the store, used in error reports.
    fn data_source(&self) -> String;

    /// Reads the schema of the tables listed by `setup` (all when empty).
    fn get_schema(&self, setup: &SyncSetup) -> CoreResult<SyncSet>;

    /// Creates missing tables of `schema`.
    fn provision(&self, schema: &SyncSet) -> CoreResult<()>;

    /// Applies a non-destructive migration towards `schema`.
    fn migrate(&self, plan: &MigrationPlan, schema: &SyncSet) -> CoreResult<()>;

    /// Removes every row and tombstone of a table.
    fn reset_table(&self, table: &SyncTable) -> CoreResult<()>;

    /// Current store timestamp.
    fn local_timestamp(&self) -> CoreResult<i64>;

    /// Loads scope metadata.
    fn load_scope(&self, name: &str) -> CoreResult<Option<ScopeInfo>>;

    /// Persists scope metadata.
    fn save_scope(&self, scope: &ScopeInfo) -> CoreResult<()>;

    /// Rows changed after `since` (all live rows when `None`), skipping rows
    /// whose origin is `exclude_origin`.
    fn get_changes(
        &self,
        table: &SyncTable,
        since: Option<i64>,
        exclude_origin: Option<Uuid>,
    ) -> CoreResult<Vec<SyncRow>>;

    /// Number of rows [`get_changes`](Self::get_changes) would return.
    fn estimated_change_count(
        &self,
        table: &SyncTable,
        since: Option<i64>,
        exclude_origin: Option<Uuid>,
    ) -> CoreResult<u64> {
        self.get_changes(table, since, exclude_origin)
            .map(|rows| rows.len() as u64)
    }

    /// Looks a row up by primary key, tombstones included.
    fn get_tracked_row(&self, table: &SyncTable, primary_key: &[Value]) -> CoreResult<Option<TrackedRow>>;

    /// Writes one row (upsert, or tombstone when `Deleted`), stamping it
    /// with a new timestamp and `origin`.
    ///
    /// Returns `RowRejected` for a row the store refuses.
    fn apply_row(&self, table: &SyncTable, row: &SyncRow, origin: Option<Uuid>) -> CoreResult<()>;
}
