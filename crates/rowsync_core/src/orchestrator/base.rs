//! Change capture and conflict-aware apply shared by both sides.

use crate::batch::{BatchBuilder, BatchInfo, BatchLimit};
use crate::changes::{DatabaseChangesApplied, DatabaseChangesSelected, TableChangesSelected};
use crate::conflict::{ConflictPolicy, ConflictResolution, ConflictType, SyncConflict};
use crate::context::{SyncContext, SyncStage};
use crate::error::{CoreError, CoreResult};
use crate::migration::MigrationPlan;
use crate::provider::{CoreProvider, TrackedRow};
use crate::row::{RowState, SyncRow};
use crate::schema::{SyncSet, SyncTable};
use rowsync_codec::SerializationFormat;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where and how batches are produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchOptions {
    /// Part capacity.
    pub limit: BatchLimit,
    /// Root for disk-backed batches; `None` keeps every batch in memory.
    pub directory: Option<PathBuf>,
    /// Codec of part files.
    pub format: SerializationFormat,
}

/// Result of a change capture.
#[derive(Debug, Clone)]
pub struct CapturedChanges {
    /// Store timestamp taken before selecting rows.
    pub timestamp: i64,
    /// The captured rows.
    pub batch: BatchInfo,
    /// Rows selected per table.
    pub selected: DatabaseChangesSelected,
}

/// Parameters of one apply call.
#[derive(Debug, Clone, Copy)]
pub struct ApplyOptions<'a> {
    /// Rows changed locally after this timestamp are candidates for conflict.
    /// `None` means every existing row is.
    pub last_timestamp: Option<i64>,
    /// Scope id of the peer that sent the rows; stamped as their origin.
    pub sender: Option<Uuid>,
    /// Policy from the applying store's point of view.
    pub policy: ConflictPolicy,
    /// Receives one entry per detected conflict.
    pub conflict_log: Option<&'a Sender<SyncConflict>>,
}

/// Drives one store through capture, apply, snapshot and migration.
#[derive(Debug)]
pub struct BaseOrchestrator<P: CoreProvider + ?Sized> {
    provider: Arc<P>,
    options: BatchOptions,
}

impl<P: CoreProvider + ?Sized> Clone for BaseOrchestrator<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            options: self.options.clone(),
        }
    }
}

impl<P: CoreProvider + ?Sized> BaseOrchestrator<P> {
    /// Creates an orchestrator over a provider.
    pub fn new(provider: Arc<P>, options: BatchOptions) -> Self {
        Self { provider, options }
    }

    /// The provider.
    #[must_use]
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Batch options.
    #[must_use]
    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Creates missing store structures for a schema.
    ///
    /// # Errors
    ///
    /// Returns the provider's error.
    pub fn provision(&self, ctx: &mut SyncContext, schema: &SyncSet) -> CoreResult<()> {
        ctx.set_stage(SyncStage::Provisioning);
        info!(session_id = %ctx.session_id, tables = schema.tables().len(), "provisioning");
        self.provider.provision(schema)
    }

    /// Removes all rows of every table of a schema.
    ///
    /// # Errors
    ///
    /// Returns the provider's error.
    pub fn reset_tables(&self, schema: &SyncSet) -> CoreResult<()> {
        schema
            .tables()
            .iter()
            .try_for_each(|t| self.provider.reset_table(t))
    }

    /// Reconciles a structural mismatch without dropping anything.
    ///
    /// # Errors
    ///
    /// Returns the provider's error.
    pub fn migrate(&self, ctx: &mut SyncContext, old: &SyncSet, new: &SyncSet) -> CoreResult<MigrationPlan> {
        ctx.set_stage(SyncStage::Migrating);
        let plan = MigrationPlan::between(old, new);
        if plan.is_empty() {
            debug!(session_id = %ctx.session_id, "schemas differ only in non-structural properties");
            return Ok(plan);
        }
        info!(
            session_id = %ctx.session_id,
            added_tables = plan.added_tables.len(),
            added_columns = plan.added_columns.len(),
            "migrating schema"
        );
        self.provider
            .migrate(&plan, new)
            .map_err(|e| CoreError::migration_failed(e.to_string()))?;
        Ok(plan)
    }

    /// Captures rows changed after `since` into a batch under the configured
    /// batch root.
    ///
    /// # Errors
    ///
    /// Returns the provider's error or a batch write error.
    pub fn get_changes(
        &self,
        ctx: &mut SyncContext,
        schema: &SyncSet,
        since: Option<i64>,
        exclude_origin: Option<Uuid>,
        label: &str,
    ) -> CoreResult<CapturedChanges> {
        let directory_name = format!("{}_{label}", ctx.session_id.simple());
        self.get_changes_into(
            ctx,
            schema,
            since,
            exclude_origin,
            self.options.directory.clone(),
            directory_name,
        )
    }

    /// Captures changes into an explicit batch location.
    ///
    /// # Errors
    ///
    /// Returns the provider's error or a batch write error.
    pub fn get_changes_into(
        &self,
        ctx: &mut SyncContext,
        schema: &SyncSet,
        since: Option<i64>,
        exclude_origin: Option<Uuid>,
        root: Option<PathBuf>,
        directory_name: String,
    ) -> CoreResult<CapturedChanges> {
        ctx.set_stage(SyncStage::ChangesSelecting);
        let sanitized = schema.sanitized();
        let timestamp = self.provider.local_timestamp()?;
        let mut builder = BatchBuilder::new(
            root,
            directory_name,
            sanitized.clone(),
            self.options.format,
            self.options.limit,
        );
        builder.set_timestamp(timestamp);

        let mut selected = DatabaseChangesSelected::default();
        for table in sanitized.tables() {
            let rows = self.provider.get_changes(table, since, exclude_origin)?;
            for row in rows {
                if !passes_filters(ctx, &sanitized, table, &row)? {
                    continue;
                }
                selected.record(&table.key(), row.state());
                builder.add_row(&row)?;
            }
        }
        let batch = builder.finish()?;
        info!(
            session_id = %ctx.session_id,
            since = ?since,
            rows = selected.total(),
            parts = batch.parts.len(),
            "changes selected"
        );
        Ok(CapturedChanges {
            timestamp,
            batch,
            selected,
        })
    }

    /// Counts rows [`get_changes`](Self::get_changes) would select.
    ///
    /// # Errors
    ///
    /// Returns the provider's error.
    pub fn estimated_changes(
        &self,
        schema: &SyncSet,
        since: Option<i64>,
        exclude_origin: Option<Uuid>,
    ) -> CoreResult<DatabaseChangesSelected> {
        let mut selected = DatabaseChangesSelected::default();
        for table in schema.sanitized().tables() {
            let upserts = self
                .provider
                .estimated_change_count(table, since, exclude_origin)?;
            selected.tables.push(TableChangesSelected {
                table: table.key(),
                upserts,
                deletes: 0,
            });
        }
        Ok(selected)
    }

    /// Applies a received batch.
    ///
    /// Deletes run first, table by table in reverse schema order; upserts
    /// follow in schema order. Each pass reads parts strictly by index.
    ///
    /// # Errors
    ///
    /// Returns a batch error (fatal for the session) or the provider's
    /// error. Rows the store rejects are counted as failed instead.
    pub fn apply_changes(
        &self,
        ctx: &mut SyncContext,
        batch: &BatchInfo,
        options: ApplyOptions<'_>,
    ) -> CoreResult<DatabaseChangesApplied> {
        ctx.set_stage(SyncStage::ChangesApplying);
        let mut applied = DatabaseChangesApplied::default();
        let tables = batch.sanitized_schema.tables();

        for table in tables.iter().rev() {
            for_each_row(batch, table, |row| {
                if row.state() == RowState::Deleted {
                    self.apply_one(table, &row, &options, &mut applied)?;
                }
                Ok(())
            })?;
        }
        for table in tables {
            for_each_row(batch, table, |row| {
                if row.state() != RowState::Deleted {
                    self.apply_one(table, &row, &options, &mut applied)?;
                }
                Ok(())
            })?;
        }

        info!(
            session_id = %ctx.session_id,
            applied = applied.total_applied(),
            conflicts = applied.total_resolved_conflicts(),
            failed = applied.total_failed(),
            policy = ?options.policy,
            "changes applied"
        );
        Ok(applied)
    }

    /// Bulk-loads a snapshot into an empty store, without conflict detection.
    ///
    /// # Errors
    ///
    /// Returns a batch error or the provider's error.
    pub fn apply_snapshot(
        &self,
        ctx: &mut SyncContext,
        batch: &BatchInfo,
        origin: Option<Uuid>,
    ) -> CoreResult<DatabaseChangesApplied> {
        ctx.set_stage(SyncStage::SnapshotApplying);
        let mut applied = DatabaseChangesApplied::default();
        for table in batch.sanitized_schema.tables() {
            for_each_row(batch, table, |row| {
                if row.state() == RowState::Deleted {
                    return Ok(());
                }
                let entry = applied.entry(&table.key(), RowState::Modified);
                match self.provider.apply_row(table, &row, origin) {
                    Ok(()) => entry.applied += 1,
                    Err(CoreError::RowRejected { message, .. }) => {
                        warn!(table = %table.key(), %message, "snapshot row rejected");
                        entry.failed += 1;
                    }
                    Err(e) => return Err(e),
                }
                Ok(())
            })?;
        }
        info!(session_id = %ctx.session_id, applied = applied.total_applied(), "snapshot applied");
        Ok(applied)
    }

    fn apply_one(
        &self,
        table: &SyncTable,
        row: &SyncRow,
        options: &ApplyOptions<'_>,
        applied: &mut DatabaseChangesApplied,
    ) -> CoreResult<()> {
        let state = if row.state() == RowState::Deleted {
            RowState::Deleted
        } else {
            RowState::Modified
        };
        let pk = row.primary_key(table)?;
        let local = self.provider.get_tracked_row(table, &pk)?;

        let Some(local) = local.filter(|l| is_conflict(l, options)) else {
            let rejected = self.write(table, row, options.sender)?;
            let entry = applied.entry(&table.key(), state);
            match rejected {
                None => entry.applied += 1,
                Some(message) => {
                    warn!(table = %table.key(), %message, "row rejected");
                    entry.failed += 1;
                }
            }
            return Ok(());
        };

        let conflict_type = ConflictType::classify(row.state(), local.row.state());
        let resolution = options.policy.resolve();
        debug!(table = %table.key(), ?conflict_type, ?resolution, "conflict");
        let error = match resolution {
            ConflictResolution::KeepLocal => None,
            ConflictResolution::AcceptRemote => self.write(table, row, options.sender)?,
        };

        let entry = applied.entry(&table.key(), state);
        entry.resolved_conflicts += 1;
        match (&error, resolution) {
            (Some(_), _) => entry.failed += 1,
            (None, ConflictResolution::AcceptRemote) => entry.applied += 1,
            (None, ConflictResolution::KeepLocal) => {}
        }

        if let Some(log) = options.conflict_log {
            // A dropped receiver only means nobody is listening.
            let _ = log.send(SyncConflict {
                table: table.key(),
                conflict_type,
                local_row: local.row,
                remote_row: row.clone(),
                resolution,
                error,
            });
        }
        Ok(())
    }

    /// Writes a row; a rejection comes back as its message.
    fn write(&self, table: &SyncTable, row: &SyncRow, origin: Option<Uuid>) -> CoreResult<Option<String>> {
        match self.provider.apply_row(table, row, origin) {
            Ok(()) => Ok(None),
            Err(CoreError::RowRejected { message, .. }) => Ok(Some(message)),
            Err(e) => Err(e),
        }
    }
}

fn is_conflict(local: &TrackedRow, options: &ApplyOptions<'_>) -> bool {
    let changed_since = options.last_timestamp.map_or(true, |t| local.timestamp > t);
    let foreign = local.origin.is_none() || local.origin != options.sender;
    changed_since && foreign
}

/// Calls `f` for each row of `table` in part index order, loading only
/// parts that hold the table.
fn for_each_row(
    batch: &BatchInfo,
    table: &SyncTable,
    mut f: impl FnMut(SyncRow) -> CoreResult<()>,
) -> CoreResult<()> {
    let key = table.key();
    let cmp = batch.sanitized_schema.comparison;
    for part in batch.parts_in_order() {
        if !part.tables.iter().any(|t| t.table.matches(&key, cmp)) {
            continue;
        }
        let container = batch.load_part(part.index)?;
        if let Some(rows) = container.table(&key, &batch.sanitized_schema) {
            for row in rows.to_rows(table)? {
                f(row)?;
            }
        }
    }
    Ok(())
}

fn passes_filters(ctx: &SyncContext, schema: &SyncSet, table: &SyncTable, row: &SyncRow) -> CoreResult<bool> {
    let key = table.key();
    for filter in schema.filters_for(&key) {
        let Some(expected) = ctx.additional_properties.get(&filter.parameter) else {
            continue;
        };
        if row.get(table, &filter.column)? != expected {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryProvider;
    use crate::schema::{DataType, SyncColumn, SyncFilter};
    use rowsync_codec::Value;
    use std::sync::mpsc;

    fn schema() -> SyncSet {
        let mut t = SyncTable::new("Note");
        t.add_column(SyncColumn::new("Id", DataType::Integer)).unwrap();
        t.add_column(SyncColumn::new("Body", DataType::Text).nullable(false))
            .unwrap();
        t.add_column(SyncColumn::new("Region", DataType::Text)).unwrap();
        t.set_primary_keys(["Id"]).unwrap();
        SyncSet::new().with_table(t).unwrap()
    }

    fn note(id: i64, body: &str) -> Vec<Value> {
        vec![Value::Integer(id), Value::Text(body.into()), Value::Text("eu".into())]
    }

    fn orchestrator(name: &str) -> BaseOrchestrator<MemoryProvider> {
        let provider = Arc::new(MemoryProvider::with_schema(name, &schema()).unwrap());
        BaseOrchestrator::new(
            provider,
            BatchOptions {
                limit: BatchLimit::Rows(2),
                ..BatchOptions::default()
            },
        )
    }

    fn body(o: &BaseOrchestrator<MemoryProvider>, id: i64) -> Value {
        o.provider()
            .row("Note", vec![Value::Integer(id)])
            .unwrap()
            .unwrap()
            .values()[1]
            .clone()
    }

    #[test]
    fn capture_splits_and_counts() {
        let source = orchestrator("source");
        for i in 0..5 {
            source.provider().upsert("Note", note(i, "x")).unwrap();
        }
        let mut ctx = SyncContext::new("default");
        let captured = source
            .get_changes(&mut ctx, &schema(), None, None, "up")
            .unwrap();
        assert_eq!(captured.selected.total(), 5);
        assert_eq!(captured.batch.parts.len(), 3);
        assert_eq!(captured.timestamp, 5);
        assert_eq!(ctx.stage, SyncStage::ChangesSelecting);

        let later = source
            .get_changes(&mut ctx, &schema(), Some(3), None, "up2")
            .unwrap();
        assert_eq!(later.selected.total(), 2);
    }

    #[test]
    fn filters_use_context_parameters() {
        let mut filtered = schema();
        let key = filtered.tables()[0].key();
        filtered.filters.push(SyncFilter::new(key, "Region", "region"));
        let source = orchestrator("source");
        source.provider().upsert("Note", note(1, "a")).unwrap();
        source
            .provider()
            .upsert(
                "Note",
                vec![Value::Integer(2), Value::Text("b".into()), Value::Text("us".into())],
            )
            .unwrap();

        let mut ctx = SyncContext::new("default");
        let all = source.get_changes(&mut ctx, &filtered, None, None, "a").unwrap();
        assert_eq!(all.selected.total(), 2);

        ctx.additional_properties
            .insert("region".into(), Value::Text("us".into()));
        let us = source.get_changes(&mut ctx, &filtered, None, None, "b").unwrap();
        assert_eq!(us.selected.total(), 1);
    }

    #[test]
    fn apply_without_conflicts() {
        let source = orchestrator("source");
        let target = orchestrator("target");
        for i in 0..3 {
            source.provider().upsert("Note", note(i, "s")).unwrap();
        }
        let mut ctx = SyncContext::new("default");
        let captured = source.get_changes(&mut ctx, &schema(), None, None, "x").unwrap();
        let sender = Uuid::new_v4();
        let applied = target
            .apply_changes(
                &mut ctx,
                &captured.batch,
                ApplyOptions {
                    last_timestamp: None,
                    sender: Some(sender),
                    policy: ConflictPolicy::ServerWins,
                    conflict_log: None,
                },
            )
            .unwrap();
        assert_eq!(applied.total_applied(), 3);
        assert_eq!(applied.total_resolved_conflicts(), 0);

        let table = target.provider().table_named("Note").unwrap();
        let echoed = target
            .provider()
            .get_changes(&table, None, Some(sender))
            .unwrap();
        assert!(echoed.is_empty());
    }

    fn conflicting_pair(policy: ConflictPolicy) -> (BaseOrchestrator<MemoryProvider>, DatabaseChangesApplied, Vec<SyncConflict>) {
        let source = orchestrator("source");
        let target = orchestrator("target");
        target.provider().upsert("Note", note(1, "base")).unwrap();
        let synced_at = target.provider().local_timestamp().unwrap();
        target.provider().upsert("Note", note(1, "local edit")).unwrap();
        source.provider().upsert("Note", note(1, "remote edit")).unwrap();

        let mut ctx = SyncContext::new("default");
        let captured = source.get_changes(&mut ctx, &schema(), None, None, "x").unwrap();
        let (tx, rx) = mpsc::channel();
        let applied = target
            .apply_changes(
                &mut ctx,
                &captured.batch,
                ApplyOptions {
                    last_timestamp: Some(synced_at),
                    sender: Some(Uuid::new_v4()),
                    policy,
                    conflict_log: Some(&tx),
                },
            )
            .unwrap();
        drop(tx);
        (target, applied, rx.iter().collect())
    }

    #[test]
    fn server_wins_keeps_local_row() {
        let (target, applied, log) = conflicting_pair(ConflictPolicy::ServerWins);
        assert_eq!(applied.total_resolved_conflicts(), 1);
        assert_eq!(applied.total_applied(), 0);
        assert_eq!(body(&target, 1), Value::Text("local edit".into()));
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].conflict_type, ConflictType::RemoteExistsLocalExists);
        assert_eq!(log[0].resolution, ConflictResolution::KeepLocal);
    }

    #[test]
    fn client_wins_writes_incoming_row() {
        let (target, applied, log) = conflicting_pair(ConflictPolicy::ClientWins);
        assert_eq!(applied.total_resolved_conflicts(), 1);
        assert_eq!(applied.total_applied(), 1);
        assert_eq!(body(&target, 1), Value::Text("remote edit".into()));
        assert_eq!(log[0].resolution, ConflictResolution::AcceptRemote);
    }

    #[test]
    fn rows_older_than_threshold_do_not_conflict() {
        let source = orchestrator("source");
        let target = orchestrator("target");
        target.provider().upsert("Note", note(1, "old")).unwrap();
        source.provider().upsert("Note", note(1, "new")).unwrap();
        let mut ctx = SyncContext::new("default");
        let captured = source.get_changes(&mut ctx, &schema(), None, None, "x").unwrap();
        let applied = target
            .apply_changes(
                &mut ctx,
                &captured.batch,
                ApplyOptions {
                    last_timestamp: Some(target.provider().local_timestamp().unwrap()),
                    sender: None,
                    policy: ConflictPolicy::ServerWins,
                    conflict_log: None,
                },
            )
            .unwrap();
        assert_eq!(applied.total_resolved_conflicts(), 0);
        assert_eq!(body(&target, 1), Value::Text("new".into()));
    }

    #[test]
    fn deletes_are_applied() {
        let source = orchestrator("source");
        let target = orchestrator("target");
        source.provider().upsert("Note", note(1, "a")).unwrap();
        target.provider().upsert("Note", note(1, "a")).unwrap();
        let since = source.provider().local_timestamp().unwrap();
        source.provider().delete("Note", vec![Value::Integer(1)]).unwrap();

        let mut ctx = SyncContext::new("default");
        let captured = source
            .get_changes(&mut ctx, &schema(), Some(since), None, "x")
            .unwrap();
        let applied = target
            .apply_changes(
                &mut ctx,
                &captured.batch,
                ApplyOptions {
                    last_timestamp: Some(target.provider().local_timestamp().unwrap()),
                    sender: None,
                    policy: ConflictPolicy::ServerWins,
                    conflict_log: None,
                },
            )
            .unwrap();
        assert_eq!(applied.tables[0].state, RowState::Deleted);
        assert_eq!(applied.total_applied(), 1);
        assert_eq!(target.provider().row_count("Note").unwrap(), 0);
    }

    #[test]
    fn rejected_rows_are_counted_not_fatal() {
        let target = orchestrator("target");
        let mut loose = SyncTable::new("Note");
        loose.add_column(SyncColumn::new("Id", DataType::Integer)).unwrap();
        loose.add_column(SyncColumn::new("Body", DataType::Text)).unwrap();
        loose.add_column(SyncColumn::new("Region", DataType::Text)).unwrap();
        loose.set_primary_keys(["Id"]).unwrap();
        let loose_schema = SyncSet::new().with_table(loose).unwrap();
        let source = BaseOrchestrator::new(
            Arc::new(MemoryProvider::with_schema("loose", &loose_schema).unwrap()),
            BatchOptions::default(),
        );
        source
            .provider()
            .upsert("Note", vec![Value::Integer(1), Value::Null, Value::Null])
            .unwrap();
        source.provider().upsert("Note", note(2, "ok")).unwrap();

        let mut ctx = SyncContext::new("default");
        let captured = source
            .get_changes(&mut ctx, &loose_schema, None, None, "x")
            .unwrap();
        let applied = target
            .apply_changes(
                &mut ctx,
                &captured.batch,
                ApplyOptions {
                    last_timestamp: None,
                    sender: None,
                    policy: ConflictPolicy::ServerWins,
                    conflict_log: None,
                },
            )
            .unwrap();
        assert_eq!(applied.total_applied(), 1);
        assert_eq!(applied.total_failed(), 1);
    }

    #[test]
    fn snapshot_skips_conflict_detection() {
        let source = orchestrator("source");
        let target = orchestrator("target");
        target.provider().upsert("Note", note(1, "local")).unwrap();
        source.provider().upsert("Note", note(1, "snap")).unwrap();
        source.provider().upsert("Note", note(2, "snap")).unwrap();

        let mut ctx = SyncContext::new("default");
        let captured = source.get_changes(&mut ctx, &schema(), None, None, "x").unwrap();
        let applied = target
            .apply_snapshot(&mut ctx, &captured.batch, None)
            .unwrap();
        assert_eq!(applied.total_applied(), 2);
        assert_eq!(body(&target, 1), Value::Text("snap".into()));
    }

    #[test]
    fn migrate_reports_plan() {
        let target = orchestrator("target");
        let old = schema();
        let mut new = schema();
        new.table_by_key_mut(&old.tables()[0].key())
            .unwrap()
            .add_column(SyncColumn::new("Tags", DataType::Text))
            .unwrap();
        let mut ctx = SyncContext::new("default");
        let plan = target.migrate(&mut ctx, &old, &new).unwrap();
        assert_eq!(plan.added_columns.len(), 1);
        let table = target.provider().table_named("Note").unwrap();
        assert!(table.column("Tags").is_ok());
    }
}
