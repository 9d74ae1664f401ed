//! The caller's own store.

use crate::error::{EngineResult, Side, SyncError};
use rowsync_core::{
    ApplyOptions, BaseOrchestrator, BatchInfo, BatchOptions, CapturedChanges, ConflictPolicy,
    CoreError, CoreProvider, DatabaseChangesApplied, MigrationPlan, ScopeInfo, SyncConflict,
    SyncContext, SyncSet, SyncSetup, SyncStage,
};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Drives the local store through capture, apply, snapshot and migration.
///
/// Every store failure comes back as [`SyncError::Provider`] tagged with
/// the stage it happened in.
pub struct LocalOrchestrator<P: CoreProvider + ?Sized> {
    base: BaseOrchestrator<P>,
}

impl<P: CoreProvider + ?Sized> LocalOrchestrator<P> {
    /// Creates a local orchestrator over a provider.
    pub fn new(provider: Arc<P>, options: BatchOptions) -> Self {
        Self {
            base: BaseOrchestrator::new(provider, options),
        }
    }

    /// The provider.
    pub fn provider(&self) -> &Arc<P> {
        self.base.provider()
    }

    fn wrap(ctx: &SyncContext) -> impl FnOnce(CoreError) -> SyncError {
        let stage = ctx.stage;
        move |e| SyncError::provider(stage, Side::Local, e)
    }

    /// Loads the local scope, or creates an unsaved one.
    ///
    /// # Errors
    ///
    /// Returns a provider error.
    pub fn get_scope(&self, ctx: &mut SyncContext) -> EngineResult<ScopeInfo> {
        ctx.set_stage(SyncStage::ScopeLoading);
        let loaded = self
            .provider()
            .load_scope(&ctx.scope_name)
            .map_err(Self::wrap(ctx))?;
        Ok(loaded.unwrap_or_else(|| ScopeInfo::new(&ctx.scope_name, SyncSetup::default())))
    }

    /// Persists the local scope.
    ///
    /// # Errors
    ///
    /// Returns a provider error.
    pub fn save_scope(&self, ctx: &SyncContext, scope: &mut ScopeInfo) -> EngineResult<()> {
        self.provider().save_scope(scope).map_err(Self::wrap(ctx))?;
        scope.is_new = false;
        Ok(())
    }

    /// Current local store timestamp.
    ///
    /// # Errors
    ///
    /// Returns a provider error.
    pub fn local_timestamp(&self, ctx: &SyncContext) -> EngineResult<i64> {
        self.provider().local_timestamp().map_err(Self::wrap(ctx))
    }

    /// Captures local rows changed since `since`, leaving out rows that
    /// came from `exclude_origin`.
    ///
    /// # Errors
    ///
    /// Returns a provider or batch error.
    pub fn get_changes(
        &self,
        ctx: &mut SyncContext,
        scope: &ScopeInfo,
        since: Option<i64>,
        exclude_origin: Option<Uuid>,
    ) -> EngineResult<CapturedChanges> {
        let schema = scope_schema(ctx, scope)?;
        self.base
            .get_changes(ctx, schema, since, exclude_origin, "client")
            .map_err(Self::wrap(ctx))
    }

    /// Captures nothing: an empty batch for a download-only session.
    ///
    /// # Errors
    ///
    /// Returns a provider error.
    pub fn empty_changes(&self, ctx: &mut SyncContext, scope: &ScopeInfo) -> EngineResult<CapturedChanges> {
        let schema = scope_schema(ctx, scope)?;
        let mut batch = BatchInfo::in_memory(schema.sanitized(), self.base.options().format);
        batch.ensure_last_batch().map_err(Self::wrap(ctx))?;
        let timestamp = self.local_timestamp(ctx)?;
        batch.timestamp = timestamp;
        Ok(CapturedChanges {
            timestamp,
            batch,
            selected: Default::default(),
        })
    }

    /// Applies rows received from the remote side.
    ///
    /// `policy` is the policy from this store's point of view, i.e. the
    /// remote policy reversed.
    ///
    /// # Errors
    ///
    /// Returns a provider or batch error.
    pub fn apply_changes(
        &self,
        ctx: &mut SyncContext,
        batch: &BatchInfo,
        last_timestamp: i64,
        sender: Uuid,
        policy: ConflictPolicy,
        conflict_log: Option<&Sender<SyncConflict>>,
    ) -> EngineResult<DatabaseChangesApplied> {
        self.base
            .apply_changes(
                ctx,
                batch,
                ApplyOptions {
                    last_timestamp: Some(last_timestamp),
                    sender: Some(sender),
                    policy,
                    conflict_log,
                },
            )
            .map_err(Self::wrap(ctx))
    }

    /// Bulk-loads a snapshot without conflict detection.
    ///
    /// # Errors
    ///
    /// Returns a provider or batch error.
    pub fn apply_snapshot(
        &self,
        ctx: &mut SyncContext,
        batch: &BatchInfo,
        sender: Uuid,
    ) -> EngineResult<DatabaseChangesApplied> {
        self.base
            .apply_snapshot(ctx, batch, Some(sender))
            .map_err(Self::wrap(ctx))
    }

    /// Creates local structures for a schema.
    ///
    /// # Errors
    ///
    /// Returns a provider error.
    pub fn provision(&self, ctx: &mut SyncContext, schema: &SyncSet) -> EngineResult<()> {
        self.base.provision(ctx, schema).map_err(Self::wrap(ctx))
    }

    /// Removes every local row of the scope's tables.
    ///
    /// # Errors
    ///
    /// Returns a provider error.
    pub fn reset(&self, ctx: &SyncContext, scope: &ScopeInfo) -> EngineResult<()> {
        let schema = scope_schema(ctx, scope)?;
        info!(session_id = %ctx.session_id, tables = schema.tables().len(), "resetting local tables");
        self.base.reset_tables(schema).map_err(Self::wrap(ctx))
    }

    /// Moves the local scope to the remote setup and schema, altering local
    /// structures without dropping anything.
    ///
    /// # Errors
    ///
    /// Returns a provider error, or a `Provider` error if the remote scope
    /// carries no schema.
    pub fn migrate(
        &self,
        ctx: &mut SyncContext,
        scope: &mut ScopeInfo,
        remote: &ScopeInfo,
    ) -> EngineResult<MigrationPlan> {
        let target = scope_schema(ctx, remote)?.clone();
        let plan = match &scope.schema {
            Some(current) => self.base.migrate(ctx, current, &target).map_err(Self::wrap(ctx))?,
            None => {
                self.provision(ctx, &target)?;
                MigrationPlan::default()
            }
        };
        scope.schema = Some(target);
        scope.setup = remote.setup.clone();
        scope.version = remote.version;
        Ok(plan)
    }
}

fn scope_schema<'a>(ctx: &SyncContext, scope: &'a ScopeInfo) -> EngineResult<&'a SyncSet> {
    scope.schema.as_ref().ok_or_else(|| {
        SyncError::provider(
            ctx.stage,
            Side::Local,
            CoreError::ScopeNotFound {
                name: scope.name.clone(),
            },
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_codec::Value;
    use rowsync_core::{DataType, MemoryProvider, SyncColumn, SyncTable};

    fn schema() -> SyncSet {
        let mut t = SyncTable::new("Task");
        t.add_column(SyncColumn::new("Id", DataType::Integer)).unwrap();
        t.add_column(SyncColumn::new("Title", DataType::Text)).unwrap();
        t.set_primary_keys(["Id"]).unwrap();
        SyncSet::new().with_table(t).unwrap()
    }

    fn local() -> LocalOrchestrator<MemoryProvider> {
        LocalOrchestrator::new(Arc::new(MemoryProvider::new("client")), BatchOptions::default())
    }

    #[test]
    fn scope_is_created_then_loaded() {
        let local = local();
        let mut ctx = SyncContext::new("default");
        let mut scope = local.get_scope(&mut ctx).unwrap();
        assert!(scope.is_new);
        local.save_scope(&ctx, &mut scope).unwrap();
        assert!(!scope.is_new);
        let again = local.get_scope(&mut ctx).unwrap();
        assert_eq!(again.id, scope.id);
        assert!(!again.is_new);
    }

    #[test]
    fn capture_without_schema_is_a_provider_error() {
        let local = local();
        let mut ctx = SyncContext::new("default");
        let scope = local.get_scope(&mut ctx).unwrap();
        let err = local.get_changes(&mut ctx, &scope, None, None).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Provider {
                side: Side::Local,
                stage: SyncStage::ScopeLoading,
                ..
            }
        ));
    }

    #[test]
    fn migrate_adopts_remote_schema() {
        let local = local();
        let mut ctx = SyncContext::new("default");
        let mut scope = local.get_scope(&mut ctx).unwrap();
        let mut remote = ScopeInfo::new("default", SyncSetup::new(["Task"]));
        remote.schema = Some(schema());
        remote.version = 3;

        local.migrate(&mut ctx, &mut scope, &remote).unwrap();
        assert_eq!(scope.version, 3);
        assert!(scope.schema.as_ref().unwrap().equals_by_properties(&schema()));
        local
            .provider()
            .upsert("Task", vec![Value::Integer(1), Value::Text("write".into())])
            .unwrap();

        let captured = local.get_changes(&mut ctx, &scope, None, None).unwrap();
        assert_eq!(captured.selected.total(), 1);
    }

    #[test]
    fn empty_changes_is_a_valid_batch() {
        let local = local();
        let mut ctx = SyncContext::new("default");
        let mut scope = local.get_scope(&mut ctx).unwrap();
        scope.schema = Some(schema());
        let captured = local.empty_changes(&mut ctx, &scope).unwrap();
        assert!(!captured.batch.has_data());
        assert!(captured.batch.is_complete());
    }
}
