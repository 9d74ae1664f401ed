//! The counterpart store, in-process or across HTTP.

use crate::error::{EngineResult, Side, SyncError};
use rowsync_core::{
    BatchInfo, ConflictPolicy, CoreError, CoreProvider, DatabaseChangesApplied,
    DatabaseChangesSelected, ScopeInfo, ServerOrchestrator, SyncConflict, SyncContext,
    SyncDirection,
};
use std::sync::mpsc::Sender;
use std::sync::Arc;

/// Server rows received after an upload.
#[derive(Debug, Clone)]
pub struct RemoteChanges {
    /// Server timestamp to record once the rows are applied.
    pub remote_timestamp: i64,
    /// The rows, readable locally.
    pub batch: BatchInfo,
    /// Rows selected on the server.
    pub selected: DatabaseChangesSelected,
    /// Uploaded rows applied on the server.
    pub applied_on_server: DatabaseChangesApplied,
    /// Conflict policy the server applied.
    pub policy: ConflictPolicy,
}

/// Operations the sync agent needs from the counterpart store.
///
/// Every call takes the session context by reference; implementations send
/// a copy to the remote side and merge the returned copy back.
pub trait RemoteOrchestrator: Send + Sync {
    /// Loads or creates the remote scope.
    fn ensure_scopes(&self, ctx: &mut SyncContext) -> EngineResult<ScopeInfo>;

    /// Loads the remote scope with a freshly read schema.
    fn ensure_schema(&self, ctx: &mut SyncContext) -> EngineResult<ScopeInfo>;

    /// Uploads a client batch, lets the remote side apply it, and returns
    /// the remote rows the client has not seen.
    fn apply_then_get_changes(
        &self,
        ctx: &mut SyncContext,
        client_scope: &ScopeInfo,
        client_batch: &BatchInfo,
    ) -> EngineResult<RemoteChanges>;

    /// Returns the pre-built snapshot of the scope, if any.
    fn get_snapshot(&self, ctx: &mut SyncContext) -> EngineResult<Option<BatchInfo>>;

    /// Counts the rows the remote side would send.
    fn get_estimated_changes_count(
        &self,
        ctx: &mut SyncContext,
        client_scope: &ScopeInfo,
    ) -> EngineResult<DatabaseChangesSelected>;
}

/// A remote orchestrator talking to a server store in the same process.
pub struct InProcessOrchestrator<P: CoreProvider + ?Sized> {
    server: Arc<ServerOrchestrator<P>>,
    conflict_log: Option<Sender<SyncConflict>>,
}

impl<P: CoreProvider + ?Sized> InProcessOrchestrator<P> {
    /// Creates an in-process remote over a server orchestrator.
    pub fn new(server: Arc<ServerOrchestrator<P>>) -> Self {
        Self {
            server,
            conflict_log: None,
        }
    }

    /// Sends conflicts detected on the server side to `log`.
    pub fn with_conflict_log(mut self, log: Sender<SyncConflict>) -> Self {
        self.conflict_log = Some(log);
        self
    }

    /// The server orchestrator.
    pub fn server(&self) -> &Arc<ServerOrchestrator<P>> {
        &self.server
    }

    /// Runs `f` on a copy of the context and merges the copy back.
    fn call<T>(
        &self,
        ctx: &mut SyncContext,
        f: impl FnOnce(&mut SyncContext) -> Result<T, CoreError>,
    ) -> EngineResult<T> {
        let mut remote_ctx = ctx.clone();
        let result = f(&mut remote_ctx);
        ctx.merge_from(&remote_ctx);
        result.map_err(|e| SyncError::provider(remote_ctx.stage, Side::Remote, e))
    }
}

impl<P: CoreProvider + ?Sized> RemoteOrchestrator for InProcessOrchestrator<P> {
    fn ensure_scopes(&self, ctx: &mut SyncContext) -> EngineResult<ScopeInfo> {
        self.call(ctx, |c| self.server.ensure_scopes(c))
    }

    fn ensure_schema(&self, ctx: &mut SyncContext) -> EngineResult<ScopeInfo> {
        self.call(ctx, |c| self.server.ensure_schema(c))
    }

    fn apply_then_get_changes(
        &self,
        ctx: &mut SyncContext,
        client_scope: &ScopeInfo,
        client_batch: &BatchInfo,
    ) -> EngineResult<RemoteChanges> {
        if client_batch.has_data() {
            ctx.direction = SyncDirection::Upload;
        }
        let changes = self.call(ctx, |c| {
            self.server
                .apply_then_get_changes(c, client_scope, client_batch, self.conflict_log.as_ref())
        })?;
        ctx.direction = SyncDirection::Download;
        Ok(RemoteChanges {
            remote_timestamp: changes.remote_timestamp,
            batch: changes.batch,
            selected: changes.selected,
            applied_on_server: changes.applied,
            policy: changes.policy,
        })
    }

    fn get_snapshot(&self, ctx: &mut SyncContext) -> EngineResult<Option<BatchInfo>> {
        ctx.direction = SyncDirection::Download;
        self.call(ctx, |c| self.server.get_snapshot(c))
    }

    fn get_estimated_changes_count(
        &self,
        ctx: &mut SyncContext,
        client_scope: &ScopeInfo,
    ) -> EngineResult<DatabaseChangesSelected> {
        self.call(ctx, |c| self.server.estimated_changes(c, client_scope))
    }
}
