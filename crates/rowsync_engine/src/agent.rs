//! Sync agent state machine.

use crate::cancel::CancellationToken;
use crate::config::SyncConfig;
use crate::error::{EngineResult, SyncError};
use crate::local::LocalOrchestrator;
use crate::remote::RemoteOrchestrator;
use parking_lot::RwLock;
use rowsync_codec::Value;
use rowsync_core::{
    BatchInfo, CoreProvider, SyncConflict, SyncContext, SyncDirection, SyncProgress, SyncResult,
    SyncStage, SyncType,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::{debug, error, info};

/// The state of a sync agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// No attempt is running.
    Ready,
    /// An attempt is running.
    Synchronizing,
}

/// Releases the attempt lock on every exit path.
struct AttemptGuard<'a> {
    in_progress: &'a AtomicBool,
    state: &'a RwLock<AgentState>,
}

impl<'a> AttemptGuard<'a> {
    fn acquire(in_progress: &'a AtomicBool, state: &'a RwLock<AgentState>) -> EngineResult<Self> {
        in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::AlreadyInProgress)?;
        *state.write() = AgentState::Synchronizing;
        Ok(Self { in_progress, state })
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        *self.state.write() = AgentState::Ready;
        self.in_progress.store(false, Ordering::Release);
    }
}

/// Synchronizes a local store with a remote one.
///
/// One attempt runs at a time per agent; a concurrent call fails with
/// [`SyncError::AlreadyInProgress`]. Independent agents run fully
/// concurrently.
///
/// # Example
///
/// ```ignore
/// let agent = SyncAgent::new(client_provider, remote, SyncConfig::new("default"));
/// let result = agent.synchronize()?;
/// println!("{result}");
/// ```
pub struct SyncAgent<P: CoreProvider + ?Sized, R: RemoteOrchestrator> {
    local: LocalOrchestrator<P>,
    remote: R,
    config: SyncConfig,
    in_progress: AtomicBool,
    state: RwLock<AgentState>,
    cancel: CancellationToken,
    progress: Option<Sender<SyncProgress>>,
    conflict_log: Option<Sender<SyncConflict>>,
}

impl<P: CoreProvider + ?Sized, R: RemoteOrchestrator> SyncAgent<P, R> {
    /// Creates an agent over a local provider and a remote orchestrator.
    pub fn new(provider: Arc<P>, remote: R, config: SyncConfig) -> Self {
        Self {
            local: LocalOrchestrator::new(provider, config.batch_options()),
            remote,
            config,
            in_progress: AtomicBool::new(false),
            state: RwLock::new(AgentState::Ready),
            cancel: CancellationToken::new(),
            progress: None,
            conflict_log: None,
        }
    }

    /// Sends a progress value on `sender` at every phase.
    pub fn with_progress(mut self, sender: Sender<SyncProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Sends every conflict resolved locally to `sender`.
    pub fn with_conflict_log(mut self, sender: Sender<SyncConflict>) -> Self {
        self.conflict_log = Some(sender);
        self
    }

    /// Gets the current state.
    pub fn state(&self) -> AgentState {
        *self.state.read()
    }

    /// The agent's configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The local orchestrator.
    pub fn local(&self) -> &LocalOrchestrator<P> {
        &self.local
    }

    /// The remote orchestrator.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// A handle that cancels the running attempt.
    ///
    /// The token is reset when an attempt starts, so cancel only after the
    /// attempt has begun.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels the running attempt at its next phase boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Runs one attempt with the configured sync type.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInProgress`, `Cancelled`, a remote error, or a
    /// `Provider` error carrying the stage and side it happened on.
    pub fn synchronize(&self) -> EngineResult<SyncResult> {
        self.synchronize_with(self.config.sync_type, BTreeMap::new())
    }

    /// Runs one attempt with an explicit sync type and filter parameters.
    ///
    /// # Errors
    ///
    /// See [`synchronize`](Self::synchronize).
    pub fn synchronize_with(
        &self,
        sync_type: SyncType,
        parameters: BTreeMap<String, Value>,
    ) -> EngineResult<SyncResult> {
        let _guard = AttemptGuard::acquire(&self.in_progress, &self.state)?;
        self.cancel.reset();

        let mut ctx = SyncContext::new(&self.config.scope_name);
        ctx.sync_type = sync_type;
        ctx.additional_properties = parameters;

        match self.run(&mut ctx) {
            Ok(result) => Ok(result),
            Err(SyncError::Cancelled) => {
                info!(session_id = %ctx.session_id, stage = %ctx.stage, "synchronization cancelled");
                Err(SyncError::Cancelled)
            }
            Err(e) => {
                error!(session_id = %ctx.session_id, stage = %ctx.stage, error = %e, "synchronization failed");
                Err(e)
            }
        }
    }

    /// Counts the rows the server would send on the next attempt.
    ///
    /// Opens a session on the remote side without closing it; the server
    /// lets it expire.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInProgress`, a remote error, or a provider error.
    pub fn estimated_changes_count(&self) -> EngineResult<u64> {
        let _guard = AttemptGuard::acquire(&self.in_progress, &self.state)?;
        let mut ctx = SyncContext::new(&self.config.scope_name);
        ctx.set_stage(SyncStage::BeginSession);
        let scope = self.local.get_scope(&mut ctx)?;
        self.remote.ensure_scopes(&mut ctx)?;
        let selected = self.remote.get_estimated_changes_count(&mut ctx, &scope)?;
        Ok(selected.total())
    }

    fn report(&self, ctx: &SyncContext, message: &str) {
        debug!(session_id = %ctx.session_id, stage = %ctx.stage, progress = ctx.progress, "{message}");
        if let Some(sender) = &self.progress {
            // A dropped receiver only stops reporting.
            let _ = sender.send(SyncProgress::from_context(ctx, message));
        }
    }

    fn run(&self, ctx: &mut SyncContext) -> EngineResult<SyncResult> {
        let mut result = SyncResult::new(ctx.session_id, &ctx.scope_name);
        ctx.set_stage(SyncStage::BeginSession);
        info!(session_id = %ctx.session_id, scope = %ctx.scope_name, sync_type = ?ctx.sync_type, "synchronization started");
        self.report(ctx, "session started");

        // Schema negotiation.
        let mut scope = self.local.get_scope(ctx)?;
        let bootstrap = scope.needs_schema();
        let server_scope = if bootstrap {
            let server_scope = self.remote.ensure_schema(ctx)?;
            self.cancel.check()?;
            let schema = server_scope.schema.as_ref().ok_or_else(|| {
                SyncError::Protocol("server scope carries no schema".into())
            })?;
            self.local.provision(ctx, schema)?;
            scope.schema = Some(schema.clone());
            scope.setup = server_scope.setup.clone();
            scope.version = server_scope.version;
            server_scope
        } else {
            let server_scope = self.remote.ensure_scopes(ctx)?;
            self.cancel.check()?;
            let (setup_matches, schema_matches) = scope.compare_with(&server_scope);
            if !setup_matches || !schema_matches {
                let plan = self.local.migrate(ctx, &mut scope, &server_scope)?;
                info!(
                    session_id = %ctx.session_id,
                    version = scope.version,
                    added_tables = plan.added_tables.len(),
                    added_columns = plan.added_columns.len(),
                    "local scope migrated"
                );
            }
            server_scope
        };
        self.report(ctx, "schema negotiated");
        self.cancel.check()?;

        // Capture.
        let captured = match ctx.sync_type {
            SyncType::Normal => self.local.get_changes(
                ctx,
                &scope,
                scope.last_sync_timestamp,
                Some(server_scope.id),
            )?,
            SyncType::Reinitialize => {
                let captured = self.local.empty_changes(ctx, &scope)?;
                self.local.reset(ctx, &scope)?;
                captured
            }
            SyncType::ReinitializeWithUpload => {
                let captured = self.local.get_changes(ctx, &scope, None, None)?;
                self.local.reset(ctx, &scope)?;
                captured
            }
        };
        result.total_changes_uploaded = captured.selected.total();
        self.report(ctx, "local changes captured");
        self.cancel.check()?;

        // Snapshot.
        if bootstrap || ctx.sync_type.is_reinitialize() {
            ctx.direction = SyncDirection::Download;
            if let Some(snapshot) = self.remote.get_snapshot(ctx)? {
                self.cancel.check()?;
                let applied = self.local.apply_snapshot(ctx, &snapshot, server_scope.id)?;
                result.snapshot_changes_applied = applied.total_applied();
                result.total_changes_downloaded += snapshot.rows_count;
                result.total_changes_applied += applied.total_applied();
                result.total_changes_failed += applied.total_failed();
                scope.last_server_sync_timestamp = Some(snapshot.timestamp);
                if is_download_dir(&snapshot) {
                    snapshot.try_cleanup(|_| true);
                }
                self.report(ctx, "snapshot applied");
                self.cancel.check()?;
            }
            ctx.direction = SyncDirection::None;
        }

        // Exchange.
        if captured.batch.has_data() {
            ctx.direction = SyncDirection::Upload;
            self.report(ctx, "uploading local changes");
        }
        let remote = self.remote.apply_then_get_changes(ctx, &scope, &captured.batch)?;
        captured.batch.try_cleanup(|_| true);
        result.total_changes_applied_on_server = remote.applied_on_server.total_applied();
        result.total_resolved_conflicts += remote.applied_on_server.total_resolved_conflicts();
        result.total_changes_failed += remote.applied_on_server.total_failed();
        result.total_changes_downloaded += remote.selected.total();
        self.report(ctx, "changes exchanged");
        self.cancel.check()?;

        // Local apply, from the server's decision.
        ctx.direction = SyncDirection::Download;
        let applied = self.local.apply_changes(
            ctx,
            &remote.batch,
            captured.timestamp,
            server_scope.id,
            remote.policy.reversed(),
            self.conflict_log.as_ref(),
        )?;
        remote.batch.try_cleanup(|_| true);
        result.total_changes_applied += applied.total_applied();
        result.total_resolved_conflicts += applied.total_resolved_conflicts();
        result.total_changes_failed += applied.total_failed();
        self.report(ctx, "changes applied");
        ctx.direction = SyncDirection::None;

        scope.last_server_sync_timestamp = Some(remote.remote_timestamp);
        scope.last_sync_timestamp = Some(captured.timestamp);
        self.local.save_scope(ctx, &mut scope)?;

        ctx.set_stage(SyncStage::EndSession);
        result.complete();
        self.report(ctx, "session ended");
        info!(
            session_id = %ctx.session_id,
            uploaded = result.total_changes_uploaded,
            downloaded = result.total_changes_downloaded,
            conflicts = result.total_resolved_conflicts,
            "synchronization completed"
        );
        Ok(result)
    }
}

/// True for a batch downloaded by this client; a snapshot read in place
/// belongs to the server.
fn is_download_dir(batch: &BatchInfo) -> bool {
    batch.directory_name.ends_with("_download")
}

