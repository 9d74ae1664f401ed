//! Server-side step logic shared by the in-process and HTTP paths.

use super::base::{ApplyOptions, BaseOrchestrator, BatchOptions};
use crate::batch::BatchInfo;
use crate::changes::{DatabaseChangesApplied, DatabaseChangesSelected};
use crate::conflict::{ConflictPolicy, SyncConflict};
use crate::context::{SyncContext, SyncStage};
use crate::error::{CoreError, CoreResult};
use crate::provider::CoreProvider;
use crate::schema::{SyncSet, SyncSetup};
use crate::scope::ScopeInfo;
use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::info;

/// Server-side orchestration settings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerOptions {
    /// Tables the server exposes for every scope it creates.
    pub setup: SyncSetup,
    /// Conflict policy applied to uploads.
    pub policy: ConflictPolicy,
    /// Batch settings for download batches.
    pub batch: BatchOptions,
    /// Root of pre-built snapshots, one directory per scope.
    pub snapshot_directory: Option<PathBuf>,
}

/// What the server returns after applying an upload.
#[derive(Debug, Clone)]
pub struct ServerChanges {
    /// Server timestamp the client records for its next sync.
    pub remote_timestamp: i64,
    /// Server rows to download.
    pub batch: BatchInfo,
    /// Rows selected on the server.
    pub selected: DatabaseChangesSelected,
    /// Rows of the upload applied on the server.
    pub applied: DatabaseChangesApplied,
    /// Policy the server applied.
    pub policy: ConflictPolicy,
}

/// The authoritative side of a synchronization.
#[derive(Debug)]
pub struct ServerOrchestrator<P: CoreProvider + ?Sized> {
    base: BaseOrchestrator<P>,
    options: ServerOptions,
    scope_lock: Mutex<()>,
}

impl<P: CoreProvider + ?Sized> ServerOrchestrator<P> {
    /// Creates a server orchestrator.
    pub fn new(provider: Arc<P>, options: ServerOptions) -> Self {
        Self {
            base: BaseOrchestrator::new(provider, options.batch.clone()),
            options,
            scope_lock: Mutex::new(()),
        }
    }

    /// The underlying orchestrator.
    #[must_use]
    pub fn base(&self) -> &BaseOrchestrator<P> {
        &self.base
    }

    /// Server options.
    #[must_use]
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Loads the server scope for the session's scope name, creating it
    /// with the store's schema on first use.
    ///
    /// # Errors
    ///
    /// Returns the provider's error.
    pub fn ensure_scopes(&self, ctx: &mut SyncContext) -> CoreResult<ScopeInfo> {
        ctx.set_stage(SyncStage::ScopeLoading);
        let _guard = self.scope_lock.lock();
        let provider = self.base.provider();
        if let Some(scope) = provider.load_scope(&ctx.scope_name)? {
            if scope.schema.is_some() {
                return Ok(scope);
            }
        }
        let mut scope = ScopeInfo::new(&ctx.scope_name, self.options.setup.clone());
        scope.schema = Some(provider.get_schema(&scope.setup)?);
        scope.version = 1;
        provider.save_scope(&scope)?;
        scope.is_new = false;
        info!(scope = %scope.name, id = %scope.id, "server scope created");
        Ok(scope)
    }

    /// Like [`ensure_scopes`](Self::ensure_scopes), and also refreshes the
    /// scope's schema from the store, bumping the version if it changed.
    ///
    /// # Errors
    ///
    /// Returns the provider's error.
    pub fn ensure_schema(&self, ctx: &mut SyncContext) -> CoreResult<ScopeInfo> {
        let mut scope = self.ensure_scopes(ctx)?;
        let _guard = self.scope_lock.lock();
        let current = self.base.provider().get_schema(&scope.setup)?;
        let unchanged = scope
            .schema
            .as_ref()
            .is_some_and(|s| s.equals_by_properties(&current));
        if !unchanged {
            scope.schema = Some(current);
            scope.version += 1;
            self.base.provider().save_scope(&scope)?;
            info!(scope = %scope.name, version = scope.version, "server schema refreshed");
        }
        Ok(scope)
    }

    /// Applies a client upload, then captures the server rows the client
    /// has not seen.
    ///
    /// # Errors
    ///
    /// Returns a batch error (fatal for the session) or the provider's error.
    pub fn apply_then_get_changes(
        &self,
        ctx: &mut SyncContext,
        client_scope: &ScopeInfo,
        client_batch: &BatchInfo,
        conflict_log: Option<&Sender<SyncConflict>>,
    ) -> CoreResult<ServerChanges> {
        let server_scope = self.ensure_scopes(ctx)?;
        let schema = server_schema(&server_scope)?;

        let applied = if client_batch.has_data() {
            self.base.apply_changes(
                ctx,
                client_batch,
                ApplyOptions {
                    last_timestamp: client_scope.last_server_sync_timestamp,
                    sender: Some(client_scope.id),
                    policy: self.options.policy,
                    conflict_log,
                },
            )?
        } else {
            DatabaseChangesApplied::default()
        };

        // A reinitializing client dropped its rows, including its own.
        let exclude = if ctx.sync_type.is_reinitialize() {
            None
        } else {
            Some(client_scope.id)
        };
        let since = if ctx.sync_type.is_reinitialize() {
            self.snapshot_applied_at(ctx, client_scope)?
        } else {
            client_scope.last_server_sync_timestamp
        };
        let captured = self.base.get_changes(ctx, schema, since, exclude, "server")?;

        Ok(ServerChanges {
            remote_timestamp: captured.timestamp,
            batch: captured.batch,
            selected: captured.selected,
            applied,
            policy: self.options.policy,
        })
    }

    /// Timestamp of the scope snapshot a reinitializing client has just
    /// applied, recognised by the client announcing it as its last server
    /// sync. `None` means the client starts from nothing.
    fn snapshot_applied_at(
        &self,
        ctx: &SyncContext,
        client_scope: &ScopeInfo,
    ) -> CoreResult<Option<i64>> {
        let Some(announced) = client_scope.last_server_sync_timestamp else {
            return Ok(None);
        };
        let snapshot = self.get_snapshot(ctx)?;
        Ok(snapshot
            .map(|s| s.timestamp)
            .filter(|timestamp| *timestamp == announced))
    }

    /// Rows the server would send to a client.
    ///
    /// # Errors
    ///
    /// Returns the provider's error.
    pub fn estimated_changes(
        &self,
        ctx: &mut SyncContext,
        client_scope: &ScopeInfo,
    ) -> CoreResult<DatabaseChangesSelected> {
        let server_scope = self.ensure_scopes(ctx)?;
        let schema = server_schema(&server_scope)?;
        self.base.estimated_changes(
            schema,
            client_scope.last_server_sync_timestamp,
            Some(client_scope.id),
        )
    }

    /// Loads the pre-built snapshot of the session's scope, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot exists but its summary is unreadable.
    pub fn get_snapshot(&self, ctx: &SyncContext) -> CoreResult<Option<BatchInfo>> {
        let Some(root) = &self.options.snapshot_directory else {
            return Ok(None);
        };
        let dir = root.join(&ctx.scope_name);
        if !dir.join(crate::batch::SUMMARY_FILE).exists() {
            return Ok(None);
        }
        BatchInfo::load_summary(&dir).map(Some)
    }

    /// Builds a snapshot of every live row of the scope, replacing any
    /// previous one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if no snapshot directory is configured,
    /// or a provider or I/O error.
    pub fn create_snapshot(&self, ctx: &mut SyncContext) -> CoreResult<BatchInfo> {
        let root = self
            .options
            .snapshot_directory
            .clone()
            .ok_or_else(|| CoreError::invalid_operation("no snapshot directory configured"))?;
        let server_scope = self.ensure_scopes(ctx)?;
        let schema = server_schema(&server_scope)?;

        let name = ctx.scope_name.clone();
        let dir = root.join(&name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let captured = self.base.get_changes_into(
            ctx,
            schema,
            None,
            None,
            Some(root.clone()),
            name,
        )?;
        let mut batch = captured.batch;
        batch.persist_to(root)?;
        info!(scope = %ctx.scope_name, rows = batch.rows_count, timestamp = batch.timestamp, "snapshot created");
        Ok(batch)
    }
}

fn server_schema(scope: &ScopeInfo) -> CoreResult<&SyncSet> {
    scope
        .schema
        .as_ref()
        .ok_or_else(|| CoreError::ScopeNotFound {
            name: scope.name.clone(),
        })
}
