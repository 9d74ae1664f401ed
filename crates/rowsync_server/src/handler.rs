//! Step handlers of the web protocol.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::session::{SessionHandle, SessionStore};
use rowsync_core::converter::{convert_incoming, convert_outgoing};
use rowsync_core::{
    BatchInfo, BatchPartInfo, CoreError, CoreProvider, RowConverter, ServerChanges,
    ServerOrchestrator, SyncConflict, SyncContext, SyncSet, SyncStage,
};
use rowsync_protocol::{
    BatchPartPayload, ChangesSummary, EndDownloadResponse, EnsureScopeRequest,
    EnsureScopeResponse, EstimatedChangesRequest, EstimatedChangesResponse, GetChangesRequest,
    GetMoreChangesRequest, GetSnapshotRequest, PartResponse, SendChangesRequest,
    SendChangesResponse, SessionRequest, SnapshotResponse,
};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::{debug, info};

/// Serves the steps of every session against one server store.
pub struct RequestHandler<P: CoreProvider + ?Sized> {
    orchestrator: Arc<ServerOrchestrator<P>>,
    sessions: SessionStore,
    config: ServerConfig,
    conflict_log: Option<Sender<SyncConflict>>,
}

impl<P: CoreProvider + ?Sized> RequestHandler<P> {
    /// Creates a handler over a server orchestrator.
    pub fn new(orchestrator: Arc<ServerOrchestrator<P>>, config: ServerConfig) -> Self {
        Self {
            orchestrator,
            sessions: SessionStore::new(config.session_ttl, config.max_sessions),
            config,
            conflict_log: None,
        }
    }

    /// Sends conflicts resolved on uploads to `log`.
    pub fn set_conflict_log(&mut self, log: Sender<SyncConflict>) {
        self.conflict_log = Some(log);
    }

    /// The server orchestrator.
    pub fn orchestrator(&self) -> &Arc<ServerOrchestrator<P>> {
        &self.orchestrator
    }

    /// Live sessions.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn session(&self, ctx: &SyncContext) -> ServerResult<SessionHandle> {
        self.sessions.get(ctx.session_id, &ctx.scope_name)
    }

    /// `EnsureScopes` and `EnsureSchema`: opens the session and returns the
    /// server scope.
    ///
    /// # Errors
    ///
    /// Returns `TooManySessions` or a provider error.
    pub fn ensure_scopes(
        &self,
        request: EnsureScopeRequest,
        refresh_schema: bool,
    ) -> ServerResult<EnsureScopeResponse> {
        let mut ctx = request.context;
        self.sessions.open(ctx.session_id, &ctx.scope_name)?;
        let scope = if refresh_schema {
            self.orchestrator.ensure_schema(&mut ctx)
        } else {
            self.orchestrator.ensure_scopes(&mut ctx)
        }
        .map_err(|e| ServerError::provider(ctx.stage, e))?;
        Ok(EnsureScopeResponse {
            context: ctx,
            server_scope: scope,
        })
    }

    /// `SendChangesInProgress`: stores one upload part; the last part
    /// applies the whole upload and computes the server changes.
    ///
    /// Resending a part replaces it. Resending the last part after the
    /// upload was applied answers the same result without applying again.
    ///
    /// # Errors
    ///
    /// Returns `SessionLost`, `InvalidRequest` for an incomplete upload, or
    /// a provider error.
    pub fn send_changes(
        &self,
        converter: Option<&dyn RowConverter>,
        request: SendChangesRequest,
    ) -> ServerResult<SendChangesResponse> {
        let mut ctx = request.context;
        let session = self.session(&ctx)?;
        let mut cache = session.lock();
        let part = request.part;

        if cache.changes.is_some() {
            if part.is_last {
                debug!(session_id = %ctx.session_id, index = part.index, "upload already applied");
                return Ok(SendChangesResponse {
                    context: ctx,
                    received_index: part.index,
                    parts_received: cache.parts_received,
                });
            }
            return Err(ServerError::InvalidRequest(
                "upload already applied for this session".into(),
            ));
        }

        if cache.upload.is_none() {
            let schema = self.upload_schema(&mut ctx)?;
            cache.upload = Some(match &self.config.batch_directory {
                Some(root) => BatchInfo::on_disk(
                    root,
                    format!("{}_upload", ctx.session_id.simple()),
                    schema,
                    self.config.batch_format,
                ),
                None => BatchInfo::in_memory(schema, self.config.batch_format),
            });
        }
        cache.client_scope = Some(request.client_scope);
        ctx.set_stage(SyncStage::ChangesUploading);

        let stage = ctx.stage;
        let provider_err = |e: CoreError| ServerError::provider(stage, e);
        let Some(upload) = cache.upload.as_mut() else {
            return Err(ServerError::Internal("upload batch missing".into()));
        };
        let mut container = part.container;
        if let Some(converter) = converter {
            convert_incoming(converter, &mut container, &upload.sanitized_schema)
                .map_err(provider_err)?;
        }
        upload
            .write_part(part.index, container, part.is_last)
            .map_err(provider_err)?;
        let parts_received = upload.parts.len() as u32;
        cache.parts_received = parts_received;
        debug!(session_id = %ctx.session_id, index = part.index, parts_received, "upload part stored");

        if part.is_last {
            let (Some(upload), Some(client_scope)) = (cache.upload.take(), cache.client_scope.clone())
            else {
                return Err(ServerError::Internal("upload state missing".into()));
            };
            if !upload.is_complete() {
                let message = format!(
                    "upload incomplete: {} parts received, last index {}",
                    parts_received, part.index
                );
                cache.upload = Some(upload);
                return Err(ServerError::InvalidRequest(message));
            }
            let applied = self.orchestrator.apply_then_get_changes(
                &mut ctx,
                &client_scope,
                &upload,
                self.conflict_log.as_ref(),
            );
            let changes = match applied {
                Ok(changes) => changes,
                Err(e) => {
                    // Kept for a retry of the last part.
                    cache.upload = Some(upload);
                    return Err(ServerError::provider(ctx.stage, e));
                }
            };
            upload.try_cleanup(|_| true);
            info!(
                session_id = %ctx.session_id,
                uploaded = upload.rows_count,
                applied = changes.applied.total_applied(),
                conflicts = changes.applied.total_resolved_conflicts(),
                selected = changes.selected.total(),
                "upload applied"
            );
            cache.changes = Some(Arc::new(changes));
        }

        Ok(SendChangesResponse {
            context: ctx,
            received_index: part.index,
            parts_received,
        })
    }

    fn upload_schema(&self, ctx: &mut SyncContext) -> ServerResult<SyncSet> {
        let scope = self
            .orchestrator
            .ensure_scopes(ctx)
            .map_err(|e| ServerError::provider(ctx.stage, e))?;
        scope
            .schema
            .map(|s| s.sanitized())
            .ok_or_else(|| ServerError::Internal(format!("scope {} has no schema", scope.name)))
    }

    /// `GetSummary`: the changes computed after the upload.
    ///
    /// # Errors
    ///
    /// Returns `SessionLost`, or `InvalidRequest` before the upload is
    /// complete.
    pub fn get_summary(&self, request: SessionRequest) -> ServerResult<ChangesSummary> {
        let ctx = request.context;
        let session = self.session(&ctx)?;
        let changes = session.lock().changes.clone().ok_or_else(|| {
            ServerError::InvalidRequest("no changes computed for this session".into())
        })?;
        Ok(summary(ctx, &changes))
    }

    /// `GetChanges`: computes the server changes without an upload.
    ///
    /// # Errors
    ///
    /// Returns `SessionLost` or a provider error.
    pub fn get_changes(&self, request: GetChangesRequest) -> ServerResult<ChangesSummary> {
        let mut ctx = request.context;
        let session = self.session(&ctx)?;
        let mut cache = session.lock();
        if let Some(changes) = &cache.changes {
            return Ok(summary(ctx, changes));
        }
        let empty = BatchInfo::in_memory(SyncSet::new(), self.config.batch_format);
        let changes = self
            .orchestrator
            .apply_then_get_changes(&mut ctx, &request.client_scope, &empty, None)
            .map_err(|e| ServerError::provider(ctx.stage, e))?;
        info!(session_id = %ctx.session_id, selected = changes.selected.total(), "download prepared");
        let changes = Arc::new(changes);
        cache.client_scope = Some(request.client_scope);
        cache.changes = Some(Arc::clone(&changes));
        Ok(summary(ctx, &changes))
    }

    /// `GetMoreChanges`: one part of the download batch, by index.
    ///
    /// Serving the last part releases the batch directory once no other
    /// read of it is in flight; the part itself stays cached for a retried
    /// request.
    ///
    /// # Errors
    ///
    /// Returns `SessionLost`, `InvalidRequest` for an unknown index, or a
    /// provider error.
    pub fn get_more_changes(
        &self,
        converter: Option<&dyn RowConverter>,
        request: GetMoreChangesRequest,
    ) -> ServerResult<PartResponse> {
        let ctx = request.context;
        let index = request.index;
        let session = self.session(&ctx)?;
        let (changes, cached) = {
            let mut cache = session.lock();
            let changes = cache.changes.clone().ok_or_else(|| {
                ServerError::InvalidRequest("no changes computed for this session".into())
            })?;
            let cached = cache.last_part.clone().filter(|p| p.index == index);
            if cached.is_none() {
                cache.begin_read();
            }
            (changes, cached)
        };
        if let Some(part) = cached {
            return Ok(PartResponse { context: ctx, part });
        }

        let loaded = load_payload(&ctx, &changes.batch, index, converter);
        let mut cache = session.lock();
        cache.end_read();
        let part = loaded?;
        if part.is_last && cache.last_part.is_none() {
            cache.last_part = Some(part.clone());
        }
        if cache.release_download() && part.is_last {
            debug!(session_id = %ctx.session_id, index, "last part served, batch released");
        }
        drop(cache);
        Ok(PartResponse { context: ctx, part })
    }

    /// `GetSnapshot`: the snapshot descriptor, or one snapshot part when an
    /// index is given.
    ///
    /// # Errors
    ///
    /// Returns `SessionLost`, `InvalidRequest` for a part of a missing
    /// snapshot, or a provider error.
    pub fn get_snapshot(
        &self,
        converter: Option<&dyn RowConverter>,
        request: GetSnapshotRequest,
    ) -> ServerResult<SnapshotResponse> {
        let ctx = request.context;
        self.session(&ctx)?;
        let snapshot = self
            .orchestrator
            .get_snapshot(&ctx)
            .map_err(|e| ServerError::provider(ctx.stage, e))?;
        match request.index {
            None => Ok(SnapshotResponse {
                context: ctx,
                batch: snapshot.as_ref().map(descriptor),
                part: None,
            }),
            Some(index) => {
                let snapshot = snapshot.ok_or_else(|| {
                    ServerError::InvalidRequest(format!("no snapshot for scope {}", ctx.scope_name))
                })?;
                let part = load_payload(&ctx, &snapshot, index, converter)?;
                Ok(SnapshotResponse {
                    context: ctx,
                    batch: None,
                    part: Some(part),
                })
            }
        }
    }

    /// `SendEndDownloadChanges`: closes the session.
    ///
    /// # Errors
    ///
    /// Returns `SessionLost`.
    pub fn end_download(&self, request: SessionRequest) -> ServerResult<EndDownloadResponse> {
        let ctx = request.context;
        let remote_timestamp = self.session(&ctx)?.lock().remote_timestamp();
        self.sessions.remove(ctx.session_id);
        debug!(session_id = %ctx.session_id, ?remote_timestamp, "session closed");
        Ok(EndDownloadResponse { context: ctx })
    }

    /// `GetEstimatedChangesCount`: rows the server would send.
    ///
    /// # Errors
    ///
    /// Returns `SessionLost` or a provider error.
    pub fn estimated_changes(
        &self,
        request: EstimatedChangesRequest,
    ) -> ServerResult<EstimatedChangesResponse> {
        let mut ctx = request.context;
        self.session(&ctx)?;
        let selected = self
            .orchestrator
            .estimated_changes(&mut ctx, &request.client_scope)
            .map_err(|e| ServerError::provider(ctx.stage, e))?;
        Ok(EstimatedChangesResponse {
            context: ctx,
            selected,
        })
    }
}

fn summary(context: SyncContext, changes: &ServerChanges) -> ChangesSummary {
    ChangesSummary {
        context,
        remote_timestamp: changes.remote_timestamp,
        batch: descriptor(&changes.batch),
        selected: changes.selected.clone(),
        applied: changes.applied.clone(),
        policy: changes.policy,
    }
}

/// A batch descriptor without part payloads or server paths.
fn descriptor(batch: &BatchInfo) -> BatchInfo {
    BatchInfo {
        root: None,
        directory_name: batch.directory_name.clone(),
        parts: batch
            .parts
            .iter()
            .map(|p| BatchPartInfo {
                index: p.index,
                file_name: p.file_name.clone(),
                is_last: p.is_last,
                tables: p.tables.clone(),
                data: None,
            })
            .collect(),
        sanitized_schema: batch.sanitized_schema.clone(),
        rows_count: batch.rows_count,
        timestamp: batch.timestamp,
        format: batch.format,
    }
}

fn load_payload(
    ctx: &SyncContext,
    batch: &BatchInfo,
    index: u32,
    converter: Option<&dyn RowConverter>,
) -> ServerResult<BatchPartPayload> {
    let is_last = batch
        .part(index)
        .ok_or_else(|| ServerError::InvalidRequest(format!("batch has no part {index}")))?
        .is_last;
    let mut container = batch
        .load_part(index)
        .map_err(|e| ServerError::provider(ctx.stage, e))?;
    if let Some(converter) = converter {
        convert_outgoing(converter, &mut container, &batch.sanitized_schema)
            .map_err(|e| ServerError::provider(ctx.stage, e))?;
    }
    Ok(BatchPartPayload {
        index,
        is_last,
        container,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_codec::Value;
    use rowsync_core::{
        BatchLimit, ContainerSet, DataType, MemoryProvider, MigrationPlan, RowState, ScopeInfo,
        SyncColumn, SyncRow, SyncSetup, SyncTable, TrackedRow,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use uuid::Uuid;

    fn task_schema() -> SyncSet {
        let mut table = SyncTable::new("Task");
        table.add_column(SyncColumn::new("Id", DataType::Integer)).unwrap();
        table.set_primary_keys(["Id"]).unwrap();
        SyncSet::new().with_table(table).unwrap()
    }

    fn tasks() -> MemoryProvider {
        let provider = MemoryProvider::with_schema("server", &task_schema()).unwrap();
        for id in 1..=3 {
            provider.upsert("Task", vec![Value::Integer(id)]).unwrap();
        }
        provider
    }

    fn config(batch_directory: Option<&std::path::Path>) -> ServerConfig {
        let config = ServerConfig::default().with_setup(SyncSetup::new(["Task"]));
        match batch_directory {
            Some(dir) => config.with_batch_directory(dir),
            None => config,
        }
    }

    fn handler_over<P: CoreProvider>(provider: P, config: ServerConfig) -> RequestHandler<P> {
        let orchestrator = ServerOrchestrator::new(Arc::new(provider), config.server_options());
        RequestHandler::new(Arc::new(orchestrator), config)
    }

    fn handler(batch_directory: Option<&std::path::Path>) -> RequestHandler<MemoryProvider> {
        handler_over(tasks(), config(batch_directory))
    }

    /// A store whose next row write fails.
    struct FlakyStore {
        inner: MemoryProvider,
        fail_next: AtomicBool,
    }

    impl CoreProvider for FlakyStore {
        fn data_source(&self) -> String {
            self.inner.data_source()
        }

        fn get_schema(&self, setup: &SyncSetup) -> rowsync_core::CoreResult<SyncSet> {
            self.inner.get_schema(setup)
        }

        fn provision(&self, schema: &SyncSet) -> rowsync_core::CoreResult<()> {
            self.inner.provision(schema)
        }

        fn migrate(&self, plan: &MigrationPlan, schema: &SyncSet) -> rowsync_core::CoreResult<()> {
            self.inner.migrate(plan, schema)
        }

        fn reset_table(&self, table: &SyncTable) -> rowsync_core::CoreResult<()> {
            self.inner.reset_table(table)
        }

        fn local_timestamp(&self) -> rowsync_core::CoreResult<i64> {
            self.inner.local_timestamp()
        }

        fn load_scope(&self, name: &str) -> rowsync_core::CoreResult<Option<ScopeInfo>> {
            self.inner.load_scope(name)
        }

        fn save_scope(&self, scope: &ScopeInfo) -> rowsync_core::CoreResult<()> {
            self.inner.save_scope(scope)
        }

        fn get_changes(
            &self,
            table: &SyncTable,
            since: Option<i64>,
            exclude_origin: Option<Uuid>,
        ) -> rowsync_core::CoreResult<Vec<SyncRow>> {
            self.inner.get_changes(table, since, exclude_origin)
        }

        fn get_tracked_row(
            &self,
            table: &SyncTable,
            primary_key: &[Value],
        ) -> rowsync_core::CoreResult<Option<TrackedRow>> {
            self.inner.get_tracked_row(table, primary_key)
        }

        fn apply_row(
            &self,
            table: &SyncTable,
            row: &SyncRow,
            origin: Option<Uuid>,
        ) -> rowsync_core::CoreResult<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(CoreError::provider("store unavailable"));
            }
            self.inner.apply_row(table, row, origin)
        }
    }

    fn upload_of(ctx: &SyncContext, id: i64) -> SendChangesRequest {
        let schema = task_schema();
        let table = &schema.tables()[0];
        let row = SyncRow::from_values(table, RowState::Modified, vec![Value::Integer(id)]).unwrap();
        let mut container = ContainerSet::new();
        container.push(&table.key(), row.into_buffer());
        SendChangesRequest {
            context: ctx.clone(),
            client_scope: ScopeInfo::new("default", SyncSetup::new(["Task"])),
            part: BatchPartPayload {
                index: 0,
                is_last: true,
                container,
            },
        }
    }

    /// Opens a session and prepares a download of one row per part.
    fn prepared_download(
        handler: &RequestHandler<MemoryProvider>,
    ) -> (SyncContext, u32, std::path::PathBuf) {
        let ctx = open(handler);
        let summary = handler
            .get_changes(GetChangesRequest {
                context: ctx.clone(),
                client_scope: ScopeInfo::new("default", SyncSetup::default()),
            })
            .unwrap();
        let last = summary.batch.parts.len() as u32 - 1;
        assert!(last >= 2);
        let session = handler.sessions().get(ctx.session_id, "default").unwrap();
        let directory = session
            .lock()
            .changes
            .as_ref()
            .and_then(|c| c.batch.directory_path())
            .unwrap();
        assert!(directory.exists());
        (ctx, last, directory)
    }

    fn open(handler: &RequestHandler<MemoryProvider>) -> SyncContext {
        let ctx = SyncContext::new("default");
        handler
            .ensure_scopes(EnsureScopeRequest { context: ctx.clone() }, false)
            .unwrap();
        ctx
    }

    #[test]
    fn last_part_is_served_again_after_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(Some(dir.path()));
        let ctx = open(&handler);
        let summary = handler
            .get_changes(GetChangesRequest {
                context: ctx.clone(),
                client_scope: ScopeInfo::new("default", SyncSetup::default()),
            })
            .unwrap();
        assert_eq!(summary.selected.total(), 3);
        assert!(summary.batch.parts.iter().all(|p| p.data.is_none()));
        assert!(summary.batch.root.is_none());

        let last = summary.batch.parts.len() as u32 - 1;
        let request = GetMoreChangesRequest {
            context: ctx.clone(),
            index: last,
        };
        let first = handler.get_more_changes(None, request.clone()).unwrap();
        assert!(first.part.is_last);
        let retried = handler.get_more_changes(None, request).unwrap();
        assert_eq!(retried.part, first.part);
    }

    #[test]
    fn summary_before_upload_is_rejected() {
        let handler = handler(None);
        let ctx = open(&handler);
        assert!(matches!(
            handler.get_summary(SessionRequest { context: ctx }),
            Err(ServerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn end_download_closes_the_session() {
        let handler = handler(None);
        let ctx = open(&handler);
        handler
            .end_download(SessionRequest {
                context: ctx.clone(),
            })
            .unwrap();
        assert!(handler.sessions().is_empty());
        assert!(matches!(
            handler.end_download(SessionRequest { context: ctx }),
            Err(ServerError::SessionLost { .. })
        ));
    }

    #[test]
    fn snapshot_without_directory_is_absent() {
        let handler = handler(None);
        let ctx = open(&handler);
        let response = handler
            .get_snapshot(
                None,
                GetSnapshotRequest {
                    context: ctx,
                    index: None,
                },
            )
            .unwrap();
        assert!(response.batch.is_none());
    }

    #[test]
    fn batch_outlives_reads_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler_over(
            tasks(),
            config(Some(dir.path())).with_batch_limit(BatchLimit::Rows(1)),
        );
        let (ctx, last, directory) = prepared_download(&handler);
        let session = handler.sessions().get(ctx.session_id, "default").unwrap();

        // Another request for a part is still loading.
        session.lock().begin_read();
        let served = handler
            .get_more_changes(
                None,
                GetMoreChangesRequest {
                    context: ctx.clone(),
                    index: last,
                },
            )
            .unwrap();
        assert!(served.part.is_last);
        assert!(directory.exists());

        let first = handler
            .get_more_changes(
                None,
                GetMoreChangesRequest {
                    context: ctx.clone(),
                    index: 0,
                },
            )
            .unwrap();
        assert_eq!(first.part.index, 0);
        assert!(directory.exists());

        let mut cache = session.lock();
        cache.end_read();
        assert_eq!(cache.readers(), 0);
        assert!(cache.release_download());
        drop(cache);
        assert!(!directory.exists());
    }

    #[test]
    fn concurrent_last_part_requests_all_succeed() {
        const READERS: usize = 4;
        let dir = tempfile::tempdir().unwrap();
        let handler = handler_over(
            tasks(),
            config(Some(dir.path())).with_batch_limit(BatchLimit::Rows(1)),
        );
        let (ctx, last, directory) = prepared_download(&handler);
        let barrier = Barrier::new(READERS);

        let parts: Vec<_> = thread::scope(|s| {
            let workers: Vec<_> = (0..READERS)
                .map(|_| {
                    let request = GetMoreChangesRequest {
                        context: ctx.clone(),
                        index: last,
                    };
                    let handler = &handler;
                    let barrier = &barrier;
                    s.spawn(move || {
                        barrier.wait();
                        handler.get_more_changes(None, request)
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|w| w.join().unwrap().unwrap().part)
                .collect()
        });

        assert!(parts.iter().all(|p| p.is_last && *p == parts[0]));
        assert!(!directory.exists());
    }

    #[test]
    fn ended_session_waits_for_its_readers() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler_over(
            tasks(),
            config(Some(dir.path())).with_batch_limit(BatchLimit::Rows(1)),
        );
        let (ctx, _, directory) = prepared_download(&handler);
        let session = handler.sessions().get(ctx.session_id, "default").unwrap();

        session.lock().begin_read();
        handler
            .end_download(SessionRequest {
                context: ctx.clone(),
            })
            .unwrap();
        assert!(directory.exists());

        let mut cache = session.lock();
        cache.end_read();
        assert!(cache.release_download());
        drop(cache);
        assert!(!directory.exists());
    }

    #[test]
    fn failed_apply_keeps_the_upload_for_a_retry() {
        let store = FlakyStore {
            inner: tasks(),
            fail_next: AtomicBool::new(true),
        };
        let handler = handler_over(store, config(None));
        let ctx = SyncContext::new("default");
        handler
            .ensure_scopes(EnsureScopeRequest { context: ctx.clone() }, false)
            .unwrap();

        let upload = upload_of(&ctx, 4);
        assert!(matches!(
            handler.send_changes(None, upload.clone()),
            Err(ServerError::Provider { .. })
        ));
        let session = handler.sessions().get(ctx.session_id, "default").unwrap();
        assert!(session.lock().upload.is_some());
        assert!(session.lock().changes.is_none());

        let response = handler.send_changes(None, upload).unwrap();
        assert_eq!(response.parts_received, 1);
        assert!(session.lock().upload.is_none());
        let provider = &handler.orchestrator().base().provider().inner;
        assert_eq!(provider.row_count("Task").unwrap(), 4);
    }
}
