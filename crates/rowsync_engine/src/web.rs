//! Remote orchestrator over the step-coded HTTP protocol.

use crate::config::SyncConfig;
use crate::error::{EngineResult, Side, SyncError};
use crate::http::HttpClient;
use crate::remote::{RemoteChanges, RemoteOrchestrator};
use parking_lot::RwLock;
use rowsync_codec::{content_hash, verify_hash, ContentEncoding};
use rowsync_core::converter::{convert_incoming, convert_outgoing};
use rowsync_core::{
    BatchInfo, ConverterRegistry, DatabaseChangesSelected, RowConverter, ScopeInfo, SyncContext,
    SyncDirection, SyncStage,
};
use rowsync_protocol::{
    BatchPartPayload, ChangesSummary, EndDownloadResponse, EnsureScopeRequest,
    EnsureScopeResponse, ErrorBody, EstimatedChangesRequest, EstimatedChangesResponse,
    GetChangesRequest, GetMoreChangesRequest, GetSnapshotRequest, Headers, HttpRequest,
    PartResponse, RequestHeaders, SendChangesRequest, SendChangesResponse, SerializationHeader,
    SessionRequest, SnapshotResponse, StepCode, StepMessage, HEADER_ACCEPT_ENCODING,
    HEADER_CONTENT_ENCODING, HEADER_HASH,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Encodings offered on every request.
const ACCEPT_ENCODING: &str = "gzip, deflate";

/// Where downloaded parts come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartSource {
    /// The session's download batch, released once the last part is served.
    Changes,
    /// The scope's pre-built snapshot.
    Snapshot,
}

/// A remote orchestrator that talks to a `WebServer` through an
/// [`HttpClient`].
///
/// Every step body is hashed and every response is verified before it is
/// decoded. Retryable failures are retried per the configured
/// [`RetryPolicy`](crate::RetryPolicy); a lost session never is.
pub struct WebRemoteOrchestrator<C: HttpClient> {
    client: C,
    config: SyncConfig,
    converter: Option<Arc<dyn RowConverter>>,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> WebRemoteOrchestrator<C> {
    /// Creates a web orchestrator using the built-in converters.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the configured converter key is unknown.
    pub fn new(client: C, config: SyncConfig) -> EngineResult<Self> {
        Self::with_converters(client, config, &ConverterRegistry::with_builtins())
    }

    /// Creates a web orchestrator resolving the converter from `registry`.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the configured converter key is unknown.
    pub fn with_converters(
        client: C,
        config: SyncConfig,
        registry: &ConverterRegistry,
    ) -> EngineResult<Self> {
        let converter = config
            .converter
            .as_deref()
            .map(|key| registry.get(key))
            .transpose()
            .map_err(|e| SyncError::Protocol(e.to_string()))?;
        Ok(Self {
            client,
            config,
            converter,
            last_error: RwLock::new(None),
        })
    }

    /// The HTTP client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn set_error(&self, err: &SyncError) {
        *self.last_error.write() = Some(err.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.write() = None;
    }

    /// Sends one step, retrying per the retry policy.
    fn send<Req: StepMessage, Res: StepMessage>(
        &self,
        step: StepCode,
        request: &Req,
    ) -> EngineResult<Res> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            match self.send_once(step, request) {
                Ok(response) => {
                    self.clear_error();
                    return Ok(response);
                }
                Err(e) => {
                    self.set_error(&e);
                    if !retry.should_retry(&e, attempt) {
                        return Err(e);
                    }
                    attempt += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(%step, attempt, error = %e, ?delay, "retrying step");
                    std::thread::sleep(delay);
                }
            }
        }
    }

    fn send_once<Req: StepMessage, Res: StepMessage>(
        &self,
        step: StepCode,
        request: &Req,
    ) -> EngineResult<Res> {
        if !self.client.is_healthy() {
            return Err(SyncError::transport_retryable("HTTP client is not connected"));
        }
        let ctx = request.context();
        let format = self.config.format;
        let body = request.encode(format)?;

        let mut http = HttpRequest {
            headers: Headers::new(),
            body: Vec::new(),
        };
        RequestHeaders {
            session_id: Some(ctx.session_id),
            scope_name: ctx.scope_name.clone(),
            step,
            serialization: SerializationHeader::new(format, self.config.batch_size()),
            converter: self.converter.as_ref().map(|c| c.key().to_string()),
            hash: Some(content_hash(&body)),
        }
        .write_to(&mut http.headers)?;
        http.headers.insert(HEADER_ACCEPT_ENCODING, ACCEPT_ENCODING);
        http.body = body;

        debug!(session_id = %ctx.session_id, %step, bytes = http.body.len(), "sending step");
        let response = self.client.post(&self.config.server_url, http, self.config.timeout)?;
        let success = response.is_success();
        let status = response.status;

        let body = match response.headers.get(HEADER_CONTENT_ENCODING) {
            Some(name) => ContentEncoding::from_name(name)?.decompress(&response.body)?,
            None => response.body.clone(),
        };

        if !success {
            let error: ErrorBody = serde_json::from_slice(&body).map_err(|e| {
                SyncError::Protocol(format!("HTTP {status} with unreadable error body: {e}"))
            })?;
            return Err(SyncError::from_error_body(error));
        }

        match response.headers.get(HEADER_HASH) {
            Some(expected) if verify_hash(&body, expected) => {}
            Some(_) => {
                return Err(SyncError::Integrity(format!(
                    "{step} response failed hash verification"
                )))
            }
            None => {
                return Err(SyncError::Integrity(format!("{step} response carries no hash")))
            }
        }

        Ok(Res::decode(format, &body)?)
    }

    fn local_error(ctx: &SyncContext, e: rowsync_core::CoreError) -> SyncError {
        SyncError::provider(ctx.stage, Side::Local, e)
    }

    /// Uploads every part of a client batch, last part last.
    fn upload(
        &self,
        ctx: &mut SyncContext,
        client_scope: &ScopeInfo,
        batch: &BatchInfo,
    ) -> EngineResult<()> {
        ctx.direction = SyncDirection::Upload;
        for info in batch.parts_in_order() {
            let mut container = batch
                .load_part(info.index)
                .map_err(|e| Self::local_error(ctx, e))?;
            if let Some(converter) = &self.converter {
                convert_outgoing(converter.as_ref(), &mut container, &batch.sanitized_schema)
                    .map_err(|e| Self::local_error(ctx, e))?;
            }
            let request = SendChangesRequest {
                context: ctx.clone(),
                client_scope: client_scope.clone(),
                part: BatchPartPayload {
                    index: info.index,
                    is_last: info.is_last,
                    container,
                },
            };
            let response: SendChangesResponse =
                self.send(StepCode::SendChangesInProgress, &request)?;
            ctx.merge_from(&response.context);
            debug!(
                session_id = %ctx.session_id,
                index = response.received_index,
                received = response.parts_received,
                "uploaded batch part"
            );
        }
        Ok(())
    }

    fn fetch_part(
        &self,
        source: PartSource,
        ctx: &mut SyncContext,
        index: u32,
    ) -> EngineResult<BatchPartPayload> {
        match source {
            PartSource::Changes => {
                let request = GetMoreChangesRequest {
                    context: ctx.clone(),
                    index,
                };
                let response: PartResponse = self.send(StepCode::GetMoreChanges, &request)?;
                ctx.merge_from(&response.context);
                Ok(response.part)
            }
            PartSource::Snapshot => {
                let request = GetSnapshotRequest {
                    context: ctx.clone(),
                    index: Some(index),
                };
                let response: SnapshotResponse = self.send(StepCode::GetSnapshot, &request)?;
                ctx.merge_from(&response.context);
                response.part.ok_or_else(|| {
                    SyncError::Protocol(format!("snapshot part {index} missing from response"))
                })
            }
        }
    }

    fn store_part(
        &self,
        ctx: &SyncContext,
        local: &mut BatchInfo,
        mut part: BatchPartPayload,
    ) -> EngineResult<()> {
        if let Some(converter) = &self.converter {
            convert_incoming(converter.as_ref(), &mut part.container, &local.sanitized_schema)
                .map_err(|e| Self::local_error(ctx, e))?;
        }
        local
            .write_part(part.index, part.container, part.is_last)
            .map_err(|e| Self::local_error(ctx, e))
    }

    /// Downloads every part described by `remote` into a local batch.
    ///
    /// Parts other than the last one are fetched concurrently, at most
    /// `download_parallelism` at a time. The last part is fetched once all
    /// others are stored.
    fn download(
        &self,
        ctx: &mut SyncContext,
        remote: &BatchInfo,
        source: PartSource,
    ) -> EngineResult<BatchInfo> {
        let mut local = match &self.config.batch_directory {
            Some(root) => BatchInfo::on_disk(
                root,
                format!("{}_download", ctx.session_id.simple()),
                remote.sanitized_schema.clone(),
                self.config.format,
            ),
            None => BatchInfo::in_memory(remote.sanitized_schema.clone(), self.config.format),
        };
        local.timestamp = remote.timestamp;

        let last = remote
            .parts_in_order()
            .find(|p| p.is_last)
            .map(|p| p.index)
            .ok_or_else(|| SyncError::Protocol("remote batch has no last part".into()))?;
        let others: Vec<u32> = remote
            .parts_in_order()
            .filter(|p| !p.is_last)
            .map(|p| p.index)
            .collect();

        for chunk in others.chunks(self.config.download_parallelism.max(1)) {
            let fetched: Vec<EngineResult<(BatchPartPayload, SyncContext)>> =
                std::thread::scope(|s| {
                    let handles: Vec<_> = chunk
                        .iter()
                        .map(|&index| {
                            let mut part_ctx = ctx.clone();
                            s.spawn(move || {
                                self.fetch_part(source, &mut part_ctx, index)
                                    .map(|part| (part, part_ctx))
                            })
                        })
                        .collect();
                    handles
                        .into_iter()
                        .map(|h| {
                            h.join().unwrap_or_else(|_| {
                                Err(SyncError::transport_fatal("download worker panicked"))
                            })
                        })
                        .collect()
                });
            for result in fetched {
                let (part, part_ctx) = result?;
                ctx.merge_from(&part_ctx);
                self.store_part(ctx, &mut local, part)?;
            }
        }

        let part = self.fetch_part(source, ctx, last)?;
        self.store_part(ctx, &mut local, part)?;
        local
            .check_last_batch()
            .map_err(|e| Self::local_error(ctx, e))?;
        debug!(
            session_id = %ctx.session_id,
            parts = local.parts.len(),
            rows = local.rows_count,
            "download complete"
        );
        Ok(local)
    }
}

impl<C: HttpClient> RemoteOrchestrator for WebRemoteOrchestrator<C> {
    fn ensure_scopes(&self, ctx: &mut SyncContext) -> EngineResult<ScopeInfo> {
        let request = EnsureScopeRequest {
            context: ctx.clone(),
        };
        let response: EnsureScopeResponse = self.send(StepCode::EnsureScopes, &request)?;
        ctx.merge_from(&response.context);
        Ok(response.server_scope)
    }

    fn ensure_schema(&self, ctx: &mut SyncContext) -> EngineResult<ScopeInfo> {
        let request = EnsureScopeRequest {
            context: ctx.clone(),
        };
        let response: EnsureScopeResponse = self.send(StepCode::EnsureSchema, &request)?;
        ctx.merge_from(&response.context);
        Ok(response.server_scope)
    }

    fn apply_then_get_changes(
        &self,
        ctx: &mut SyncContext,
        client_scope: &ScopeInfo,
        client_batch: &BatchInfo,
    ) -> EngineResult<RemoteChanges> {
        ctx.set_stage(SyncStage::ChangesUploading);
        let summary: ChangesSummary = if client_batch.has_data() {
            self.upload(ctx, client_scope, client_batch)?;
            self.send(
                StepCode::GetSummary,
                &SessionRequest {
                    context: ctx.clone(),
                },
            )?
        } else {
            self.send(
                StepCode::GetChanges,
                &GetChangesRequest {
                    context: ctx.clone(),
                    client_scope: client_scope.clone(),
                },
            )?
        };
        ctx.merge_from(&summary.context);

        ctx.set_stage(SyncStage::ChangesDownloading);
        ctx.direction = SyncDirection::Download;
        let batch = self.download(ctx, &summary.batch, PartSource::Changes)?;
        let end: EndDownloadResponse = self.send(
            StepCode::SendEndDownloadChanges,
            &SessionRequest {
                context: ctx.clone(),
            },
        )?;
        ctx.merge_from(&end.context);
        info!(
            session_id = %ctx.session_id,
            uploaded = client_batch.rows_count,
            downloaded = batch.rows_count,
            "exchanged changes with server"
        );

        Ok(RemoteChanges {
            remote_timestamp: summary.remote_timestamp,
            batch,
            selected: summary.selected,
            applied_on_server: summary.applied,
            policy: summary.policy,
        })
    }

    fn get_snapshot(&self, ctx: &mut SyncContext) -> EngineResult<Option<BatchInfo>> {
        ctx.direction = SyncDirection::Download;
        let request = GetSnapshotRequest {
            context: ctx.clone(),
            index: None,
        };
        let response: SnapshotResponse = self.send(StepCode::GetSnapshot, &request)?;
        ctx.merge_from(&response.context);
        match response.batch {
            Some(remote) => self.download(ctx, &remote, PartSource::Snapshot).map(Some),
            None => Ok(None),
        }
    }

    fn get_estimated_changes_count(
        &self,
        ctx: &mut SyncContext,
        client_scope: &ScopeInfo,
    ) -> EngineResult<DatabaseChangesSelected> {
        let request = EstimatedChangesRequest {
            context: ctx.clone(),
            client_scope: client_scope.clone(),
        };
        let response: EstimatedChangesResponse =
            self.send(StepCode::GetEstimatedChangesCount, &request)?;
        ctx.merge_from(&response.context);
        Ok(response.selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::http::LoopbackClient;
    use rowsync_protocol::{ErrorKind, HttpHandler, HttpResponse, STATUS_BAD_REQUEST, STATUS_OK};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Answers every step with a fixed scope, optionally tampering.
    struct FixedScope {
        tamper_first: u32,
        calls: AtomicU32,
    }

    impl HttpHandler for FixedScope {
        fn handle(&self, request: HttpRequest) -> HttpResponse {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let req = EnsureScopeRequest::decode(Default::default(), &request.body).unwrap();
            let body = EnsureScopeResponse {
                context: req.context,
                server_scope: ScopeInfo::new("default", Default::default()),
            }
            .encode(Default::default())
            .unwrap();
            let mut response = HttpResponse::new(STATUS_OK, body.clone());
            response.headers.insert(HEADER_HASH, content_hash(&body));
            if call < self.tamper_first {
                response.body.push(b' ');
            }
            response
        }
    }

    /// Answers like `FixedScope`, after a delay.
    struct SlowScope {
        inner: FixedScope,
        delay: std::time::Duration,
    }

    impl HttpHandler for SlowScope {
        fn handle(&self, request: HttpRequest) -> HttpResponse {
            std::thread::sleep(self.delay);
            self.inner.handle(request)
        }
    }

    struct AlwaysLost;

    impl HttpHandler for AlwaysLost {
        fn handle(&self, _request: HttpRequest) -> HttpResponse {
            let body = serde_json::to_vec(&ErrorBody::new(ErrorKind::SessionLost, "no session"))
                .unwrap();
            HttpResponse::new(STATUS_BAD_REQUEST, body)
        }
    }

    fn config(attempts: u32) -> SyncConfig {
        SyncConfig::new("default").with_retry(
            RetryPolicy::new(attempts)
                .with_initial_delay(std::time::Duration::from_millis(1))
                .with_jitter(false),
        )
    }

    #[test]
    fn tampered_response_is_retried() {
        let handler = FixedScope {
            tamper_first: 1,
            calls: AtomicU32::new(0),
        };
        let remote = WebRemoteOrchestrator::new(LoopbackClient::new(handler), config(3)).unwrap();
        let mut ctx = SyncContext::new("default");
        let scope = remote.ensure_scopes(&mut ctx).unwrap();
        assert_eq!(scope.name, "default");
        assert_eq!(remote.client().handler().calls.load(Ordering::SeqCst), 2);
        assert!(remote.last_error().is_none());
    }

    #[test]
    fn tampered_response_is_never_trusted() {
        let handler = FixedScope {
            tamper_first: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let remote = WebRemoteOrchestrator::new(LoopbackClient::new(handler), config(2)).unwrap();
        let mut ctx = SyncContext::new("default");
        let err = remote.ensure_scopes(&mut ctx).unwrap_err();
        assert!(matches!(err, SyncError::Integrity(_)));
        assert!(remote.last_error().is_some());
    }

    #[test]
    fn request_deadline_is_applied_and_retried() {
        let handler = SlowScope {
            inner: FixedScope {
                tamper_first: 0,
                calls: AtomicU32::new(0),
            },
            delay: std::time::Duration::from_millis(30),
        };
        let config = config(2).with_timeout(std::time::Duration::from_millis(5));
        let remote = WebRemoteOrchestrator::new(LoopbackClient::new(handler), config).unwrap();
        let mut ctx = SyncContext::new("default");
        let err = remote.ensure_scopes(&mut ctx).unwrap_err();
        assert!(matches!(err, SyncError::Timeout));
        assert_eq!(remote.client().handler().inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn session_lost_is_not_retried() {
        let remote = WebRemoteOrchestrator::new(LoopbackClient::new(AlwaysLost), config(5)).unwrap();
        let mut ctx = SyncContext::new("default");
        let err = remote
            .get_snapshot(&mut ctx)
            .unwrap_err();
        assert!(err.is_session_lost());
    }

    #[test]
    fn unknown_converter_is_rejected() {
        let config = SyncConfig::new("default").with_converter("rot13");
        let result = WebRemoteOrchestrator::new(LoopbackClient::new(AlwaysLost), config);
        assert!(matches!(result, Err(SyncError::Protocol(_))));
    }
}
