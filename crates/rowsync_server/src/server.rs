//! The web server: request framing around the step handlers.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;
use crate::session::SessionStore;
use rowsync_codec::{content_hash, verify_hash, ContentEncoding, SerializationFormat};
use rowsync_core::{
    BatchInfo, ConverterRegistry, CoreProvider, ServerOrchestrator, SyncConflict, SyncContext,
};
use rowsync_protocol::{
    ErrorKind, Headers, HttpHandler, HttpRequest, HttpResponse, RequestHeaders, StepCode,
    StepMessage, HEADER_ACCEPT_ENCODING, HEADER_CONTENT_ENCODING, HEADER_ERROR, HEADER_HASH,
    HEADER_SERIALIZATION_FORMAT, HEADER_SESSION_ID, STATUS_BAD_REQUEST, STATUS_OK,
};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// The sync web server.
///
/// Transport-neutral: a host hands it every POST to the sync endpoint as
/// an [`HttpRequest`] and sends back the [`HttpResponse`]. Tests place it
/// behind a loopback client.
///
/// # Example
///
/// ```
/// use rowsync_core::MemoryProvider;
/// use rowsync_server::{ServerConfig, WebServer};
/// use std::sync::Arc;
///
/// let server = WebServer::new(Arc::new(MemoryProvider::new("server")), ServerConfig::default());
/// assert!(server.sessions().is_empty());
/// ```
pub struct WebServer<P: CoreProvider + ?Sized> {
    handler: RequestHandler<P>,
    converters: ConverterRegistry,
}

impl<P: CoreProvider + ?Sized> WebServer<P> {
    /// Creates a server over a store.
    pub fn new(provider: Arc<P>, config: ServerConfig) -> Self {
        let orchestrator = Arc::new(ServerOrchestrator::new(provider, config.server_options()));
        Self::with_orchestrator(orchestrator, config)
    }

    /// Creates a server sharing an existing orchestrator.
    pub fn with_orchestrator(orchestrator: Arc<ServerOrchestrator<P>>, config: ServerConfig) -> Self {
        Self {
            handler: RequestHandler::new(orchestrator, config),
            converters: ConverterRegistry::with_builtins(),
        }
    }

    /// Replaces the converters clients may name.
    pub fn with_converters(mut self, converters: ConverterRegistry) -> Self {
        self.converters = converters;
        self
    }

    /// Sends every conflict resolved on uploads to `sender`.
    pub fn with_conflict_log(mut self, sender: Sender<SyncConflict>) -> Self {
        self.handler.set_conflict_log(sender);
        self
    }

    /// The step handlers.
    pub fn handler(&self) -> &RequestHandler<P> {
        &self.handler
    }

    /// The server orchestrator.
    pub fn orchestrator(&self) -> &Arc<ServerOrchestrator<P>> {
        self.handler.orchestrator()
    }

    /// Live sessions.
    pub fn sessions(&self) -> &SessionStore {
        self.handler.sessions()
    }

    /// Drops expired sessions. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        self.handler.sessions().sweep()
    }

    /// Builds the snapshot of a scope, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns a provider error, or one for a server without a snapshot
    /// directory.
    pub fn create_snapshot(&self, scope_name: &str) -> ServerResult<BatchInfo> {
        let mut ctx = SyncContext::new(scope_name);
        self.orchestrator()
            .create_snapshot(&mut ctx)
            .map_err(|e| ServerError::provider(ctx.stage, e))
    }

    /// Serves one request.
    pub fn process(&self, request: HttpRequest) -> HttpResponse {
        let headers = match RequestHeaders::parse(&request.headers) {
            Ok(headers) => headers,
            Err(e) => return self.error_response(None, &ServerError::from(e)),
        };
        match self.serve(&headers, &request) {
            Ok(body) => self.ok_response(&headers, &request.headers, body),
            Err(e) => self.error_response(Some(&headers), &e),
        }
    }

    fn serve(&self, headers: &RequestHeaders, request: &HttpRequest) -> ServerResult<Vec<u8>> {
        let body = match request.headers.get(HEADER_CONTENT_ENCODING) {
            Some(name) => ContentEncoding::from_name(name)?.decompress(&request.body)?,
            None => request.body.clone(),
        };
        if let Some(expected) = &headers.hash {
            if !verify_hash(&body, expected) {
                return Err(ServerError::Integrity(format!(
                    "{} request failed hash verification",
                    headers.step
                )));
            }
        }

        let format = headers.format()?;
        let converter = match &headers.converter {
            Some(key) => Some(
                self.converters
                    .get(key)
                    .map_err(|e| ServerError::InvalidRequest(e.to_string()))?,
            ),
            None => None,
        };
        let converter = converter.as_deref();
        debug!(step = %headers.step, bytes = body.len(), "serving step");

        let handler = &self.handler;
        match headers.step {
            StepCode::EnsureScopes | StepCode::EnsureSchema => {
                let refresh = headers.step == StepCode::EnsureSchema;
                let request = decode(headers, format, &body)?;
                encode(format, &handler.ensure_scopes(request, refresh)?)
            }
            StepCode::SendChangesInProgress => {
                let request = decode(headers, format, &body)?;
                encode(format, &handler.send_changes(converter, request)?)
            }
            StepCode::GetSummary => {
                let request = decode(headers, format, &body)?;
                encode(format, &handler.get_summary(request)?)
            }
            StepCode::GetChanges => {
                let request = decode(headers, format, &body)?;
                encode(format, &handler.get_changes(request)?)
            }
            StepCode::GetMoreChanges => {
                let request = decode(headers, format, &body)?;
                encode(format, &handler.get_more_changes(converter, request)?)
            }
            StepCode::GetSnapshot => {
                let request = decode(headers, format, &body)?;
                encode(format, &handler.get_snapshot(converter, request)?)
            }
            StepCode::SendEndDownloadChanges => {
                let request = decode(headers, format, &body)?;
                encode(format, &handler.end_download(request)?)
            }
            StepCode::GetEstimatedChangesCount => {
                let request = decode(headers, format, &body)?;
                encode(format, &handler.estimated_changes(request)?)
            }
        }
    }

    fn ok_response(&self, headers: &RequestHeaders, raw: &Headers, body: Vec<u8>) -> HttpResponse {
        let mut response = HttpResponse::new(STATUS_OK, Vec::new());
        response.headers.insert(HEADER_HASH, content_hash(&body));
        if let Some(id) = headers.session_id {
            response.headers.insert(HEADER_SESSION_ID, id.to_string());
        }
        if let Ok(value) = headers.serialization.to_header_value() {
            response.headers.insert(HEADER_SERIALIZATION_FORMAT, value);
        }
        response.body = self.compress(raw, &mut response.headers, body);
        response
    }

    fn error_response(&self, headers: Option<&RequestHeaders>, error: &ServerError) -> HttpResponse {
        let data_source = self.orchestrator().base().provider().data_source();
        let body = error.to_error_body(Some(&data_source));
        let step = headers.map(|h| h.step.to_string()).unwrap_or_default();
        let session_id = headers.and_then(|h| h.session_id);

        if error.is_server_error() {
            error!(%step, session_id = ?session_id, error = %error, "step failed");
        } else {
            warn!(%step, session_id = ?session_id, error = %error, "step rejected");
        }
        if error.kind() == ErrorKind::SessionLost {
            if let Some(id) = session_id {
                self.sessions().remove(id);
            }
        }

        let bytes = match serde_json::to_vec(&body) {
            Ok(bytes) => bytes,
            Err(e) => format!(r#"{{"message":"{e}","type_name":"internal"}}"#).into_bytes(),
        };
        let mut response = HttpResponse::new(STATUS_BAD_REQUEST, bytes);
        response.headers.insert(HEADER_ERROR, error.kind().key());
        if let Some(id) = session_id {
            response.headers.insert(HEADER_SESSION_ID, id.to_string());
        }
        response
    }

    fn compress(&self, raw: &Headers, headers: &mut Headers, body: Vec<u8>) -> Vec<u8> {
        if !self.handler.config().compression {
            return body;
        }
        let Some(encoding) = raw.get(HEADER_ACCEPT_ENCODING).and_then(ContentEncoding::negotiate) else {
            return body;
        };
        match encoding.compress(&body) {
            Ok(compressed) => {
                headers.insert(HEADER_CONTENT_ENCODING, encoding.name());
                compressed
            }
            Err(e) => {
                warn!(encoding = encoding.name(), error = %e, "compression failed, sending identity");
                body
            }
        }
    }
}

impl<P: CoreProvider + ?Sized> HttpHandler for WebServer<P> {
    fn handle(&self, request: HttpRequest) -> HttpResponse {
        self.process(request)
    }
}

/// Decodes a step body and checks it belongs to the framed session.
fn decode<M: StepMessage>(
    headers: &RequestHeaders,
    format: SerializationFormat,
    body: &[u8],
) -> ServerResult<M> {
    let message = M::decode(format, body)?;
    let ctx = message.context();
    if let Some(id) = headers.session_id {
        if id != ctx.session_id {
            return Err(ServerError::InvalidRequest(format!(
                "session header {id} does not match body session {}",
                ctx.session_id
            )));
        }
    }
    if ctx.scope_name != headers.scope_name {
        return Err(ServerError::InvalidRequest(format!(
            "scope header {} does not match body scope {}",
            headers.scope_name, ctx.scope_name
        )));
    }
    Ok(message)
}

fn encode<M: StepMessage>(format: SerializationFormat, message: &M) -> ServerResult<Vec<u8>> {
    Ok(message.encode(format)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_codec::Value;
    use rowsync_core::{
        ContainerSet, DataType, MemoryProvider, RowState, ScopeInfo, SyncColumn, SyncRow, SyncSet,
        SyncSetup, SyncTable,
    };
    use rowsync_protocol::{
        BatchPartPayload, EnsureScopeRequest, EnsureScopeResponse, ErrorBody, GetMoreChangesRequest,
        SendChangesRequest, SerializationHeader,
    };

    fn customer_schema() -> SyncSet {
        let mut table = SyncTable::new("Customer");
        table.add_column(SyncColumn::new("Id", DataType::Integer)).unwrap();
        table
            .add_column(SyncColumn::new("Name", DataType::Text).nullable(true))
            .unwrap();
        table.set_primary_keys(["Id"]).unwrap();
        SyncSet::new().with_table(table).unwrap()
    }

    fn server() -> WebServer<MemoryProvider> {
        let provider = MemoryProvider::with_schema("server", &customer_schema()).unwrap();
        provider
            .upsert("Customer", vec![Value::Integer(1), Value::Text("Ada".into())])
            .unwrap();
        let config = ServerConfig::default().with_setup(SyncSetup::new(["Customer"]));
        WebServer::new(Arc::new(provider), config)
    }

    fn request<M: StepMessage>(step: StepCode, message: &M) -> HttpRequest {
        let format = SerializationFormat::default();
        let body = message.encode(format).unwrap();
        let ctx = message.context();
        let mut headers = Headers::new();
        RequestHeaders {
            session_id: Some(ctx.session_id),
            scope_name: ctx.scope_name.clone(),
            step,
            serialization: SerializationHeader::new(format, 0),
            converter: None,
            hash: Some(content_hash(&body)),
        }
        .write_to(&mut headers)
        .unwrap();
        HttpRequest { headers, body }
    }

    fn error_of(response: &HttpResponse) -> ErrorBody {
        assert_eq!(response.status, STATUS_BAD_REQUEST);
        serde_json::from_slice(&response.body).unwrap()
    }

    #[test]
    fn ensure_scopes_opens_a_session() {
        let server = server();
        let ctx = SyncContext::new("default");
        let response = server.process(request(
            StepCode::EnsureScopes,
            &EnsureScopeRequest { context: ctx.clone() },
        ));
        assert!(response.is_success());
        assert!(verify_hash(&response.body, response.headers.get(HEADER_HASH).unwrap()));
        let decoded =
            EnsureScopeResponse::decode(SerializationFormat::default(), &response.body).unwrap();
        assert_eq!(decoded.server_scope.name, "default");
        assert!(decoded.server_scope.schema.is_some());
        assert_eq!(server.sessions().len(), 1);
    }

    #[test]
    fn tampered_request_is_rejected() {
        let server = server();
        let mut http = request(
            StepCode::EnsureScopes,
            &EnsureScopeRequest {
                context: SyncContext::new("default"),
            },
        );
        http.body.push(b' ');
        let response = server.process(http);
        assert_eq!(response.headers.get(HEADER_ERROR), Some("integrity"));
        assert_eq!(error_of(&response).type_name, ErrorKind::Integrity);
    }

    #[test]
    fn unknown_session_is_lost() {
        let server = server();
        let response = server.process(request(
            StepCode::GetMoreChanges,
            &GetMoreChangesRequest {
                context: SyncContext::new("default"),
                index: 0,
            },
        ));
        let body = error_of(&response);
        assert_eq!(body.type_name, ErrorKind::SessionLost);
        assert_eq!(response.headers.get(HEADER_ERROR), Some(ErrorKind::SessionLost.key()));
    }

    #[test]
    fn missing_step_header_is_a_protocol_error() {
        let server = server();
        let response = server.process(HttpRequest::default());
        assert_eq!(error_of(&response).type_name, ErrorKind::Protocol);
    }

    #[test]
    fn session_step_without_session_header_is_a_protocol_error() {
        let server = server();
        let message = GetMoreChangesRequest {
            context: SyncContext::new("default"),
            index: 0,
        };
        let format = SerializationFormat::default();
        let body = message.encode(format).unwrap();
        let mut headers = Headers::new();
        RequestHeaders {
            session_id: None,
            scope_name: "default".into(),
            step: StepCode::GetMoreChanges,
            serialization: SerializationHeader::new(format, 0),
            converter: None,
            hash: Some(content_hash(&body)),
        }
        .write_to(&mut headers)
        .unwrap();

        let response = server.process(HttpRequest { headers, body });
        assert_eq!(error_of(&response).type_name, ErrorKind::Protocol);
        assert_eq!(response.headers.get(HEADER_ERROR), Some(ErrorKind::Protocol.key()));
        assert!(response.headers.get(HEADER_SESSION_ID).is_none());
        assert!(server.sessions().is_empty());
    }

    #[test]
    fn mismatched_session_header_is_rejected() {
        let server = server();
        let mut http = request(
            StepCode::EnsureScopes,
            &EnsureScopeRequest {
                context: SyncContext::new("default"),
            },
        );
        http.headers
            .insert(HEADER_SESSION_ID, uuid::Uuid::new_v4().to_string());
        let response = server.process(http);
        assert_eq!(error_of(&response).type_name, ErrorKind::Protocol);
    }

    #[test]
    fn responses_are_compressed_on_request() {
        let server = server();
        let mut http = request(
            StepCode::EnsureScopes,
            &EnsureScopeRequest {
                context: SyncContext::new("default"),
            },
        );
        http.headers.insert(HEADER_ACCEPT_ENCODING, "gzip");
        let response = server.process(http);
        assert_eq!(response.headers.get(HEADER_CONTENT_ENCODING), Some("gzip"));
        let plain = ContentEncoding::Gzip.decompress(&response.body).unwrap();
        assert!(verify_hash(&plain, response.headers.get(HEADER_HASH).unwrap()));
    }

    #[test]
    fn single_part_upload_is_applied() {
        let server = server();
        let ctx = SyncContext::new("default");
        let open = server.process(request(
            StepCode::EnsureScopes,
            &EnsureScopeRequest { context: ctx.clone() },
        ));
        assert!(open.is_success());

        let client_scope = ScopeInfo::new("default", SyncSetup::new(["Customer"]));
        let schema = customer_schema();
        let table = &schema.tables()[0];
        let row = SyncRow::from_values(
            table,
            RowState::Modified,
            vec![Value::Integer(2), Value::Text("Grace".into())],
        )
        .unwrap();
        let mut container = ContainerSet::new();
        container.push(&table.key(), row.into_buffer());
        let upload = SendChangesRequest {
            context: ctx.clone(),
            client_scope,
            part: BatchPartPayload {
                index: 0,
                is_last: true,
                container,
            },
        };
        let response = server.process(request(StepCode::SendChangesInProgress, &upload));
        assert!(response.is_success(), "{:?}", String::from_utf8_lossy(&response.body));
        let provider = server.orchestrator().base().provider();
        assert!(provider.row("Customer", vec![Value::Integer(2)]).unwrap().is_some());
        assert_eq!(provider.row_count("Customer").unwrap(), 2);

        // Resending the last part answers without applying twice.
        let again = server.process(request(StepCode::SendChangesInProgress, &upload));
        assert!(again.is_success());
    }
}
