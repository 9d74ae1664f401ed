//! Header names and transport-neutral request/response framing.

use crate::error::{ProtocolError, ProtocolResult};
use crate::step::StepCode;
use rowsync_codec::SerializationFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Session identifier header.
pub const HEADER_SESSION_ID: &str = "x-sync-session-id";
/// Scope name header.
pub const HEADER_SCOPE_NAME: &str = "x-sync-scope-name";
/// Step code header.
pub const HEADER_STEP: &str = "x-sync-step";
/// Serialization format header, a JSON object `{"f": key, "s": batch size}`.
pub const HEADER_SERIALIZATION_FORMAT: &str = "x-sync-serialization-format";
/// Optional data converter key.
pub const HEADER_CONVERTER: &str = "x-sync-converter";
/// Hex SHA-256 digest of the uncompressed body.
pub const HEADER_HASH: &str = "x-sync-hash";
/// Error class of a failed step.
pub const HEADER_ERROR: &str = "x-sync-error";
/// Standard accept-encoding header.
pub const HEADER_ACCEPT_ENCODING: &str = "accept-encoding";
/// Standard content-encoding header.
pub const HEADER_CONTENT_ENCODING: &str = "content-encoding";

/// HTTP status of a successful step.
pub const STATUS_OK: u16 = 200;
/// HTTP status of a failed step.
pub const STATUS_BAD_REQUEST: u16 = 400;

/// Value of the serialization format header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializationHeader {
    /// Format key.
    pub f: String,
    /// Batch size the client works with.
    pub s: usize,
}

impl SerializationHeader {
    /// Creates a header value for a format.
    pub fn new(format: SerializationFormat, batch_size: usize) -> Self {
        Self {
            f: format.key().to_string(),
            s: batch_size,
        }
    }

    /// Resolves the format key.
    ///
    /// # Errors
    ///
    /// Returns `UnknownFormat` for an unregistered key.
    pub fn format(&self) -> ProtocolResult<SerializationFormat> {
        Ok(SerializationFormat::from_key(&self.f)?)
    }

    /// Renders the header value.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON encoding fails.
    pub fn to_header_value(&self) -> ProtocolResult<String> {
        serde_json::to_string(self)
            .map_err(|e| ProtocolError::invalid_header(HEADER_SERIALIZATION_FORMAT, e.to_string()))
    }

    /// Parses a header value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHeader` if the value is not the expected object.
    pub fn from_header_value(value: &str) -> ProtocolResult<Self> {
        serde_json::from_str(value)
            .map_err(|e| ProtocolError::invalid_header(HEADER_SERIALIZATION_FORMAT, e.to_string()))
    }
}

/// Header map with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header, replacing any previous value.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Reads a header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Removes a header.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    /// Iterates over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A POST request to the sync endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request headers.
    pub headers: Headers,
    /// Raw body, possibly compressed.
    pub body: Vec<u8>,
}

/// A response from the sync endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Headers,
    /// Raw body, possibly compressed.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with an empty header map.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body,
        }
    }

    /// Returns true for a 2xx status.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that answers sync requests, such as a web server or a test
/// double placed behind a loopback client.
pub trait HttpHandler: Send + Sync {
    /// Handles one request.
    fn handle(&self, request: HttpRequest) -> HttpResponse;
}

impl<H: HttpHandler + ?Sized> HttpHandler for std::sync::Arc<H> {
    fn handle(&self, request: HttpRequest) -> HttpResponse {
        (**self).handle(request)
    }
}

/// The protocol headers of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHeaders {
    /// Session id; absent only on a handshake step.
    pub session_id: Option<Uuid>,
    /// Scope name.
    pub scope_name: String,
    /// Step.
    pub step: StepCode,
    /// Body codec and client batch size.
    pub serialization: SerializationHeader,
    /// Converter key.
    pub converter: Option<String>,
    /// Digest of the uncompressed body.
    pub hash: Option<String>,
}

impl RequestHeaders {
    /// Parses the protocol headers of a request.
    ///
    /// # Errors
    ///
    /// Returns `MissingHeader`, `InvalidHeader` or `UnknownStep`.
    pub fn parse(headers: &Headers) -> ProtocolResult<Self> {
        let scope_name = headers
            .get(HEADER_SCOPE_NAME)
            .filter(|s| !s.trim().is_empty())
            .ok_or(ProtocolError::MissingHeader(HEADER_SCOPE_NAME))?
            .to_string();

        let raw_step = headers
            .get(HEADER_STEP)
            .ok_or(ProtocolError::MissingHeader(HEADER_STEP))?;
        let step = raw_step
            .trim()
            .parse::<u8>()
            .ok()
            .and_then(StepCode::from_code)
            .ok_or_else(|| ProtocolError::UnknownStep(raw_step.to_string()))?;

        let session_id = headers
            .get(HEADER_SESSION_ID)
            .map(|v| {
                Uuid::parse_str(v.trim())
                    .map_err(|e| ProtocolError::invalid_header(HEADER_SESSION_ID, e.to_string()))
            })
            .transpose()?;
        if session_id.is_none() && !step.starts_session() {
            return Err(ProtocolError::MissingHeader(HEADER_SESSION_ID));
        }

        let serialization = match headers.get(HEADER_SERIALIZATION_FORMAT) {
            Some(value) => SerializationHeader::from_header_value(value)?,
            None => SerializationHeader::new(SerializationFormat::default(), 0),
        };
        serialization.format()?;

        Ok(Self {
            session_id,
            scope_name,
            step,
            serialization,
            converter: headers.get(HEADER_CONVERTER).map(str::to_string),
            hash: headers.get(HEADER_HASH).map(str::to_string),
        })
    }

    /// Writes the protocol headers into a header map.
    ///
    /// # Errors
    ///
    /// Returns an error if the serialization header cannot be rendered.
    pub fn write_to(&self, headers: &mut Headers) -> ProtocolResult<()> {
        if let Some(id) = self.session_id {
            headers.insert(HEADER_SESSION_ID, id.to_string());
        }
        headers.insert(HEADER_SCOPE_NAME, self.scope_name.clone());
        headers.insert(HEADER_STEP, self.step.to_code().to_string());
        headers.insert(
            HEADER_SERIALIZATION_FORMAT,
            self.serialization.to_header_value()?,
        );
        if let Some(converter) = &self.converter {
            headers.insert(HEADER_CONVERTER, converter.clone());
        }
        if let Some(hash) = &self.hash {
            headers.insert(HEADER_HASH, hash.clone());
        }
        Ok(())
    }

    /// The body codec.
    ///
    /// # Errors
    ///
    /// Returns `UnknownFormat` for an unregistered key.
    pub fn format(&self) -> ProtocolResult<SerializationFormat> {
        self.serialization.format()
    }
}
