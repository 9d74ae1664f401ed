//! Protocol errors and the wire error body.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while framing or parsing protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A required header is absent.
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    /// A header value could not be parsed.
    #[error("invalid header {name}: {message}")]
    InvalidHeader {
        /// Header name.
        name: &'static str,
        /// Parse failure.
        message: String,
    },

    /// The step code is not part of the protocol.
    #[error("unknown step code: {0}")]
    UnknownStep(String),

    /// Body encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] rowsync_codec::CodecError),
}

impl ProtocolError {
    /// Creates an invalid header error.
    pub fn invalid_header(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            name,
            message: message.into(),
        }
    }
}

/// Class of a failed step, carried in `x-sync-error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed request; never retried.
    Protocol,
    /// The session cache is absent or expired; restart the handshake.
    SessionLost,
    /// A body failed hash verification; the step may be retried.
    Integrity,
    /// The data store failed.
    Provider,
    /// Anything else on the server.
    Internal,
}

impl ErrorKind {
    /// Header token of this kind.
    pub fn key(self) -> &'static str {
        match self {
            ErrorKind::Protocol => "protocol",
            ErrorKind::SessionLost => "session-lost",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Provider => "provider",
            ErrorKind::Internal => "internal",
        }
    }

    /// Parses a header token; unknown tokens map to `Internal`.
    pub fn from_key(key: &str) -> Self {
        match key.trim() {
            "protocol" => ErrorKind::Protocol,
            "session-lost" => ErrorKind::SessionLost,
            "integrity" => ErrorKind::Integrity,
            "provider" => ErrorKind::Provider,
            _ => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Structured body of an error response (HTTP 400).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Top-level message.
    pub message: String,
    /// Stage the session was in, if known.
    pub stage: Option<String>,
    /// Error class.
    pub type_name: ErrorKind,
    /// Identity of the store that failed, if any.
    pub data_source: Option<String>,
    /// Messages of the underlying causes, outermost first.
    #[serde(default)]
    pub inner: Vec<String>,
}

impl ErrorBody {
    /// Creates an error body of the given class.
    pub fn new(type_name: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stage: None,
            type_name,
            data_source: None,
            inner: Vec::new(),
        }
    }

    /// Sets the stage.
    pub fn with_stage(mut self, stage: impl fmt::Display) -> Self {
        self.stage = Some(stage.to_string());
        self
    }

    /// Sets the data source.
    pub fn with_data_source(mut self, data_source: impl Into<String>) -> Self {
        self.data_source = Some(data_source.into());
        self
    }

    /// Fills the inner chain from an error's sources.
    pub fn with_sources(mut self, error: &(dyn std::error::Error + 'static)) -> Self {
        let mut source = error.source();
        while let Some(e) = source {
            self.inner.push(e.to_string());
            source = e.source();
        }
        self
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)?;
        if let Some(stage) = &self.stage {
            write!(f, " (stage {stage})")?;
        }
        Ok(())
    }
}
