//! Error types for the web server.

use rowsync_core::{CoreError, SyncStage};
use rowsync_protocol::{ErrorBody, ErrorKind, ProtocolError};
use thiserror::Error;
use uuid::Uuid;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the web server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Missing or malformed protocol header.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A well-formed request the session cannot serve.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No live session matches the request.
    #[error("session {session_id} not found or expired")]
    SessionLost {
        /// Session the request named.
        session_id: Uuid,
    },

    /// The request body does not match its hash.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// The server store failed.
    #[error("provider error during {stage}: {source}")]
    Provider {
        /// Stage the session was in.
        stage: SyncStage,
        /// Underlying error.
        #[source]
        source: CoreError,
    },

    /// Body could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] rowsync_codec::CodecError),

    /// The session table is full.
    #[error("too many sessions: limit is {max}")]
    TooManySessions {
        /// Configured maximum.
        max: usize,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Wraps a store error with the stage it happened in.
    pub fn provider(stage: SyncStage, source: CoreError) -> Self {
        Self::Provider { stage, source }
    }

    /// Wire class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::Protocol(_) | ServerError::InvalidRequest(_) | ServerError::Codec(_) => {
                ErrorKind::Protocol
            }
            ServerError::SessionLost { .. } => ErrorKind::SessionLost,
            ServerError::Integrity(_) => ErrorKind::Integrity,
            // A lost batch part ends the session.
            ServerError::Provider { source, .. } if source.is_session_fatal() => {
                ErrorKind::SessionLost
            }
            ServerError::Provider { .. } => ErrorKind::Provider,
            ServerError::TooManySessions { .. } | ServerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the request was at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Protocol | ErrorKind::SessionLost | ErrorKind::Integrity
        )
    }

    /// Returns true if the server was at fault.
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Builds the error body sent to the client.
    pub fn to_error_body(&self, data_source: Option<&str>) -> ErrorBody {
        let mut body = ErrorBody::new(self.kind(), self.to_string()).with_sources(self);
        if let ServerError::Provider { stage, .. } = self {
            body = body.with_stage(stage);
            if let Some(source) = data_source {
                body = body.with_data_source(source);
            }
        }
        body
    }
}
