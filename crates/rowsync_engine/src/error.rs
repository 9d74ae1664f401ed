//! Error types for the sync engine.

use rowsync_core::{CoreError, SyncStage};
use rowsync_protocol::{ErrorBody, ErrorKind, ProtocolError};
use std::fmt;
use thiserror::Error;

/// Result type for sync operations.
pub type EngineResult<T> = Result<T, SyncError>;

/// The side of a synchronization an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The caller's own store.
    Local,
    /// The counterpart store.
    Remote,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Local => f.write_str("local"),
            Side::Remote => f.write_str("remote"),
        }
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error: malformed request or response, unknown step.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A body failed hash verification.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// The server no longer holds the session; restart from the handshake.
    #[error("session lost: {0}")]
    SessionLost(String),

    /// The server reported a failure.
    #[error("remote error: {0}")]
    Remote(ErrorBody),

    /// A store failed.
    #[error("{side} provider error during {stage}: {source}")]
    Provider {
        /// Stage the session was in.
        stage: SyncStage,
        /// Side of the failing store.
        side: Side,
        /// Underlying error.
        #[source]
        source: CoreError,
    },

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] rowsync_codec::CodecError),

    /// Another attempt is already running on this agent.
    #[error("a synchronization is already in progress")]
    AlreadyInProgress,

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Wraps a store error with where it happened.
    pub fn provider(stage: SyncStage, side: Side, source: CoreError) -> Self {
        Self::Provider {
            stage,
            side,
            source,
        }
    }

    /// Maps a server error body to the matching variant.
    pub fn from_error_body(body: ErrorBody) -> Self {
        match body.type_name {
            ErrorKind::SessionLost => Self::SessionLost(body.message),
            ErrorKind::Integrity => Self::Integrity(body.message),
            ErrorKind::Protocol => Self::Protocol(body.message),
            ErrorKind::Provider | ErrorKind::Internal => Self::Remote(body),
        }
    }

    /// Returns true if this error can be retried in place.
    ///
    /// A lost session never is: the handshake must be restarted.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout | SyncError::Integrity(_) => true,
            _ => false,
        }
    }

    /// Returns true for the session lost condition.
    pub fn is_session_lost(&self) -> bool {
        matches!(self, SyncError::SessionLost(_))
    }

    /// Stage recorded on a provider error.
    pub fn stage(&self) -> Option<SyncStage> {
        match self {
            SyncError::Provider { stage, .. } => Some(*stage),
            SyncError::Remote(body) => body.stage.as_deref().and_then(parse_stage),
            _ => None,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(e: ProtocolError) -> Self {
        SyncError::Protocol(e.to_string())
    }
}

fn parse_stage(name: &str) -> Option<SyncStage> {
    [
        SyncStage::BeginSession,
        SyncStage::ScopeLoading,
        SyncStage::Provisioning,
        SyncStage::Migrating,
        SyncStage::ChangesSelecting,
        SyncStage::SnapshotApplying,
        SyncStage::ChangesUploading,
        SyncStage::ChangesApplying,
        SyncStage::ChangesDownloading,
        SyncStage::EndSession,
    ]
    .into_iter()
    .find(|s| s.to_string() == name)
}
