//! Step codes of the session protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of the web session protocol, carried in `x-sync-step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepCode {
    /// Load or create the server scope, without refreshing its schema.
    EnsureScopes,
    /// Load the server scope with a freshly read schema.
    EnsureSchema,
    /// Upload one part of the client changeset.
    SendChangesInProgress,
    /// Ask for server changes without uploading anything.
    GetChanges,
    /// Download one part of the server changeset by index.
    GetMoreChanges,
    /// Read the server snapshot descriptor or one of its parts.
    GetSnapshot,
    /// Read the descriptor of the server changeset of this session.
    GetSummary,
    /// Acknowledge the end of the download; releases the session.
    SendEndDownloadChanges,
    /// Count the rows the server would send.
    GetEstimatedChangesCount,
}

impl StepCode {
    /// Every step, in code order.
    pub const ALL: [StepCode; 9] = [
        StepCode::EnsureScopes,
        StepCode::EnsureSchema,
        StepCode::SendChangesInProgress,
        StepCode::GetChanges,
        StepCode::GetMoreChanges,
        StepCode::GetSnapshot,
        StepCode::GetSummary,
        StepCode::SendEndDownloadChanges,
        StepCode::GetEstimatedChangesCount,
    ];

    /// Returns the wire code.
    pub fn to_code(self) -> u8 {
        match self {
            StepCode::EnsureScopes => 1,
            StepCode::EnsureSchema => 2,
            StepCode::SendChangesInProgress => 3,
            StepCode::GetChanges => 4,
            StepCode::GetMoreChanges => 5,
            StepCode::GetSnapshot => 6,
            StepCode::GetSummary => 7,
            StepCode::SendEndDownloadChanges => 8,
            StepCode::GetEstimatedChangesCount => 9,
        }
    }

    /// Parses a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.to_code() == code)
    }

    /// Returns true for the steps allowed to open a session.
    #[must_use]
    pub fn starts_session(self) -> bool {
        matches!(self, StepCode::EnsureScopes | StepCode::EnsureSchema)
    }
}

impl fmt::Display for StepCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
