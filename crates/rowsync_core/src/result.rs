//! Outcome of a synchronization attempt.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Counters reported after a synchronization attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Session identifier.
    pub session_id: Uuid,
    /// Scope name.
    pub scope_name: String,
    /// When the attempt started.
    pub started_at: SystemTime,
    /// When the attempt completed.
    pub completed_at: SystemTime,
    /// Local rows sent to the server.
    pub total_changes_uploaded: u64,
    /// Rows received from the server, snapshot included.
    pub total_changes_downloaded: u64,
    /// Rows written locally.
    pub total_changes_applied: u64,
    /// Rows written on the server.
    pub total_changes_applied_on_server: u64,
    /// Conflicts resolved on either side.
    pub total_resolved_conflicts: u64,
    /// Rows rejected on either side.
    pub total_changes_failed: u64,
    /// Rows applied from a snapshot.
    pub snapshot_changes_applied: u64,
}

impl SyncResult {
    /// Creates an empty result starting now.
    pub fn new(session_id: Uuid, scope_name: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            session_id,
            scope_name: scope_name.into(),
            started_at: now,
            completed_at: now,
            total_changes_uploaded: 0,
            total_changes_downloaded: 0,
            total_changes_applied: 0,
            total_changes_applied_on_server: 0,
            total_resolved_conflicts: 0,
            total_changes_failed: 0,
            snapshot_changes_applied: 0,
        }
    }

    /// Stamps the completion time.
    pub fn complete(&mut self) {
        self.completed_at = SystemTime::now();
    }

    /// Wall-clock duration of the attempt.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.completed_at
            .duration_since(self.started_at)
            .unwrap_or_default()
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uploaded {}, downloaded {}, applied {} (server {}), conflicts {}, failed {} in {:?}",
            self.total_changes_uploaded,
            self.total_changes_downloaded,
            self.total_changes_applied,
            self.total_changes_applied_on_server,
            self.total_resolved_conflicts,
            self.total_changes_failed,
            self.duration()
        )
    }
}
