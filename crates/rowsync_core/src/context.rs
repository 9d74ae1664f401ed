//! Per-attempt session context.

use rowsync_codec::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Synchronization mode of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncType {
    /// Exchange changes since the last sync.
    #[default]
    Normal,
    /// Drop local rows and download everything, without uploading.
    Reinitialize,
    /// Upload every local row, then drop local rows and download everything.
    ReinitializeWithUpload,
}

impl SyncType {
    /// Returns true for either reinitialize mode.
    #[must_use]
    pub fn is_reinitialize(self) -> bool {
        !matches!(self, SyncType::Normal)
    }
}

/// Direction of the current transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncDirection {
    /// No transfer in progress.
    #[default]
    None,
    /// Client to server.
    Upload,
    /// Server to client.
    Download,
}

/// Stage of a synchronization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncStage {
    /// Not started.
    #[default]
    None,
    /// Session opened.
    BeginSession,
    /// Loading local or remote scope metadata.
    ScopeLoading,
    /// Creating store structures.
    Provisioning,
    /// Reconciling a schema mismatch.
    Migrating,
    /// Selecting changed rows.
    ChangesSelecting,
    /// Applying a snapshot.
    SnapshotApplying,
    /// Sending changes to the remote side.
    ChangesUploading,
    /// Applying received changes.
    ChangesApplying,
    /// Receiving changes from the remote side.
    ChangesDownloading,
    /// Session closed.
    EndSession,
}

impl SyncStage {
    /// Progress fraction reached once this stage starts.
    #[must_use]
    pub fn progress(self) -> f64 {
        match self {
            SyncStage::None => 0.0,
            SyncStage::BeginSession => 0.05,
            SyncStage::ScopeLoading => 0.1,
            SyncStage::Provisioning | SyncStage::Migrating => 0.2,
            SyncStage::ChangesSelecting => 0.3,
            SyncStage::SnapshotApplying => 0.4,
            SyncStage::ChangesUploading => 0.5,
            SyncStage::ChangesDownloading => 0.7,
            SyncStage::ChangesApplying => 0.8,
            SyncStage::EndSession => 1.0,
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// State of one synchronization attempt.
///
/// Travels by value with every remote call. Copies returned by the remote
/// side are merged back with [`merge_from`](Self::merge_from), never
/// swapped in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncContext {
    /// Session identifier.
    pub session_id: Uuid,
    /// Scope name.
    pub scope_name: String,
    /// Mode of this attempt.
    pub sync_type: SyncType,
    /// Current transfer direction.
    pub direction: SyncDirection,
    /// Current stage.
    pub stage: SyncStage,
    /// Progress fraction in `[0, 1]`.
    pub progress: f64,
    /// Extension properties, also used as filter parameters.
    #[serde(default)]
    pub additional_properties: BTreeMap<String, Value>,
}

impl SyncContext {
    /// Creates a context for a new session.
    pub fn new(scope_name: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            scope_name: scope_name.into(),
            sync_type: SyncType::Normal,
            direction: SyncDirection::None,
            stage: SyncStage::None,
            progress: 0.0,
            additional_properties: BTreeMap::new(),
        }
    }

    /// Moves to a stage and advances progress; progress never goes back.
    pub fn set_stage(&mut self, stage: SyncStage) {
        self.stage = stage;
        self.progress = self.progress.max(stage.progress());
    }

    /// Copies mutable fields from a remote copy of the same session.
    ///
    /// A copy from a different session is ignored.
    pub fn merge_from(&mut self, other: &SyncContext) {
        if other.session_id != self.session_id {
            return;
        }
        self.stage = other.stage;
        self.direction = other.direction;
        self.progress = self.progress.max(other.progress);
        for (key, value) in &other.additional_properties {
            self.additional_properties.insert(key.clone(), value.clone());
        }
    }
}

/// Progress notification sent on the agent's progress channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Session identifier.
    pub session_id: Uuid,
    /// Stage reached.
    pub stage: SyncStage,
    /// Transfer direction at the time of the report.
    pub direction: SyncDirection,
    /// Progress fraction.
    pub progress: f64,
    /// Short description.
    pub message: String,
}

impl SyncProgress {
    /// Snapshot of a context.
    pub fn from_context(ctx: &SyncContext, message: impl Into<String>) -> Self {
        Self {
            session_id: ctx.session_id,
            stage: ctx.stage,
            direction: ctx.direction,
            progress: ctx.progress,
            message: message.into(),
        }
    }
}
