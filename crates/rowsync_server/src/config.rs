//! Server configuration.

use rowsync_codec::SerializationFormat;
use rowsync_core::{BatchLimit, BatchOptions, ConflictPolicy, ServerOptions, SyncSetup};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the web server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Tables exposed by every scope the server creates; empty exposes all.
    pub setup: SyncSetup,
    /// Capacity of one download batch part.
    pub batch_limit: BatchLimit,
    /// Root for disk-backed upload and download batches; `None` keeps them
    /// in memory.
    pub batch_directory: Option<PathBuf>,
    /// Codec of batch part files.
    pub batch_format: SerializationFormat,
    /// Root of pre-built snapshots, one directory per scope.
    pub snapshot_directory: Option<PathBuf>,
    /// Conflict policy applied to uploads.
    pub policy: ConflictPolicy,
    /// Idle time after which a session is dropped.
    pub session_ttl: Duration,
    /// Maximum number of live sessions.
    pub max_sessions: usize,
    /// Whether response bodies are compressed when the client accepts it.
    pub compression: bool,
}

impl ServerConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self {
            setup: SyncSetup::default(),
            batch_limit: BatchLimit::default(),
            batch_directory: None,
            batch_format: SerializationFormat::Json,
            snapshot_directory: None,
            policy: ConflictPolicy::default(),
            session_ttl: Duration::from_secs(600),
            max_sessions: 1000,
            compression: true,
        }
    }

    /// Sets the tables exposed by new scopes.
    pub fn with_setup(mut self, setup: SyncSetup) -> Self {
        self.setup = setup;
        self
    }

    /// Sets the batch part capacity.
    pub fn with_batch_limit(mut self, limit: BatchLimit) -> Self {
        self.batch_limit = limit.clamped();
        self
    }

    /// Sets the batch directory.
    pub fn with_batch_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.batch_directory = Some(dir.into());
        self
    }

    /// Sets the codec of batch part files.
    pub fn with_batch_format(mut self, format: SerializationFormat) -> Self {
        self.batch_format = format;
        self
    }

    /// Sets the snapshot directory.
    pub fn with_snapshot_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_directory = Some(dir.into());
        self
    }

    /// Sets the conflict policy.
    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the session idle timeout.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Sets the maximum number of live sessions; at least 1.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max.max(1);
        self
    }

    /// Enables or disables response compression.
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Options of the server orchestrator.
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            setup: self.setup.clone(),
            policy: self.policy,
            batch: BatchOptions {
                limit: self.batch_limit,
                directory: self.batch_directory.clone(),
                format: self.batch_format,
            },
            snapshot_directory: self.snapshot_directory.clone(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
