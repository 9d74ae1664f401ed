//! Configuration for the sync engine.

use crate::error::SyncError;
use rowsync_codec::SerializationFormat;
use rowsync_core::{BatchLimit, BatchOptions, SyncType};
use std::path::PathBuf;
use std::time::Duration;

/// Default number of batch parts downloaded concurrently.
pub const DEFAULT_DOWNLOAD_PARALLELISM: usize = 4;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Scope name.
    pub scope_name: String,
    /// Server URL, used by the web orchestrator.
    pub server_url: String,
    /// Mode of the next attempt.
    pub sync_type: SyncType,
    /// Body and batch part codec.
    pub format: SerializationFormat,
    /// Key of the row converter announced to the server.
    pub converter: Option<String>,
    /// Capacity of one batch part.
    pub batch_limit: BatchLimit,
    /// Root for disk-backed batches; `None` keeps batches in memory.
    pub batch_directory: Option<PathBuf>,
    /// Batch parts downloaded concurrently.
    pub download_parallelism: usize,
    /// Retry policy for remote calls.
    pub retry: RetryPolicy,
    /// Deadline of one request, passed to the HTTP client.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(scope_name: impl Into<String>) -> Self {
        Self {
            scope_name: scope_name.into(),
            server_url: String::new(),
            sync_type: SyncType::Normal,
            format: SerializationFormat::Json,
            converter: None,
            batch_limit: BatchLimit::default(),
            batch_directory: None,
            download_parallelism: DEFAULT_DOWNLOAD_PARALLELISM,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the server URL.
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Sets the sync type.
    pub fn with_sync_type(mut self, sync_type: SyncType) -> Self {
        self.sync_type = sync_type;
        self
    }

    /// Sets the serialization format.
    pub fn with_format(mut self, format: SerializationFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the row converter key.
    pub fn with_converter(mut self, key: impl Into<String>) -> Self {
        self.converter = Some(key.into());
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

    /// Sets the download fan-out; at least 1.
    pub fn with_download_parallelism(mut self, parallelism: usize) -> Self {
        self.download_parallelism = parallelism.max(1);
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Batch settings of the local store.
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            limit: self.batch_limit,
            directory: self.batch_directory.clone(),
            format: self.format,
        }
    }

    /// Batch size reported in the serialization header.
    pub fn batch_size(&self) -> usize {
        match self.batch_limit {
            BatchLimit::Rows(n) | BatchLimit::Bytes(n) => n,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

/// Declarative retry behavior for remote calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
    /// Decides whether an error may be retried.
    pub is_retryable: fn(&SyncError) -> bool,
}

impl RetryPolicy {
    /// Creates a new retry policy.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
            is_retryable: SyncError::is_retryable,
        }
    }

    /// Creates a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
            is_retryable: SyncError::is_retryable,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Sets the retryability predicate.
    pub fn with_predicate(mut self, is_retryable: fn(&SyncError) -> bool) -> Self {
        self.is_retryable = is_retryable;
        self
    }

    /// Returns true if a failed attempt (0-indexed) should be retried.
    ///
    /// A lost session is never retried, whatever the predicate says.
    pub fn should_retry(&self, error: &SyncError, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts && !error.is_session_lost() && (self.is_retryable)(error)
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter.
            let jitter = delay_secs * 0.25 * rand::random::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
