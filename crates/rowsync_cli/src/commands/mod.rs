//! CLI command implementations.

pub mod inspect;
pub mod verify;

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The directory holds no batch summary.
    #[error("no batch summary found in {0}")]
    NoBatch(PathBuf),

    /// Verification found problems.
    #[error("verification failed with {0} error(s)")]
    VerificationFailed(usize),

    /// Error from the batch layer.
    #[error(transparent)]
    Core(#[from] rowsync_core::CoreError),

    /// JSON output failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;
