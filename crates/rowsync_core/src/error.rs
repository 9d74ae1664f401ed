//! Error types for rowsync core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in rowsync core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] rowsync_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON summary error.
    #[error("summary error: {0}")]
    Summary(#[from] serde_json::Error),

    /// A column lookup by name failed.
    #[error("column not found: {column} in table {table}")]
    ColumnNotFound {
        /// Table that was searched.
        table: String,
        /// Column name that was not found.
        column: String,
    },

    /// A column with the same name already exists.
    #[error("duplicate column: {column} in table {table}")]
    DuplicateColumn {
        /// Table being modified.
        table: String,
        /// Conflicting column name.
        column: String,
    },

    /// A table lookup failed.
    #[error("table not found: {table}")]
    TableNotFound {
        /// Qualified table name.
        table: String,
    },

    /// A table with the same name already exists in the set.
    #[error("duplicate table: {table}")]
    DuplicateTable {
        /// Qualified table name.
        table: String,
    },

    /// The table has no primary key.
    #[error("table {table} has no primary key")]
    PrimaryKeyMissing {
        /// Qualified table name.
        table: String,
    },

    /// A row buffer does not match its table.
    #[error("invalid row for table {table}: expected {expected} values, got {actual}")]
    InvalidRow {
        /// Qualified table name.
        table: String,
        /// Expected buffer length (columns + state slot).
        expected: usize,
        /// Actual buffer length.
        actual: usize,
    },

    /// A batch part is missing from its batch directory.
    #[error("batch part {index} missing: {location}")]
    BatchPartMissing {
        /// Part index.
        index: u32,
        /// File path or batch name that was searched.
        location: String,
    },

    /// A batch part could not be decoded.
    #[error("batch part {index} corrupt: {message}")]
    BatchPartCorrupt {
        /// Part index.
        index: u32,
        /// Decoder message.
        message: String,
    },

    /// A batch descriptor is inconsistent.
    #[error("invalid batch: {message}")]
    InvalidBatch {
        /// Description of the inconsistency.
        message: String,
    },

    /// The store refused a single row.
    ///
    /// Counted as a failed row rather than aborting the apply.
    #[error("row rejected by {table}: {message}")]
    RowRejected {
        /// Qualified table name.
        table: String,
        /// Reason given by the store.
        message: String,
    },

    /// Scope metadata is missing.
    #[error("scope not found: {name}")]
    ScopeNotFound {
        /// Scope name.
        name: String,
    },

    /// Provider failure.
    #[error("provider error: {message}")]
    Provider {
        /// Description of the failure.
        message: String,
    },

    /// Migration failed.
    #[error("migration failed: {message}")]
    MigrationFailed {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a column not found error.
    pub fn column_not_found(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::ColumnNotFound {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Creates a table not found error.
    pub fn table_not_found(table: impl Into<String>) -> Self {
        Self::TableNotFound {
            table: table.into(),
        }
    }

    /// Creates a batch part missing error.
    pub fn batch_part_missing(index: u32, location: impl Into<String>) -> Self {
        Self::BatchPartMissing {
            index,
            location: location.into(),
        }
    }

    /// Creates a batch part corrupt error.
    pub fn batch_part_corrupt(index: u32, message: impl Into<String>) -> Self {
        Self::BatchPartCorrupt {
            index,
            message: message.into(),
        }
    }

    /// Creates an invalid batch error.
    pub fn invalid_batch(message: impl Into<String>) -> Self {
        Self::InvalidBatch {
            message: message.into(),
        }
    }

    /// Creates a row rejected error.
    pub fn row_rejected(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RowRejected {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Creates a provider error.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Creates a migration failed error.
    pub fn migration_failed(message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if this error invalidates the whole in-flight session.
    ///
    /// A batch part that is missing or unreadable cannot be recovered by
    /// retrying the step; the session must restart from schema negotiation.
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::BatchPartMissing { .. } | Self::BatchPartCorrupt { .. } | Self::InvalidBatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::column_not_found("dbo.Customer", "Email");
        assert_eq!(err.to_string(), "column not found: Email in table dbo.Customer");

        let err = CoreError::batch_part_missing(3, "/tmp/b/000003_Customer.json");
        assert!(err.to_string().contains("batch part 3 missing"));
    }

    #[test]
    fn session_fatal_classification() {
        assert!(CoreError::batch_part_missing(0, "x").is_session_fatal());
        assert!(CoreError::batch_part_corrupt(1, "eof").is_session_fatal());
        assert!(!CoreError::provider("down").is_session_fatal());
        assert!(!CoreError::row_rejected("t", "null").is_session_fatal());
    }
}
