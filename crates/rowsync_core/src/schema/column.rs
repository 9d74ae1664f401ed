//! Column definitions.

use crate::compare::{NamedItem, StringComparison};
use rowsync_codec::Value;
use serde::{Deserialize, Serialize};

/// Logical data type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Boolean.
    Boolean,
    /// 64-bit signed integer.
    Integer,
    /// Double precision float.
    Float,
    /// UTF-8 text.
    Text,
    /// Binary data.
    Bytes,
    /// Milliseconds since the Unix epoch.
    DateTime,
    /// UUID stored as text.
    Guid,
}

impl DataType {
    /// Returns true if a non-null value is acceptable for this type.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (DataType::Boolean, Value::Bool(_)) => true,
            (DataType::Integer | DataType::DateTime, Value::Integer(_)) => true,
            (DataType::Float, Value::Float(_) | Value::Integer(_)) => true,
            (DataType::Text | DataType::Guid, Value::Text(_)) => true,
            (DataType::Bytes, Value::Bytes(_)) => true,
            _ => false,
        }
    }
}

/// A column of a [`SyncTable`](crate::SyncTable).
///
/// The ordinal is owned by the table and recomputed whenever the table's
/// column list changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncColumn {
    /// Column name.
    pub name: String,
    /// Logical type.
    pub data_type: DataType,
    /// Position in the table's column list.
    pub ordinal: usize,
    /// Whether NULL is allowed.
    pub allow_null: bool,
    /// Read-only columns are never transferred.
    pub is_read_only: bool,
    /// Computed columns are never transferred.
    pub is_computed: bool,
    /// Store-generated identity.
    pub is_auto_increment: bool,
    /// Maximum length for text and binary columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
}

impl SyncColumn {
    /// Creates a nullable column.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            ordinal: 0,
            allow_null: true,
            is_read_only: false,
            is_computed: false,
            is_auto_increment: false,
            max_length: None,
        }
    }

    /// Sets nullability.
    #[must_use]
    pub fn nullable(mut self, allow_null: bool) -> Self {
        self.allow_null = allow_null;
        self
    }

    /// Marks the column read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.is_read_only = true;
        self
    }

    /// Marks the column computed.
    #[must_use]
    pub fn computed(mut self) -> Self {
        self.is_computed = true;
        self
    }

    /// Marks the column auto-increment.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.is_auto_increment = true;
        self
    }

    /// Sets the maximum length.
    #[must_use]
    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Returns true if the column is transferred during sync.
    #[must_use]
    pub fn is_transferable(&self) -> bool {
        !self.is_read_only && !self.is_computed
    }
}

impl NamedItem for SyncColumn {
    fn equals_by_name_with(&self, other: &Self, cmp: StringComparison) -> bool {
        cmp.equals(&self.name, &other.name)
    }

    fn equals_by_properties_with(&self, other: &Self, cmp: StringComparison) -> bool {
        self.equals_by_name_with(other, cmp)
            && self.data_type == other.data_type
            && self.ordinal == other.ordinal
            && self.allow_null == other.allow_null
            && self.is_read_only == other.is_read_only
            && self.is_computed == other.is_computed
            && self.is_auto_increment == other.is_auto_increment
            && self.max_length == other.max_length
    }
}
