//! Row converters applied around serialization.
//!
//! A converter rewrites cell values of outgoing rows before they are
//! encoded and restores them after decoding. Both sides must agree on the
//! converter, which is selected by key in the `x-sync-converter` header.

use crate::container::ContainerSet;
use crate::error::{CoreError, CoreResult};
use crate::schema::{DataType, SyncSet, SyncTable};
use rowsync_codec::{CodecError, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Rewrites row values around serialization.
pub trait RowConverter: Send + Sync + fmt::Debug {
    /// Key announced in the converter header.
    fn key(&self) -> &str;

    /// Rewrites a row buffer (state slot included) before encoding.
    fn before_serialize(&self, table: &SyncTable, buffer: &mut [Value]) -> CoreResult<()>;

    /// Restores a row buffer after decoding.
    fn after_deserialize(&self, table: &SyncTable, buffer: &mut [Value]) -> CoreResult<()>;
}

/// Carries binary columns as lowercase hex text.
#[derive(Debug, Clone, Copy, Default)]
pub struct HexBytesConverter;

impl HexBytesConverter {
    /// Key of this converter.
    pub const KEY: &'static str = "hex-bytes";
}

impl RowConverter for HexBytesConverter {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn before_serialize(&self, table: &SyncTable, buffer: &mut [Value]) -> CoreResult<()> {
        for column in table.columns().iter().filter(|c| c.data_type == DataType::Bytes) {
            if let Some(slot) = buffer.get_mut(column.ordinal + 1) {
                if let Value::Bytes(bytes) = slot {
                    *slot = Value::Text(hex::encode(bytes));
                }
            }
        }
        Ok(())
    }

    fn after_deserialize(&self, table: &SyncTable, buffer: &mut [Value]) -> CoreResult<()> {
        for column in table.columns().iter().filter(|c| c.data_type == DataType::Bytes) {
            if let Some(slot) = buffer.get_mut(column.ordinal + 1) {
                if let Value::Text(text) = slot {
                    let bytes = hex::decode(text.as_str()).map_err(|e| {
                        CodecError::invalid_value(format!("column {}: {e}", column.name))
                    })?;
                    *slot = Value::Bytes(bytes);
                }
            }
        }
        Ok(())
    }
}

/// Converters available by key.
#[derive(Debug, Clone, Default)]
pub struct ConverterRegistry {
    converters: HashMap<String, Arc<dyn RowConverter>>,
}

impl ConverterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in converters.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HexBytesConverter));
        registry
    }

    /// Registers a converter under its key, replacing any previous one.
    pub fn register(&mut self, converter: Arc<dyn RowConverter>) {
        self.converters.insert(converter.key().to_string(), converter);
    }

    /// Looks a converter up.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for an unknown key.
    pub fn get(&self, key: &str) -> CoreResult<Arc<dyn RowConverter>> {
        self.converters
            .get(key)
            .cloned()
            .ok_or_else(|| CoreError::invalid_operation(format!("unknown converter: {key}")))
    }
}

/// Runs a converter over every row of a container before encoding.
///
/// # Errors
///
/// Returns `TableNotFound` for a table missing from `schema`, or the
/// converter's error.
pub fn convert_outgoing(converter: &dyn RowConverter, container: &mut ContainerSet, schema: &SyncSet) -> CoreResult<()> {
    for table in &mut container.tables {
        let definition = schema.resolve(&table.key())?;
        for row in &mut table.rows {
            converter.before_serialize(definition, row)?;
        }
    }
    Ok(())
}

/// Runs a converter over every row of a container after decoding.
///
/// # Errors
///
/// Returns `TableNotFound` for a table missing from `schema`, or the
/// converter's error.
pub fn convert_incoming(converter: &dyn RowConverter, container: &mut ContainerSet, schema: &SyncSet) -> CoreResult<()> {
    for table in &mut container.tables {
        let definition = schema.resolve(&table.key())?;
        for row in &mut table.rows {
            converter.after_deserialize(definition, row)?;
        }
    }
    Ok(())
}
