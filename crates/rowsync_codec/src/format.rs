//! Pluggable serialization formats.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A serialization format for messages and batch part files.
///
/// The format is chosen per session and travels in the
/// `x-sync-serialization-format` header by its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationFormat {
    /// JSON via `serde_json`. The reference format.
    #[default]
    Json,
    /// CBOR via `ciborium`.
    Cbor,
}

impl SerializationFormat {
    /// All known formats.
    pub const ALL: [SerializationFormat; 2] = [SerializationFormat::Json, SerializationFormat::Cbor];

    /// Returns the wire key of this format.
    pub fn key(&self) -> &'static str {
        match self {
            SerializationFormat::Json => "json",
            SerializationFormat::Cbor => "cbor",
        }
    }

    /// Looks a format up by its wire key (case-insensitive).
    pub fn from_key(key: &str) -> CodecResult<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.key().eq_ignore_ascii_case(key))
            .ok_or_else(|| CodecError::unknown_format(key))
    }

    /// File extension used for batch part files written in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            SerializationFormat::Json => "json",
            SerializationFormat::Cbor => "cbor",
        }
    }

    /// Encodes a value.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CodecResult<Vec<u8>> {
        match self {
            SerializationFormat::Json => {
                serde_json::to_vec(value).map_err(|e| CodecError::encoding_failed(e.to_string()))
            }
            SerializationFormat::Cbor => {
                let mut buf = Vec::new();
                ciborium::into_writer(value, &mut buf)
                    .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
                Ok(buf)
            }
        }
    }

    /// Decodes a value.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T> {
        match self {
            SerializationFormat::Json => serde_json::from_slice(bytes)
                .map_err(|e| CodecError::decoding_failed(e.to_string())),
            SerializationFormat::Cbor => ciborium::from_reader(bytes)
                .map_err(|e| CodecError::decoding_failed(e.to_string())),
        }
    }
}

impl fmt::Display for SerializationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    #[test]
    fn key_lookup() {
        assert_eq!(
            SerializationFormat::from_key("JSON").unwrap(),
            SerializationFormat::Json
        );
        assert_eq!(
            SerializationFormat::from_key("cbor").unwrap(),
            SerializationFormat::Cbor
        );
        assert!(matches!(
            SerializationFormat::from_key("xml"),
            Err(CodecError::UnknownFormat { .. })
        ));
    }

    #[test]
    fn rows_survive_both_formats() {
        let rows = vec![
            vec![Value::Integer(1), Value::Text("alpha".into()), Value::Null],
            vec![Value::Integer(2), Value::Bytes(vec![7, 8]), Value::Float(0.25)],
        ];
        for format in SerializationFormat::ALL {
            let bytes = format.encode(&rows).unwrap();
            let back: Vec<Vec<Value>> = format.decode(&bytes).unwrap();
            assert_eq!(back, rows, "format {format}");
        }
    }

    #[test]
    fn garbage_fails_to_decode() {
        let result: CodecResult<Vec<Value>> = SerializationFormat::Json.decode(b"{not json");
        assert!(matches!(result, Err(CodecError::DecodingFailed { .. })));
    }
}
