//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding, decoding or compression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// The serialization format key is not known.
    #[error("unknown serialization format: {key}")]
    UnknownFormat {
        /// The key that was requested.
        key: String,
    },

    /// The content encoding is not supported.
    #[error("unsupported content encoding: {name}")]
    UnsupportedEncoding {
        /// Encoding name as it appeared on the wire.
        name: String,
    },

    /// A value could not be represented as a cell value.
    #[error("invalid value: {message}")]
    InvalidValue {
        /// Description of the problem.
        message: String,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create an unknown format error.
    pub fn unknown_format(key: impl Into<String>) -> Self {
        Self::UnknownFormat { key: key.into() }
    }

    /// Create an unsupported encoding error.
    pub fn unsupported_encoding(name: impl Into<String>) -> Self {
        Self::UnsupportedEncoding { name: name.into() }
    }

    /// Create an invalid value error.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }
}
