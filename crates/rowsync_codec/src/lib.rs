//! # rowsync Codec
//!
//! Value and wire encoding primitives for rowsync.
//!
//! This crate provides:
//! - `Value`, the untagged cell value carried in row buffers
//! - `SerializationFormat`, the pluggable message/part codec (JSON, CBOR)
//! - Content digests used to verify transferred bodies
//! - gzip/deflate transport compression
//!
//! ## Usage
//!
//! ```
//! use rowsync_codec::{SerializationFormat, Value};
//!
//! let row = vec![Value::Integer(42), Value::Text("answer".into())];
//! let bytes = SerializationFormat::Json.encode(&row).unwrap();
//! let decoded: Vec<Value> = SerializationFormat::Json.decode(&bytes).unwrap();
//! assert_eq!(row, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compression;
mod digest;
mod error;
mod format;
mod value;

pub use compression::ContentEncoding;
pub use digest::{content_hash, verify_hash};
pub use error::{CodecError, CodecResult};
pub use format::SerializationFormat;
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            (-1.0e12f64..1.0e12).prop_map(Value::Float),
            "[a-zA-Z0-9 ]{0,24}".prop_map(Value::Text),
            proptest::collection::vec(any::<u8>(), 1..16).prop_map(Value::Bytes),
        ]
    }

    proptest! {
        #[test]
        fn rows_roundtrip_in_every_format(row in proptest::collection::vec(arb_value(), 0..12)) {
            for format in SerializationFormat::ALL {
                let bytes = format.encode(&row).unwrap();
                let back: Vec<Value> = format.decode(&bytes).unwrap();
                prop_assert_eq!(&back, &row);
            }
        }
    }
}
