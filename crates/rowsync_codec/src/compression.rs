//! Transport compression negotiated through `accept-encoding`.

use crate::error::{CodecError, CodecResult};
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use std::io::{Read, Write};

/// A supported content encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentEncoding {
    /// gzip (RFC 1952).
    Gzip,
    /// raw deflate (RFC 1951).
    Deflate,
}

impl ContentEncoding {
    /// Header token of this encoding.
    pub fn name(&self) -> &'static str {
        match self {
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Deflate => "deflate",
        }
    }

    /// Parses a single `content-encoding` token.
    pub fn from_name(name: &str) -> CodecResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Ok(ContentEncoding::Gzip),
            "deflate" => Ok(ContentEncoding::Deflate),
            other => Err(CodecError::unsupported_encoding(other)),
        }
    }

    /// Picks the first supported encoding listed in an `accept-encoding` value.
    ///
    /// Quality values are honoured only to the extent that `q=0` excludes an
    /// encoding; otherwise listing order decides.
    pub fn negotiate(accept_encoding: &str) -> Option<Self> {
        accept_encoding.split(',').find_map(|item| {
            let mut parts = item.split(';');
            let token = parts.next()?.trim();
            let refused = parts.any(|p| {
                p.trim()
                    .strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            });
            if refused {
                return None;
            }
            Self::from_name(token).ok()
        })
    }

    /// Compresses a body.
    pub fn compress(&self, bytes: &[u8]) -> CodecResult<Vec<u8>> {
        let map_err = |e: std::io::Error| CodecError::encoding_failed(e.to_string());
        match self {
            ContentEncoding::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(bytes).map_err(map_err)?;
                encoder.finish().map_err(map_err)
            }
            ContentEncoding::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(bytes).map_err(map_err)?;
                encoder.finish().map_err(map_err)
            }
        }
    }

    /// Decompresses a body.
    pub fn decompress(&self, bytes: &[u8]) -> CodecResult<Vec<u8>> {
        let mut out = Vec::new();
        let result = match self {
            ContentEncoding::Gzip => GzDecoder::new(bytes).read_to_end(&mut out),
            ContentEncoding::Deflate => DeflateDecoder::new(bytes).read_to_end(&mut out),
        };
        result.map_err(|e| CodecError::decoding_failed(e.to_string()))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_order() {
        assert_eq!(
            ContentEncoding::negotiate("br, gzip, deflate"),
            Some(ContentEncoding::Gzip)
        );
        assert_eq!(
            ContentEncoding::negotiate("deflate;q=0.5, gzip"),
            Some(ContentEncoding::Deflate)
        );
        assert_eq!(
            ContentEncoding::negotiate("gzip;q=0, deflate"),
            Some(ContentEncoding::Deflate)
        );
        assert_eq!(ContentEncoding::negotiate("identity"), None);
        assert_eq!(ContentEncoding::negotiate(""), None);
    }

    #[test]
    fn compress_then_decompress() {
        let body = "row,".repeat(500).into_bytes();
        for encoding in [ContentEncoding::Gzip, ContentEncoding::Deflate] {
            let packed = encoding.compress(&body).unwrap();
            assert!(packed.len() < body.len());
            assert_eq!(encoding.decompress(&packed).unwrap(), body);
        }
    }

    #[test]
    fn corrupt_stream_is_an_error() {
        let result = ContentEncoding::Gzip.decompress(b"definitely not gzip");
        assert!(result.is_err());
    }
}
