//! Content digests for transferred bodies.

use sha2::{Digest, Sha256};

/// Computes the hex-encoded SHA-256 digest of a body.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Returns true if `bytes` hashes to `expected` (hex, case-insensitive).
pub fn verify_hash(bytes: &[u8], expected: &str) -> bool {
    content_hash(bytes).eq_ignore_ascii_case(expected.trim())
}
