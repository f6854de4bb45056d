//! SHA-256 content fingerprints used for edit preconditions.

use std::fmt::Write as _;

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Compare a caller-supplied hex digest against `bytes`, ignoring case and
/// surrounding whitespace.
#[must_use]
pub fn sha256_matches(expected: &str, bytes: &[u8]) -> bool {
    expected.trim().eq_ignore_ascii_case(&sha256_hex(bytes))
}
