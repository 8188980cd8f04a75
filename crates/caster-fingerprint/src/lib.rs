//! Content fingerprinting for the deduplication filter (spec §4.1).
//!
//! Pure, dependency-free-of-I/O normalization and hashing. The resulting
//! 256-bit fingerprint is hex-encoded for storage as a fast-store set key.

use sha2::{Digest, Sha256};

/// A 256-bit content fingerprint, hex-encoded.
pub type Fingerprint = String;

/// Normalize text the way spec §4.1 requires: lower-case, collapse
/// whitespace, strip punctuation except digits, trim ends.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut last_was_space = false;
    for ch in lowered.chars() {
        if ch.is_whitespace() {
            if !out.is_empty() && !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
            continue;
        }
        if ch.is_alphanumeric() {
            out.push(ch);
            last_was_space = false;
        }
        // all other punctuation is dropped
    }
    out.trim().to_string()
}

/// Compute the article content fingerprint over `normalize(title) ||
/// "\u{001f}" || normalize(body)`, per spec §4.1.
pub fn fingerprint(title: &str, body: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(normalize(title).as_bytes());
    hasher.update([0x1f]);
    hasher.update(normalize(body).as_bytes());
    hex::encode(hasher.finalize())
}
