//! Content fingerprints for script files.
//!
//! Line endings are normalised to LF before hashing, so a file re-saved with
//! CRLF by an external editor does not register as modified.

use sha2::{Digest, Sha256};

use modsync_core::types::Checksum;

/// SHA-256 hex digest of `content` after CRLF → LF normalisation.
pub fn fingerprint(content: &str) -> Checksum {
    fingerprint_bytes(content.as_bytes())
}

/// [`fingerprint`] over raw file bytes, which need not be valid UTF-8.
///
/// Agrees with [`fingerprint`] whenever the bytes are UTF-8.
pub fn fingerprint_bytes(content: &[u8]) -> Checksum {
    let mut hasher = Sha256::new();
    let mut rest = content;
    while let Some(pos) = rest.windows(2).position(|pair| pair == b"\r\n") {
        hasher.update(&rest[..pos]);
        hasher.update(b"\n");
        rest = &rest[pos + 2..];
    }
    hasher.update(rest);
    Checksum(hex::encode(hasher.finalize()))
}

pub fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n")
}
