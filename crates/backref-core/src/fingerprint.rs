//! Content fingerprints for change detection

use sha1::{Digest, Sha1};

/// Compute the SHA-1 digest of a document's bytes as lowercase hex
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
