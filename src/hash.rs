//! Content fingerprinting.
//!
//! The fingerprint of a file is the lowercase hex SHA-256 of its bytes. It
//! is the primary key of the ledger and the dedup key for ingestion, so two
//! uploads with identical bytes always address the same index entries.

use sha2::{Digest, Sha256};

/// Compute the content fingerprint of `bytes`.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_deterministic_and_sensitive() {
        let a = fingerprint(b"refund policy v1");
        assert_eq!(a, fingerprint(b"refund policy v1"));
        assert_ne!(a, fingerprint(b"refund policy v2"));
        assert_eq!(a.len(), 64);
    }
}
