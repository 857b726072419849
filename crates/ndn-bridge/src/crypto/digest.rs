//! Public key digests

use sha2::{Digest, Sha256};

/// Length of a public key digest
pub const DIGEST_LEN: usize = 32;

/// SHA-256 over a DER-encoded public key
pub fn public_key_digest(public_der: &[u8]) -> [u8; DIGEST_LEN] {
    Sha256::digest(public_der).into()
}

/// Lowercase hex rendering
pub fn to_hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
