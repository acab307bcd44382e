//! SHA-256 digests in the forms used by OCI registries

use sha2::{Digest, Sha256};

/// The algorithm prefix of an OCI content digest.
pub const ALGORITHM_PREFIX: &str = "sha256:";

/// Return the hex SHA-256 digest of the given bytes.
pub fn hex_digest_from_bytes(bytes: impl AsRef<[u8]>) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}

/// Return the OCI content digest (`sha256:<hex>`) of the given bytes.
pub fn content_digest_from_bytes(bytes: impl AsRef<[u8]>) -> String {
    format!("{ALGORITHM_PREFIX}{}", hex_digest_from_bytes(bytes))
}

/// Returns true if `digest` is a well-formed `sha256:<64 hex chars>` digest.
pub fn is_content_digest(digest: &str) -> bool {
    match digest.strip_prefix(ALGORITHM_PREFIX) {
        Some(hex) => hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}
