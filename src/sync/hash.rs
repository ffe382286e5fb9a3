//! Content hashing.
//!
//! SHA-256 digests used to tie persisted files together: the index blob
//! records the digest of its id map, and the delta log status reports a
//! content hash so operators can tell two logs apart.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Raw SHA-256 of a byte slice.
#[must_use]
pub fn digest_bytes(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Hex SHA-256 of a value's JSON serialization.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn content_hash<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;
    Ok(format!("{:x}", Sha256::digest(&json)))
}
