//! Content hashing used to recognize the same GitHub activity across payload shapes.

mod factory;
mod hasher;

pub use factory::HasherFactory;
pub use hasher::{Hasher, Push, canonicalize, remove_path};

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
