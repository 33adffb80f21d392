//! Content digests for repository scripts.
//!
//! The index stores a lowercase hex SHA-256 of every library and extension
//! file so clients (and `--verify-hashes`) can detect modified scripts.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Digest raw file bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Read a file and digest its bytes.
pub fn hash_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(content_hash(&bytes))
}
