//! Content digests for artifact sets and ledger files.
//!
//! A page's artifact set is the rendered file plus its auxiliary files. Its
//! digest is the SHA-256 of the concatenated per-file SHA-256 hex digests,
//! taken in the order given. Only file contents go in, never file names, so
//! moving the staging directory does not invalidate the ledger; reordering
//! the files does change the digest.

use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};

/// SHA-256 hash of a file's contents, returned as a hex string.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hash_bytes(&bytes))
}

/// SHA-256 hash of an in-memory buffer, returned as a hex string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Order-sensitive digest over a set of files.
pub fn hash_artifact_set(files: &[PathBuf]) -> io::Result<String> {
    let mut hasher = Sha256::new();
    for file in files {
        hasher.update(hash_file(file)?.as_bytes());
    }
    Ok(format!("{:x}", hasher.finalize()))
}
