//! Content hashing and storage-key derivation.
//!
//! The content hash is the deduplication key for the whole system: it is a
//! SHA-256 digest over the complete byte stream of the uploaded PDF and
//! nothing else. Filename, upload order, and processing options never feed
//! into it, so byte-identical uploads always collide — which is exactly what
//! dedup wants.
//!
//! The storage key is independent of the hash: a human-readable slug of the
//! original filename plus the upload's Unix timestamp. The timestamp keeps
//! two differently-hashed files that slugify identically from landing on the
//! same key prefix.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

use crate::error::LecternError;

/// Read granularity for file hashing. 64 KiB keeps peak memory flat even for
/// very large uploads.
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Compute the hex SHA-256 digest of a file, reading in bounded chunks.
pub fn hash_file(path: &Path) -> Result<String, LecternError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compute the hex SHA-256 digest of an in-memory byte slice.
///
/// Equivalent to [`hash_file`] over the same bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Reduce a display filename to a storage-safe slug.
///
/// Strips the extension, lowercases, and replaces every character outside
/// `[A-Za-z0-9_-]` with `_`. Mirrors what the artifact URLs and the
/// versions-by-base-name lookup expect.
pub fn slugify_filename(filename: &str) -> String {
    let stem = match filename.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => filename,
    };
    stem.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Derive the storage key for a fresh upload: `slug(filename)_<unix-seconds>`.
pub fn derive_storage_key(filename: &str, uploaded_at_unix: i64) -> String {
    format!("{}_{}", slugify_filename(filename), uploaded_at_unix)
}
