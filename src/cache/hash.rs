// src/cache/hash.rs

//! Content hashing primitives.
//!
//! Everything in the pipeline that needs an identity derives it from file
//! *content*, never from mtimes. Digests are lowercase blake3 hex strings.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use blake3::Hasher;

/// Hash arbitrary bytes into a hex digest.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Compute the hash of a single file, streaming its contents.
pub fn file_hash(path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file =
        File::open(path).with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// First eight hex characters of a digest, used in content-addressed
/// filenames (`{id}.{hash8}.js`).
pub fn short_hash(digest: &str) -> &str {
    &digest[..digest.len().min(8)]
}

/// Combine per-dependency hashes into a single aggregate digest.
///
/// `hashes` must be iterated in sorted-path order; the caller is responsible
/// for the sort (a `BTreeMap` keyed by path gives it for free). An empty
/// iterator yields the digest of the empty string.
pub fn combine_dependency_hashes<'a, I>(hashes: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let joined = hashes.into_iter().collect::<Vec<_>>().join("|");
    content_hash(joined.as_bytes())
}
