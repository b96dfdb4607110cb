// src/cache/deps.rs

//! Dependency resolution from a transpiler metafile.
//!
//! The metafile lists every transitively-imported input path relative to the
//! project base directory. This module resolves those paths, hashes the files
//! that still exist, and produces a deterministic combined digest representing
//! the whole dependency closure at this moment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cache::hash::{combine_dependency_hashes, file_hash};
use crate::compiler::Metafile;

/// Resolved dependency closure for one compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet {
    /// Absolute dependency path -> content hash at resolution time.
    /// `BTreeMap` keeps iteration in sorted-path order.
    pub dependencies: BTreeMap<PathBuf, String>,
    /// Combined digest over all per-path hashes, in sorted-path order.
    pub dependency_hash: String,
}

/// Resolve and hash every input listed in `metafile`.
///
/// Files that no longer exist (or cannot be read) are skipped silently; a
/// dependency disappearing between the transpile and this hash pass must not
/// fail the compile. A metafile with zero resolvable inputs yields an empty
/// map and the digest of the empty string.
pub fn extract_dependencies(metafile: &Metafile, base_dir: &Path) -> DependencySet {
    let mut dependencies = BTreeMap::new();

    for rel in metafile.inputs.keys() {
        let resolved = resolve_input(rel, base_dir);
        if !resolved.is_file() {
            debug!(path = ?resolved, "skipping missing dependency");
            continue;
        }
        match file_hash(&resolved) {
            Ok(hash) => {
                dependencies.insert(resolved, hash);
            }
            Err(err) => {
                debug!(path = ?resolved, error = %err, "skipping unreadable dependency");
            }
        }
    }

    let dependency_hash =
        combine_dependency_hashes(dependencies.values().map(String::as_str));

    DependencySet {
        dependencies,
        dependency_hash,
    }
}

fn resolve_input(rel: &str, base_dir: &Path) -> PathBuf {
    let path = Path::new(rel);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
