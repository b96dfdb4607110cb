// src/config/discovery.rs

//! Discovery of lightfast config entry points.
//!
//! Entry points come from a fixed list of candidate filenames checked against
//! the project directory. The same pattern set decides whether a newly
//! created file should be promoted into the watched config set.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use globset::{Glob, GlobSet, GlobSetBuilder};

/// Candidate config filenames, in lookup order.
pub const CONFIG_CANDIDATES: &[&str] = &[
    "lightfast.config.ts",
    "lightfast.config.js",
    "lightfast.config.mjs",
];

fn candidate_globset() -> &'static GlobSet {
    static SET: OnceLock<GlobSet> = OnceLock::new();
    SET.get_or_init(|| {
        let mut builder = GlobSetBuilder::new();
        for pattern in CONFIG_CANDIDATES {
            builder.add(Glob::new(pattern).expect("static candidate pattern"));
        }
        builder.build().expect("static candidate globset")
    })
}

/// Existence-check every candidate filename against `base_dir` and return
/// the matches as absolute paths. An empty result is a fatal configuration
/// error at watcher start; the caller decides.
pub fn discover_config_paths(base_dir: &Path) -> Vec<PathBuf> {
    CONFIG_CANDIDATES
        .iter()
        .map(|name| base_dir.join(name))
        .filter(|path| path.is_file())
        .collect()
}

/// Does this path's filename match the config candidate patterns?
pub fn is_config_candidate(path: &Path) -> bool {
    path.file_name()
        .map(|name| candidate_globset().is_match(Path::new(name)))
        .unwrap_or(false)
}
