// src/cache/mod.rs

//! Content-addressable compilation cache.
//!
//! This module is responsible for:
//! - Hashing file contents (`hash`).
//! - Resolving and hashing the dependency closure reported by the
//!   transpiler's metafile (`deps`).
//! - Persisting compiled outputs and their freshness metadata (`store`).
//!
//! It does **not** know about watching or bundle splitting; it only answers
//! "is this compilation still fresh?" and stores the results of fresh ones.

pub mod deps;
pub mod hash;
pub mod store;

pub use deps::{extract_dependencies, DependencySet};
pub use hash::{combine_dependency_hashes, content_hash, file_hash, short_hash};
pub use store::{CacheEntry, CacheStats, CompilationCache};
