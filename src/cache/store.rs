// src/cache/store.rs

//! On-disk compilation cache.
//!
//! Layout under the cache directory:
//!
//! - `cache-metadata.json` — map of absolute source path -> [`CacheEntry`],
//!   pretty-printed, read fully on each access and rewritten atomically on
//!   each mutation (last writer wins).
//! - `compiled/{hash}-{stem}.mjs` (+ optional `.map`) — compiled outputs.
//! - `lightfast.config.mjs` — the "main output" convenience copy.
//!
//! A corrupted cache must never crash a build: metadata read/write failures
//! are logged and degrade to "treat as empty / best-effort write", which at
//! worst forces a full recompilation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::deps::extract_dependencies;
use crate::cache::hash::file_hash;
use crate::compiler::Metafile;

pub const METADATA_FILE: &str = "cache-metadata.json";
pub const COMPILED_DIR: &str = "compiled";
pub const MAIN_OUTPUT_FILE: &str = "lightfast.config.mjs";

/// Entries older than this are dropped by [`CompilationCache::clean_stale_entries`].
const MAX_ENTRY_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// One cached compilation, keyed by its resolved source path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content_hash: String,
    /// Unix milliseconds at write time, used for age-based eviction.
    pub timestamp: u64,
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    /// Every transitively-imported file and its hash at compile time.
    /// Absent when the compile ran without a metafile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BTreeMap<PathBuf, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_hash: Option<String>,
}

/// Aggregate view over the cache, for `--cache-stats`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub oldest_entry: Option<u64>,
    pub newest_entry: Option<u64>,
    pub files: Vec<PathBuf>,
}

/// Content-addressed compilation cache with dependency-aware freshness.
#[derive(Debug, Clone)]
pub struct CompilationCache {
    cache_dir: PathBuf,
}

impl CompilationCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn metadata_path(&self) -> PathBuf {
        self.cache_dir.join(METADATA_FILE)
    }

    fn compiled_dir(&self) -> PathBuf {
        self.cache_dir.join(COMPILED_DIR)
    }

    pub fn main_output_path(&self) -> PathBuf {
        self.cache_dir.join(MAIN_OUTPUT_FILE)
    }

    /// Is the cached output for `source` still fresh?
    ///
    /// Fresh means: the source file exists, its output exists, the current
    /// source content hash matches, and — when a metafile is supplied and the
    /// entry recorded dependencies — the recomputed combined dependency hash
    /// matches the stored one *and* every individual dependency hash matches.
    /// Without a metafile the check is dependency-unaware by contract.
    pub fn is_cached(&self, source: &Path, metafile: Option<&Metafile>, base_dir: &Path) -> bool {
        let entries = self.load_entries();
        let Some(entry) = entries.get(source) else {
            return false;
        };

        if !entry.source_path.is_file() || !entry.output_path.is_file() {
            return false;
        }

        let current = match file_hash(source) {
            Ok(h) => h,
            Err(err) => {
                debug!(source = ?source, error = %err, "failed to hash source; treating as stale");
                return false;
            }
        };
        if current != entry.content_hash {
            return false;
        }

        if let (Some(metafile), Some(stored_deps), Some(stored_hash)) = (
            metafile,
            entry.dependencies.as_ref(),
            entry.dependency_hash.as_ref(),
        ) {
            let current_deps = extract_dependencies(metafile, base_dir);
            if &current_deps.dependency_hash != stored_hash {
                return false;
            }
            for (path, hash) in stored_deps {
                match current_deps.dependencies.get(path) {
                    Some(current) if current == hash => {}
                    _ => return false,
                }
            }
        }

        true
    }

    /// Store a successful compilation.
    ///
    /// Writes the compiled content (and sourcemap, if given) under
    /// `compiled/`, recreating the directory if it was deleted externally,
    /// and upserts the metadata entry. Returns the output path.
    pub fn set_cached(
        &self,
        source: &Path,
        code: &str,
        sourcemap: Option<&str>,
        metafile: Option<&Metafile>,
        base_dir: &Path,
    ) -> Result<PathBuf> {
        let content_hash =
            file_hash(source).with_context(|| format!("hashing source file {:?}", source))?;

        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config".to_string());

        let compiled_dir = self.compiled_dir();
        fs::create_dir_all(&compiled_dir)
            .with_context(|| format!("creating compiled dir {:?}", compiled_dir))?;

        let output_path = compiled_dir.join(format!("{content_hash}-{stem}.mjs"));
        fs::write(&output_path, code)
            .with_context(|| format!("writing compiled output {:?}", output_path))?;

        if let Some(map) = sourcemap {
            let map_path = sourcemap_path(&output_path);
            fs::write(&map_path, map)
                .with_context(|| format!("writing sourcemap {:?}", map_path))?;
        }

        let (dependencies, dependency_hash) = match metafile {
            Some(metafile) => {
                let set = extract_dependencies(metafile, base_dir);
                (Some(set.dependencies), Some(set.dependency_hash))
            }
            None => (None, None),
        };

        let entry = CacheEntry {
            content_hash,
            timestamp: now_millis(),
            source_path: source.to_path_buf(),
            output_path: output_path.clone(),
            dependencies,
            dependency_hash,
        };

        let mut entries = self.load_entries();
        entries.insert(source.to_path_buf(), entry);
        self.save_entries(&entries);

        Ok(output_path)
    }

    /// Look up the stored entry for a source path.
    pub fn entry_for(&self, source: &Path) -> Option<CacheEntry> {
        self.load_entries().get(source).cloned()
    }

    /// Remove entries whose source or output vanished, or whose age exceeds
    /// the retention window, deleting their on-disk outputs. Returns the
    /// number of removed entries.
    pub fn clean_stale_entries(&self) -> Result<usize> {
        let entries = self.load_entries();
        let now = now_millis();
        let max_age = MAX_ENTRY_AGE.as_millis() as u64;

        let mut survivors = BTreeMap::new();
        let mut removed = 0usize;

        for (source, entry) in entries {
            let expired = now.saturating_sub(entry.timestamp) > max_age;
            let stale =
                expired || !entry.source_path.is_file() || !entry.output_path.is_file();

            if stale {
                debug!(source = ?source, expired, "removing stale cache entry");
                remove_if_exists(&entry.output_path);
                remove_if_exists(&sourcemap_path(&entry.output_path));
                removed += 1;
            } else {
                survivors.insert(source, entry);
            }
        }

        if removed > 0 {
            self.save_entries(&survivors);
        }
        Ok(removed)
    }

    /// Recursively delete the entire cache directory, then recreate the
    /// empty skeleton.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.cache_dir) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("clearing cache {:?}", self.cache_dir))
            }
        }
        fs::create_dir_all(self.compiled_dir())
            .with_context(|| format!("recreating cache skeleton in {:?}", self.cache_dir))?;
        Ok(())
    }

    /// Aggregate stats over entries whose output file still exists on disk.
    /// A vanished output excludes the entry from the accounting but is not
    /// an error.
    pub fn stats(&self) -> Result<CacheStats> {
        let entries = self.load_entries();

        let mut stats = CacheStats {
            entries: 0,
            total_size: 0,
            oldest_entry: None,
            newest_entry: None,
            files: Vec::new(),
        };

        for entry in entries.values() {
            let Ok(meta) = fs::metadata(&entry.output_path) else {
                continue;
            };
            stats.entries += 1;
            stats.total_size += meta.len();
            stats.oldest_entry = Some(match stats.oldest_entry {
                Some(t) => t.min(entry.timestamp),
                None => entry.timestamp,
            });
            stats.newest_entry = Some(match stats.newest_entry {
                Some(t) => t.max(entry.timestamp),
                None => entry.timestamp,
            });
            stats.files.push(entry.output_path.clone());
        }

        Ok(stats)
    }

    /// Write the "main output" convenience copy at
    /// `{cache_dir}/lightfast.config.mjs`, independent of the per-source
    /// cache entries.
    pub fn write_main_output(&self, code: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.cache_dir)
            .with_context(|| format!("creating cache dir {:?}", self.cache_dir))?;
        let path = self.main_output_path();
        fs::write(&path, code).with_context(|| format!("writing main output {:?}", path))?;
        Ok(path)
    }

    fn load_entries(&self) -> BTreeMap<PathBuf, CacheEntry> {
        let path = self.metadata_path();
        if !path.is_file() {
            return BTreeMap::new();
        }

        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(err) => {
                warn!(path = ?path, error = %err, "failed to read cache metadata; treating cache as empty");
                return BTreeMap::new();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = ?path, error = %err, "corrupt cache metadata; treating cache as empty");
                BTreeMap::new()
            }
        }
    }

    fn save_entries(&self, entries: &BTreeMap<PathBuf, CacheEntry>) {
        if let Err(err) = self.try_save_entries(entries) {
            warn!(error = %err, "failed to persist cache metadata; continuing without");
        }
    }

    fn try_save_entries(&self, entries: &BTreeMap<PathBuf, CacheEntry>) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)
            .with_context(|| format!("creating cache dir {:?}", self.cache_dir))?;

        let json = serde_json::to_string_pretty(entries)?;
        // Write-then-rename keeps readers from ever seeing a half-written map.
        let tmp = self.metadata_path().with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("writing cache metadata tmp {:?}", tmp))?;
        fs::rename(&tmp, self.metadata_path()).context("renaming cache metadata into place")?;
        Ok(())
    }
}

/// Sourcemap sits next to its output as `{output}.map`.
pub fn sourcemap_path(output: &Path) -> PathBuf {
    let mut os = output.as_os_str().to_os_string();
    os.push(".map");
    PathBuf::from(os)
}

/// Delete a file that may already be gone; only unexpected failures are
/// worth a warning.
fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = ?path, error = %err, "failed to remove stale cache file"),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_source(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn set_cached_then_is_cached_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let cache = CompilationCache::new(dir.path().join(".lightfast"));
        let source = write_source(dir.path(), "lightfast.config.ts", "export default {};");

        assert!(!cache.is_cached(&source, None, dir.path()));
        let out1 = cache.set_cached(&source, "compiled", None, None, dir.path())?;
        assert!(cache.is_cached(&source, None, dir.path()));

        // Idempotence: identical source content produces the same output path.
        let out2 = cache.set_cached(&source, "compiled", None, None, dir.path())?;
        assert_eq!(out1, out2);
        Ok(())
    }

    #[test]
    fn source_edit_invalidates_entry() -> Result<()> {
        let dir = tempdir()?;
        let cache = CompilationCache::new(dir.path().join(".lightfast"));
        let source = write_source(dir.path(), "lightfast.config.ts", "v1");

        cache.set_cached(&source, "compiled", None, None, dir.path())?;
        assert!(cache.is_cached(&source, None, dir.path()));

        fs::write(&source, "v2")?;
        assert!(!cache.is_cached(&source, None, dir.path()));
        Ok(())
    }

    #[test]
    fn dependency_edit_invalidates_entry() -> Result<()> {
        let dir = tempdir()?;
        let cache = CompilationCache::new(dir.path().join(".lightfast"));
        let source = write_source(dir.path(), "lightfast.config.ts", "import './dep'");
        write_source(dir.path(), "dep.ts", "dep v1");

        let metafile = Metafile::from_inputs(["dep.ts"]);
        cache.set_cached(&source, "compiled", None, Some(&metafile), dir.path())?;
        assert!(cache.is_cached(&source, Some(&metafile), dir.path()));

        fs::write(dir.path().join("dep.ts"), "dep v2")?;
        assert!(!cache.is_cached(&source, Some(&metafile), dir.path()));
        // The direct source check alone still passes.
        assert!(cache.is_cached(&source, None, dir.path()));
        Ok(())
    }

    #[test]
    fn missing_output_is_stale_and_swept() -> Result<()> {
        let dir = tempdir()?;
        let cache = CompilationCache::new(dir.path().join(".lightfast"));
        let source = write_source(dir.path(), "lightfast.config.ts", "x");

        let output = cache.set_cached(&source, "compiled", None, None, dir.path())?;
        fs::remove_file(&output)?;

        assert!(!cache.is_cached(&source, None, dir.path()));
        assert_eq!(cache.stats()?.entries, 0);
        assert_eq!(cache.clean_stale_entries()?, 1);
        assert!(cache.entry_for(&source).is_none());
        Ok(())
    }

    #[test]
    fn age_expired_entry_is_swept_even_if_files_exist() -> Result<()> {
        let dir = tempdir()?;
        let cache = CompilationCache::new(dir.path().join(".lightfast"));
        let source = write_source(dir.path(), "lightfast.config.ts", "x");

        cache.set_cached(&source, "compiled", None, None, dir.path())?;

        // Backdate the entry beyond the retention window.
        let mut entries = cache.load_entries();
        let entry = entries.get_mut(&source).unwrap();
        entry.timestamp = now_millis() - MAX_ENTRY_AGE.as_millis() as u64 - 1_000;
        let output = entry.output_path.clone();
        cache.save_entries(&entries);

        assert_eq!(cache.clean_stale_entries()?, 1);
        assert!(!output.exists());
        Ok(())
    }

    #[test]
    fn sweep_deletes_output_and_map_files() -> Result<()> {
        let dir = tempdir()?;
        let cache = CompilationCache::new(dir.path().join(".lightfast"));
        let with_map = write_source(dir.path(), "lightfast.config.ts", "a");
        let without_map = write_source(dir.path(), "lightfast.config.mjs", "b");

        let out_a = cache.set_cached(&with_map, "compiled", Some("{}"), None, dir.path())?;
        let out_b = cache.set_cached(&without_map, "compiled", None, None, dir.path())?;

        // Make both entries stale by deleting their sources.
        fs::remove_file(&with_map)?;
        fs::remove_file(&without_map)?;

        assert_eq!(cache.clean_stale_entries()?, 2);
        assert!(!out_a.exists());
        assert!(!sourcemap_path(&out_a).exists());
        // An entry that never had a map sweeps without error.
        assert!(!out_b.exists());
        Ok(())
    }

    #[test]
    fn corrupt_metadata_degrades_to_empty_cache() -> Result<()> {
        let dir = tempdir()?;
        let cache_dir = dir.path().join(".lightfast");
        let cache = CompilationCache::new(&cache_dir);
        let source = write_source(dir.path(), "lightfast.config.ts", "x");

        cache.set_cached(&source, "compiled", None, None, dir.path())?;
        fs::write(cache_dir.join(METADATA_FILE), "{ not json")?;

        assert!(!cache.is_cached(&source, None, dir.path()));
        // A subsequent write recovers the cache.
        cache.set_cached(&source, "compiled", None, None, dir.path())?;
        assert!(cache.is_cached(&source, None, dir.path()));
        Ok(())
    }

    #[test]
    fn set_cached_recreates_deleted_cache_dirs() -> Result<()> {
        let dir = tempdir()?;
        let cache_dir = dir.path().join(".lightfast");
        let cache = CompilationCache::new(&cache_dir);
        let source = write_source(dir.path(), "lightfast.config.ts", "x");

        cache.set_cached(&source, "compiled", None, None, dir.path())?;
        fs::remove_dir_all(&cache_dir)?;
        let output = cache.set_cached(&source, "compiled", None, None, dir.path())?;
        assert!(output.is_file());
        Ok(())
    }

    #[test]
    fn clear_recreates_skeleton() -> Result<()> {
        let dir = tempdir()?;
        let cache = CompilationCache::new(dir.path().join(".lightfast"));
        let source = write_source(dir.path(), "lightfast.config.ts", "x");
        cache.set_cached(&source, "compiled", None, None, dir.path())?;

        cache.clear()?;
        assert!(cache.cache_dir().join(COMPILED_DIR).is_dir());
        assert!(cache.entry_for(&source).is_none());
        Ok(())
    }

    #[test]
    fn sourcemap_written_next_to_output() -> Result<()> {
        let dir = tempdir()?;
        let cache = CompilationCache::new(dir.path().join(".lightfast"));
        let source = write_source(dir.path(), "lightfast.config.ts", "x");

        let output = cache.set_cached(&source, "compiled", Some("{}"), None, dir.path())?;
        assert!(sourcemap_path(&output).is_file());
        Ok(())
    }
}
