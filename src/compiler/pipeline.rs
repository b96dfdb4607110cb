// src/compiler/pipeline.rs

//! The compile pipeline: cache check -> transpile -> dependency hashing ->
//! cache write -> bundle split.
//!
//! A pipeline run never returns `Err`: every failure mode collapses into
//! [`CompileOutcome::Error`] so the watch loop can surface it as an event and
//! keep running.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::bundle::{generate_bundles, Bundle};
use crate::cache::store::sourcemap_path;
use crate::cache::{extract_dependencies, CompilationCache};
use crate::compiler::{Metafile, Transpiler};

/// Result of one successful pipeline run.
#[derive(Debug, Clone)]
pub struct CompileReport {
    pub entry: PathBuf,
    pub output_path: PathBuf,
    pub bundles: Vec<Bundle>,
    pub warnings: Vec<String>,
    /// True when the compiled output was served from the cache.
    pub cached: bool,
    /// Absolute paths of the dependency closure, for watch reconciliation.
    pub dependency_paths: BTreeSet<PathBuf>,
    /// Metafile from this (or the reused) compilation, for the next
    /// freshness check.
    pub metafile: Option<Metafile>,
    pub duration: Duration,
}

/// Terminal state of one pipeline run.
#[derive(Debug, Clone)]
pub enum CompileOutcome {
    Success(CompileReport),
    Error {
        entry: PathBuf,
        message: String,
        /// Partial compiled code, when the transpiler produced any.
        partial_code: Option<String>,
    },
}

/// Aggregated transpiler diagnostics, kept as a typed error so the partial
/// result survives up to the `compile-error` event.
#[derive(Debug)]
struct TranspileFailed {
    message: String,
    partial_code: Option<String>,
}

impl std::fmt::Display for TranspileFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transpiler reported errors: {}", self.message)
    }
}

impl std::error::Error for TranspileFailed {}

/// Dependency-injected pipeline; the host owns cache and transpiler
/// lifecycles and passes them in explicitly.
pub struct CompilePipeline {
    cache: CompilationCache,
    transpiler: Arc<dyn Transpiler>,
    out_dir: PathBuf,
    compiler_version: String,
}

impl CompilePipeline {
    pub fn new(
        cache: CompilationCache,
        transpiler: Arc<dyn Transpiler>,
        out_dir: impl Into<PathBuf>,
        compiler_version: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            transpiler,
            out_dir: out_dir.into(),
            compiler_version: compiler_version.into(),
        }
    }

    pub fn cache(&self) -> &CompilationCache {
        &self.cache
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Compile one entry point.
    ///
    /// `last_metafile` is the metafile observed on the previous successful
    /// compile of this entry, enabling dependency-aware freshness checks.
    pub async fn compile(
        &self,
        entry: &Path,
        base_dir: &Path,
        last_metafile: Option<&Metafile>,
    ) -> CompileOutcome {
        match self.compile_inner(entry, base_dir, last_metafile).await {
            Ok(report) => CompileOutcome::Success(report),
            Err(err) => {
                let partial_code = err
                    .downcast_ref::<TranspileFailed>()
                    .and_then(|f| f.partial_code.clone());
                CompileOutcome::Error {
                    entry: entry.to_path_buf(),
                    message: format!("{err:#}"),
                    partial_code,
                }
            }
        }
    }

    async fn compile_inner(
        &self,
        entry: &Path,
        base_dir: &Path,
        last_metafile: Option<&Metafile>,
    ) -> Result<CompileReport> {
        let started = Instant::now();

        // A fresh session has no in-memory metafile yet; rebuild one from the
        // stored dependency closure so a dependency edited while the process
        // was down still invalidates the entry.
        let stored_metafile = if last_metafile.is_none() {
            self.stored_metafile(entry)
        } else {
            None
        };
        let freshness_metafile = last_metafile.or(stored_metafile.as_ref());

        if self.cache.is_cached(entry, freshness_metafile, base_dir) {
            if let Some(report) = self.reuse_cached(entry, started)? {
                return Ok(report);
            }
        }

        let output = self
            .transpiler
            .transpile(entry, base_dir)
            .await
            .map_err(anyhow::Error::from)?;

        for warning in &output.warnings {
            warn!(entry = ?entry, "transpiler warning: {warning}");
        }

        if !output.errors.is_empty() {
            return Err(TranspileFailed {
                message: output.errors.join("; "),
                partial_code: (!output.code.is_empty()).then(|| output.code.clone()),
            }
            .into());
        }

        let output_path = self.cache.set_cached(
            entry,
            &output.code,
            output.sourcemap.as_deref(),
            output.metafile.as_ref(),
            base_dir,
        )?;
        self.cache.write_main_output(&output.code)?;

        let bundles = generate_bundles(
            &output.code,
            output.sourcemap.as_deref(),
            entry,
            &self.out_dir,
            &self.compiler_version,
        )?;

        let dependency_paths = output
            .metafile
            .as_ref()
            .map(|m| {
                extract_dependencies(m, base_dir)
                    .dependencies
                    .into_keys()
                    .collect()
            })
            .unwrap_or_default();

        info!(
            entry = ?entry,
            bundles = bundles.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "compile finished"
        );

        Ok(CompileReport {
            entry: entry.to_path_buf(),
            output_path,
            bundles,
            warnings: output.warnings,
            cached: false,
            dependency_paths,
            metafile: output.metafile,
            duration: started.elapsed(),
        })
    }

    /// Metafile view rebuilt from the stored dependency paths of a previous
    /// compile, if any were recorded. Stored paths are absolute and resolve
    /// unchanged.
    fn stored_metafile(&self, entry: &Path) -> Option<Metafile> {
        let cache_entry = self.cache.entry_for(entry)?;
        let deps = cache_entry.dependencies?;
        Some(Metafile::from_inputs(
            deps.into_keys().map(|p| p.to_string_lossy().into_owned()),
        ))
    }

    /// Fresh cache hit: reuse the compiled output and regenerate bundles.
    /// Bundle filenames are content-addressed, so regeneration of identical
    /// content is an effective no-op.
    fn reuse_cached(&self, entry: &Path, started: Instant) -> Result<Option<CompileReport>> {
        let Some(cache_entry) = self.cache.entry_for(entry) else {
            return Ok(None);
        };

        let code = fs::read_to_string(&cache_entry.output_path)
            .with_context(|| format!("reading cached output {:?}", cache_entry.output_path))?;
        let map_path = sourcemap_path(&cache_entry.output_path);
        let sourcemap = fs::read_to_string(&map_path).ok();

        let bundles = generate_bundles(
            &code,
            sourcemap.as_deref(),
            entry,
            &self.out_dir,
            &self.compiler_version,
        )?;

        let dependency_paths: BTreeSet<PathBuf> = cache_entry
            .dependencies
            .as_ref()
            .map(|deps| deps.keys().cloned().collect())
            .unwrap_or_default();

        // Rebuild a metafile view from the stored dependency paths so the
        // next freshness check stays dependency-aware.
        let metafile = cache_entry.dependencies.as_ref().map(|deps| {
            Metafile::from_inputs(deps.keys().map(|p| p.to_string_lossy().into_owned()))
        });

        debug!(entry = ?entry, "cache hit; reusing compiled output");

        Ok(Some(CompileReport {
            entry: entry.to_path_buf(),
            output_path: cache_entry.output_path,
            bundles,
            warnings: Vec::new(),
            cached: true,
            dependency_paths,
            metafile,
            duration: started.elapsed(),
        }))
    }
}
