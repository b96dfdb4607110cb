// src/compiler/mod.rs

//! Interface to the external transpilation engine, plus the compile pipeline
//! built on top of it.
//!
//! The transpiler itself is an external collaborator: given a source file and
//! a base directory it returns compiled code, diagnostics, an optional
//! sourcemap, and an optional metafile listing every transitively-imported
//! input path. That metafile is the contract the whole dependency-tracking
//! subsystem is built on.

pub mod command;
pub mod pipeline;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use serde::Deserialize;

use crate::errors::Result;

pub use command::CommandTranspiler;
pub use pipeline::{CompilePipeline, CompileReport};

/// Per-input metadata from the metafile. Only the keys (paths) drive
/// dependency tracking; the rest is informational.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetafileInput {
    #[serde(default)]
    pub bytes: u64,
}

/// Dependency-graph report produced by the transpiler.
///
/// Keys of `inputs` are paths relative to the base directory. An absent
/// metafile on a [`TranspileOutput`] means dependency-unaware caching, by
/// explicit contract rather than runtime shape-guessing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metafile {
    #[serde(default)]
    pub inputs: BTreeMap<String, MetafileInput>,
}

impl Metafile {
    /// Build a metafile from bare input paths. Mostly useful in tests and
    /// fake backends.
    pub fn from_inputs<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inputs: paths
                .into_iter()
                .map(|p| (p.into(), MetafileInput::default()))
                .collect(),
        }
    }
}

/// Everything the external engine reports for one transpile invocation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranspileOutput {
    pub code: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub sourcemap: Option<String>,
    #[serde(default)]
    pub metafile: Option<Metafile>,
}

/// Trait abstracting the external transpilation engine.
///
/// Production code uses [`CommandTranspiler`]; tests provide their own
/// implementation that returns canned outputs without spawning processes.
pub trait Transpiler: Send + Sync {
    fn transpile(
        &self,
        entry: &Path,
        base_dir: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<TranspileOutput>> + Send + '_>>;
}
