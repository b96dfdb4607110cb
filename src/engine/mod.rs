// src/engine/mod.rs

//! Orchestration engine for the dev watch loop.
//!
//! This module ties together:
//! - the file watcher (path events in)
//! - the debounce/single-flight compile orchestration
//! - watch-set reconciliation after successful compiles
//! - the lifecycle event stream delivered to the host
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::path::PathBuf;
use std::time::Duration;

pub use crate::compiler::pipeline::{CompileOutcome, CompileReport};

/// Lifecycle events delivered to the host over a channel.
///
/// Ordering guarantee: every `CompileStart` is followed by exactly one
/// terminal event (`CompileSuccess` or `CompileError`) before the next
/// `CompileStart`.
#[derive(Debug, Clone)]
pub enum CompilerEvent {
    /// Watcher is operational; emitted after the initial compile (if any).
    WatcherReady,
    CompileStart {
        entry: PathBuf,
    },
    CompileSuccess(CompileReport),
    CompileError {
        entry: PathBuf,
        message: String,
        partial_code: Option<String>,
    },
    /// A newly created file matched the config naming pattern and was
    /// promoted into the watched config set.
    ConfigAdded(PathBuf),
    /// A tracked config file was removed and demoted.
    ConfigRemoved(PathBuf),
    /// Non-fatal watcher-level error (e.g. permission denied on a path).
    WatcherError {
        message: String,
    },
}

/// Events flowing into the dev loop from the watcher, timers and compile
/// tasks.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    /// Content change on some path (may or may not be tracked).
    PathChanged(PathBuf),
    /// A created file matching the config naming pattern.
    ConfigCandidateAdded(PathBuf),
    /// A path was removed.
    PathRemoved(PathBuf),
    /// A debounce timer fired; stale generations are ignored.
    DebounceFired(u64),
    /// A dispatched compile finished.
    CompileFinished(CompileOutcome),
    /// Bypass the debounce delay and compile now.
    ForceCompile,
    /// Graceful shutdown.
    StopRequested,
}

/// Commands produced by the pure core, executed by the IO shell.
#[derive(Debug, Clone)]
pub enum LoopCommand {
    /// (Re)schedule the debounce timer; supersedes earlier generations.
    ScheduleDebounce { generation: u64, delay: Duration },
    /// Dispatch a compile of this entry point.
    StartCompile { entry: PathBuf },
    /// Start watching these paths on the live watcher.
    Watch(Vec<PathBuf>),
    /// Stop watching these paths on the live watcher.
    Unwatch(Vec<PathBuf>),
    /// Deliver a lifecycle event to the host.
    Emit(CompilerEvent),
    /// Tear the loop down.
    Shutdown,
}

/// Options for the dev watcher.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub debounce_delay: Duration,
    /// Skip the initial compile at start.
    pub ignore_initial: bool,
    /// Extra paths to watch beyond discovered configs.
    pub extra_watch_paths: Vec<PathBuf>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce_delay: Duration::from_millis(500),
            ignore_initial: false,
            extra_watch_paths: Vec::new(),
        }
    }
}

pub mod core;
pub mod runtime;

pub use core::{DevLoopCore, LoopStep, WatchSet};
pub use runtime::{DevLoop, DevWatcher};
