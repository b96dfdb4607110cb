// src/watch/watcher.rs

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Wrapper around a single `RecommendedWatcher` whose watch set changes over
/// the session.
///
/// The underlying watcher is constructed exactly once; dependency churn is
/// applied with `watch`/`unwatch` on the live instance, never by rebuilding
/// it. Dropping this handle stops file watching.
pub struct FileWatcher {
    inner: RecommendedWatcher,
    watched: HashSet<PathBuf>,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("watched", &self.watched.len())
            .finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Create the watcher, forwarding raw notify results from the blocking
    /// callback into the async world over `event_tx`.
    pub fn new(event_tx: mpsc::UnboundedSender<notify::Result<Event>>) -> Result<Self> {
        let inner = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if event_tx.send(res).is_err() {
                    // Loop is gone; nothing useful to do from the callback.
                    eprintln!("lightfast-compiler: failed to forward notify event");
                }
            },
            Config::default(),
        )
        .context("constructing filesystem watcher")?;

        info!("file watcher constructed");

        Ok(Self {
            inner,
            watched: HashSet::new(),
        })
    }

    /// Start watching a path (non-recursively). Already-watched paths are a
    /// no-op, so the coordinator can never double-watch.
    pub fn watch_path(&mut self, path: &Path) -> Result<()> {
        if !self.watched.insert(path.to_path_buf()) {
            return Ok(());
        }
        self.inner
            .watch(path, RecursiveMode::NonRecursive)
            .with_context(|| format!("watching path {:?}", path))?;
        debug!(path = ?path, "watching");
        Ok(())
    }

    /// Stop watching a path. Unknown paths are a no-op.
    pub fn unwatch_path(&mut self, path: &Path) -> Result<()> {
        if !self.watched.remove(path) {
            return Ok(());
        }
        self.inner
            .unwatch(path)
            .with_context(|| format!("unwatching path {:?}", path))?;
        debug!(path = ?path, "unwatched");
        Ok(())
    }

    pub fn watched_paths(&self) -> &HashSet<PathBuf> {
        &self.watched
    }
}
