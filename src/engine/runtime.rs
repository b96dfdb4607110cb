// src/engine/runtime.rs

//! Async IO shell around [`DevLoopCore`].
//!
//! [`DevLoop`] drives the pure core: it reads [`LoopEvent`]s from a channel,
//! feeds them through `core.step`, and executes the resulting commands —
//! debounce timers, compile tasks, live watch-set mutations, and lifecycle
//! event delivery. [`DevWatcher`] is the host-facing front end that owns the
//! loop's lifecycle (`start` / `stop` / `force_compilation`).

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::EventKind;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::compiler::{CompilePipeline, Metafile};
use crate::config::{discover_config_paths, is_config_candidate};
use crate::engine::core::DevLoopCore;
use crate::engine::{CompileOutcome, CompilerEvent, LoopCommand, LoopEvent, LoopStep, WatchOptions};
use crate::errors::{CompilerError, Result};
use crate::watch::FileWatcher;

/// Drives the watch/debounce/compile state machine in response to
/// [`LoopEvent`]s, delegating compiles to the pipeline.
pub struct DevLoop {
    core: DevLoopCore,
    event_rx: mpsc::Receiver<LoopEvent>,
    /// Loopback sender used by debounce timers and compile tasks.
    event_tx: mpsc::Sender<LoopEvent>,
    pipeline: Arc<CompilePipeline>,
    base_dir: PathBuf,
    watcher: Option<FileWatcher>,
    events_out: mpsc::Sender<CompilerEvent>,
    /// Metafile from the last successful compile per entry point, for
    /// dependency-aware freshness checks.
    last_metafiles: HashMap<PathBuf, Metafile>,
}

impl fmt::Debug for DevLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevLoop")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl DevLoop {
    pub fn new(
        core: DevLoopCore,
        event_rx: mpsc::Receiver<LoopEvent>,
        event_tx: mpsc::Sender<LoopEvent>,
        pipeline: Arc<CompilePipeline>,
        base_dir: PathBuf,
        watcher: Option<FileWatcher>,
        events_out: mpsc::Sender<CompilerEvent>,
    ) -> Self {
        Self {
            core,
            event_rx,
            event_tx,
            pipeline,
            base_dir,
            watcher,
            events_out,
            last_metafiles: HashMap::new(),
        }
    }

    /// Main event loop. Consumes events, feeds the core, executes commands.
    pub async fn run(mut self) {
        info!("dev loop started");

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    debug!("loop event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "dev loop received event");

            if let LoopEvent::CompileFinished(CompileOutcome::Success(report)) = &event {
                if let Some(metafile) = &report.metafile {
                    self.last_metafiles
                        .insert(report.entry.clone(), metafile.clone());
                }
            }

            let step = self.core.step(event);
            let keep_running = self.execute_step(step).await;

            if !keep_running {
                break;
            }
        }

        info!("dev loop exiting");
    }

    async fn execute_step(&mut self, step: LoopStep) -> bool {
        for command in step.commands {
            self.execute_command(command).await;
        }
        step.keep_running
    }

    async fn execute_command(&mut self, command: LoopCommand) {
        match command {
            LoopCommand::ScheduleDebounce { generation, delay } => {
                self.schedule_debounce(generation, delay);
            }
            LoopCommand::StartCompile { entry } => {
                self.dispatch_compile(entry);
            }
            LoopCommand::Watch(paths) => {
                apply_watch(self.watcher.as_mut(), &paths, true, &self.events_out).await;
            }
            LoopCommand::Unwatch(paths) => {
                apply_watch(self.watcher.as_mut(), &paths, false, &self.events_out).await;
            }
            LoopCommand::Emit(event) => {
                emit(&self.events_out, event).await;
            }
            LoopCommand::Shutdown => {
                // Dropping the watcher closes the underlying OS watcher.
                self.watcher = None;
            }
        }
    }

    /// Timers are fire-and-forget; the core discards stale generations, so
    /// an old timer firing after a reschedule is harmless.
    fn schedule_debounce(&self, generation: u64, delay: Duration) {
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(LoopEvent::DebounceFired(generation)).await;
        });
    }

    /// Compiles run on their own task so the loop (and the watcher callback
    /// feeding it) never blocks on the external transpiler.
    fn dispatch_compile(&self, entry: PathBuf) {
        let pipeline = Arc::clone(&self.pipeline);
        let base_dir = self.base_dir.clone();
        let last_metafile = self.last_metafiles.get(&entry).cloned();
        let tx = self.event_tx.clone();

        tokio::spawn(async move {
            let outcome = pipeline
                .compile(&entry, &base_dir, last_metafile.as_ref())
                .await;
            let _ = tx.send(LoopEvent::CompileFinished(outcome)).await;
        });
    }
}

async fn apply_watch(
    watcher: Option<&mut FileWatcher>,
    paths: &[PathBuf],
    watch: bool,
    events_out: &mpsc::Sender<CompilerEvent>,
) {
    let Some(watcher) = watcher else {
        return;
    };
    for path in paths {
        let res = if watch {
            watcher.watch_path(path)
        } else {
            watcher.unwatch_path(path)
        };
        if let Err(err) = res {
            // Non-fatal: the path is effectively unwatched, the loop lives on.
            emit(
                events_out,
                CompilerEvent::WatcherError {
                    message: format!("{err:#}"),
                },
            )
            .await;
        }
    }
}

async fn emit(events_out: &mpsc::Sender<CompilerEvent>, event: CompilerEvent) {
    if events_out.send(event).await.is_err() {
        warn!("lifecycle event receiver dropped");
    }
}

/// Host-facing dev watcher.
///
/// Owns the compile pipeline and watch options; `start()` discovers config
/// entry points, performs the initial compile, and spawns the background
/// [`DevLoop`].
pub struct DevWatcher {
    base_dir: PathBuf,
    pipeline: Arc<CompilePipeline>,
    options: WatchOptions,
    events_out: mpsc::Sender<CompilerEvent>,
    running: Option<RunningWatcher>,
}

struct RunningWatcher {
    loop_tx: mpsc::Sender<LoopEvent>,
    task: JoinHandle<()>,
}

impl fmt::Debug for DevWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevWatcher")
            .field("base_dir", &self.base_dir)
            .field("running", &self.running.is_some())
            .finish_non_exhaustive()
    }
}

impl DevWatcher {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        pipeline: Arc<CompilePipeline>,
        options: WatchOptions,
        events_out: mpsc::Sender<CompilerEvent>,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            pipeline,
            options,
            events_out,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start watching.
    ///
    /// Fatal errors (double start, no config files) are returned
    /// synchronously; the watcher never reaches the watching state on
    /// failure. Unless `ignore_initial` is set, one compile per discovered
    /// config runs to completion before `watcher-ready` is emitted.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(CompilerError::AlreadyWatching);
        }

        let config_paths = discover_config_paths(&self.base_dir);
        if config_paths.is_empty() {
            return Err(CompilerError::NoConfigFound(self.base_dir.clone()));
        }
        info!(?config_paths, "discovered config entry points");

        // Opportunistic maintenance before the session starts.
        match self.pipeline.cache().clean_stale_entries() {
            Ok(0) => {}
            Ok(removed) => info!(removed, "swept stale cache entries"),
            Err(err) => warn!(error = %err, "stale-entry sweep failed"),
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher = FileWatcher::new(raw_tx)?;

        // The base directory watch (non-recursive) catches creation and
        // removal of config candidates; entry points and extras are pinned
        // individually.
        watcher.watch_path(&self.base_dir)?;
        for path in &config_paths {
            watcher.watch_path(path)?;
        }
        for path in &self.options.extra_watch_paths {
            watcher.watch_path(path)?;
        }

        let (loop_tx, loop_rx) = mpsc::channel::<LoopEvent>(64);
        spawn_event_bridge(raw_rx, loop_tx.clone(), self.events_out.clone());

        let mut core = DevLoopCore::new(config_paths.iter().cloned(), self.options.debounce_delay);
        let mut last_metafiles = HashMap::new();

        if !self.options.ignore_initial {
            for entry in &config_paths {
                self.initial_compile(entry, &mut core, &mut watcher, &mut last_metafiles)
                    .await;
            }
        }

        emit(&self.events_out, CompilerEvent::WatcherReady).await;

        let mut dev_loop = DevLoop::new(
            core,
            loop_rx,
            loop_tx.clone(),
            Arc::clone(&self.pipeline),
            self.base_dir.clone(),
            Some(watcher),
            self.events_out.clone(),
        );
        dev_loop.last_metafiles = last_metafiles;

        let task = tokio::spawn(dev_loop.run());
        self.running = Some(RunningWatcher { loop_tx, task });
        Ok(())
    }

    /// One synchronous compile during startup, applying the resulting
    /// watch-set reconciliation directly.
    async fn initial_compile(
        &self,
        entry: &Path,
        core: &mut DevLoopCore,
        watcher: &mut FileWatcher,
        last_metafiles: &mut HashMap<PathBuf, Metafile>,
    ) {
        emit(
            &self.events_out,
            CompilerEvent::CompileStart {
                entry: entry.to_path_buf(),
            },
        )
        .await;

        let outcome = self.pipeline.compile(entry, &self.base_dir, None).await;
        if let CompileOutcome::Success(report) = &outcome {
            if let Some(metafile) = &report.metafile {
                last_metafiles.insert(report.entry.clone(), metafile.clone());
            }
        }

        let step = core.step(LoopEvent::CompileFinished(outcome));
        for command in step.commands {
            match command {
                LoopCommand::Watch(paths) => {
                    apply_watch(Some(watcher), &paths, true, &self.events_out).await;
                }
                LoopCommand::Unwatch(paths) => {
                    apply_watch(Some(watcher), &paths, false, &self.events_out).await;
                }
                LoopCommand::Emit(event) => emit(&self.events_out, event).await,
                _ => {}
            }
        }
    }

    /// Stop watching. Safe to call when never started; repeated calls are
    /// no-ops.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        if running
            .loop_tx
            .send(LoopEvent::StopRequested)
            .await
            .is_err()
        {
            debug!("dev loop already gone at stop()");
        }
        let _ = running.task.await;
        info!("dev watcher stopped");
    }

    /// Trigger an immediate compile, bypassing the debounce delay. No-op if
    /// a compile is already in flight or the watcher is not running.
    pub async fn force_compilation(&self) {
        if let Some(running) = &self.running {
            let _ = running.loop_tx.send(LoopEvent::ForceCompile).await;
        }
    }
}

/// Forward raw notify results into loop events, classifying by event kind.
fn spawn_event_bridge(
    mut raw_rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    loop_tx: mpsc::Sender<LoopEvent>,
    events_out: mpsc::Sender<CompilerEvent>,
) {
    tokio::spawn(async move {
        while let Some(res) = raw_rx.recv().await {
            match res {
                Ok(event) => {
                    debug!(?event, "received notify event");
                    for path in event.paths {
                        let Some(loop_event) = classify_event(&event.kind, path) else {
                            continue;
                        };
                        if loop_tx.send(loop_event).await.is_err() {
                            // Loop is gone; no point keeping the bridge alive.
                            return;
                        }
                    }
                }
                Err(err) => {
                    emit(
                        &events_out,
                        CompilerEvent::WatcherError {
                            message: err.to_string(),
                        },
                    )
                    .await;
                }
            }
        }
        debug!("watcher event bridge finished");
    });
}

fn classify_event(kind: &EventKind, path: PathBuf) -> Option<LoopEvent> {
    match kind {
        EventKind::Create(_) if is_config_candidate(&path) => {
            Some(LoopEvent::ConfigCandidateAdded(path))
        }
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
            Some(LoopEvent::PathChanged(path))
        }
        EventKind::Remove(_) => Some(LoopEvent::PathRemoved(path)),
        EventKind::Access(_) => None,
    }
}
