// src/engine/core.rs

//! Pure core state machine for the dev watch loop.
//!
//! This module contains a synchronous, deterministic core that consumes
//! [`LoopEvent`]s and produces:
//! - an updated core state
//! - a list of [`LoopCommand`]s describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime`) is responsible for:
//! - reading events from channels
//! - running debounce timers and compile tasks
//! - applying watch/unwatch commands to the live OS watcher
//!
//! The core is intended to be extensively unit tested without any Tokio,
//! channels, filesystem, or processes. Its invariants:
//! - at most one compile in flight, system-wide
//! - one debounce timer, reset-not-stacked (via a generation counter)
//! - at most one pending compile intent while a compile runs
//! - dependency watches reconciled by diff, never by watcher restart

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::{CompileOutcome, CompilerEvent, LoopCommand, LoopEvent};

/// The two disjoint path sets observed by the underlying watcher.
#[derive(Debug, Clone, Default)]
pub struct WatchSet {
    /// Entry points, discovered at start and amended on add/unlink.
    pub config_paths: BTreeSet<PathBuf>,
    /// Transitive dependencies from the most recent successful compile.
    pub dependency_paths: BTreeSet<PathBuf>,
}

/// Decision returned by the core after handling a single [`LoopEvent`].
#[derive(Debug, Clone)]
pub struct LoopStep {
    pub commands: Vec<LoopCommand>,
    pub keep_running: bool,
}

/// Pure orchestration state: debounce, single-flight compiles, watch-set
/// reconciliation.
#[derive(Debug)]
pub struct DevLoopCore {
    watch_set: WatchSet,
    debounce_delay: Duration,
    /// Entry point the next debounce fire should compile.
    debounce_target: Option<PathBuf>,
    /// Monotonic debounce generation; fires from older generations are stale.
    generation: u64,
    compiling: bool,
    /// Compile intent recorded while a compile is already in flight.
    pending: Option<PathBuf>,
    stopped: bool,
}

impl DevLoopCore {
    pub fn new<I>(config_paths: I, debounce_delay: Duration) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        Self {
            watch_set: WatchSet {
                config_paths: config_paths.into_iter().collect(),
                dependency_paths: BTreeSet::new(),
            },
            debounce_delay,
            debounce_target: None,
            generation: 0,
            compiling: false,
            pending: None,
            stopped: false,
        }
    }

    pub fn watch_set(&self) -> &WatchSet {
        &self.watch_set
    }

    pub fn is_compiling(&self) -> bool {
        self.compiling
    }

    /// Handle a single event, updating state and returning the resulting
    /// commands for the IO shell.
    pub fn step(&mut self, event: LoopEvent) -> LoopStep {
        if self.stopped {
            return LoopStep {
                commands: Vec::new(),
                keep_running: false,
            };
        }

        match event {
            LoopEvent::PathChanged(path) => self.handle_path_changed(path),
            LoopEvent::ConfigCandidateAdded(path) => self.handle_candidate_added(path),
            LoopEvent::PathRemoved(path) => self.handle_path_removed(path),
            LoopEvent::DebounceFired(generation) => self.handle_debounce_fired(generation),
            LoopEvent::CompileFinished(outcome) => self.handle_compile_finished(outcome),
            LoopEvent::ForceCompile => self.handle_force_compile(),
            LoopEvent::StopRequested => self.handle_stop(),
        }
    }

    fn handle_path_changed(&mut self, path: PathBuf) -> LoopStep {
        // A config change debounces toward that entry point; a dependency
        // change carries no entry-point information, so it recompiles from
        // any known config path.
        let target = if self.watch_set.config_paths.contains(&path) {
            Some(path)
        } else if self.watch_set.dependency_paths.contains(&path) {
            self.any_config_path()
        } else {
            None
        };

        let Some(target) = target else {
            return self.running(Vec::new());
        };

        self.debounce_target = Some(target);
        let commands = vec![self.reschedule_debounce()];
        self.running(commands)
    }

    fn handle_candidate_added(&mut self, path: PathBuf) -> LoopStep {
        if !self.watch_set.config_paths.insert(path.clone()) {
            // Already tracked; treat as an ordinary change.
            return self.handle_path_changed(path);
        }

        // Promoted paths were previously only covered by the base-directory
        // watch; pin them individually like the other config paths.
        self.debounce_target = Some(path.clone());
        let commands = vec![
            LoopCommand::Watch(vec![path.clone()]),
            LoopCommand::Emit(CompilerEvent::ConfigAdded(path)),
            self.reschedule_debounce(),
        ];
        self.running(commands)
    }

    fn handle_path_removed(&mut self, path: PathBuf) -> LoopStep {
        if !self.watch_set.config_paths.remove(&path) {
            // Dependency removals are picked up by the next compile's
            // manifest; nothing to do now.
            return self.running(Vec::new());
        }

        let commands = vec![
            LoopCommand::Unwatch(vec![path.clone()]),
            LoopCommand::Emit(CompilerEvent::ConfigRemoved(path)),
        ];
        self.running(commands)
    }

    fn handle_debounce_fired(&mut self, generation: u64) -> LoopStep {
        if generation != self.generation {
            // A newer trigger superseded this timer.
            return self.running(Vec::new());
        }

        let Some(target) = self.debounce_target.take() else {
            return self.running(Vec::new());
        };

        if self.compiling {
            // Coalesce into "compile again once this one finishes".
            self.pending = Some(target);
            return self.running(Vec::new());
        }

        let commands = self.start_compile(target);
        self.running(commands)
    }

    fn handle_compile_finished(&mut self, outcome: CompileOutcome) -> LoopStep {
        self.compiling = false;
        let mut commands = Vec::new();

        match outcome {
            CompileOutcome::Success(report) => {
                commands.extend(self.reconcile_dependencies(&report.dependency_paths));
                commands.push(LoopCommand::Emit(CompilerEvent::CompileSuccess(report)));
            }
            CompileOutcome::Error {
                entry,
                message,
                partial_code,
            } => {
                commands.push(LoopCommand::Emit(CompilerEvent::CompileError {
                    entry,
                    message,
                    partial_code,
                }));
            }
        }

        if let Some(next) = self.pending.take() {
            commands.extend(self.start_compile(next));
        }

        self.running(commands)
    }

    fn handle_force_compile(&mut self) -> LoopStep {
        if self.compiling {
            return self.running(Vec::new());
        }
        let Some(entry) = self.any_config_path() else {
            return self.running(Vec::new());
        };
        let commands = self.start_compile(entry);
        self.running(commands)
    }

    fn handle_stop(&mut self) -> LoopStep {
        self.stopped = true;
        // Invalidate any in-flight debounce timer.
        self.generation = self.generation.wrapping_add(1);
        self.debounce_target = None;
        self.pending = None;
        LoopStep {
            commands: vec![LoopCommand::Shutdown],
            keep_running: false,
        }
    }

    /// Diff the new dependency closure against the tracked one and produce
    /// watch/unwatch commands for the live watcher. Config paths are never
    /// part of the dependency set.
    fn reconcile_dependencies(&mut self, new_deps: &BTreeSet<PathBuf>) -> Vec<LoopCommand> {
        let new_deps: BTreeSet<PathBuf> = new_deps
            .iter()
            .filter(|p| !self.watch_set.config_paths.contains(*p))
            .cloned()
            .collect();

        let to_watch: Vec<PathBuf> = new_deps
            .difference(&self.watch_set.dependency_paths)
            .cloned()
            .collect();
        let to_unwatch: Vec<PathBuf> = self
            .watch_set
            .dependency_paths
            .difference(&new_deps)
            .cloned()
            .collect();

        self.watch_set.dependency_paths = new_deps;

        let mut commands = Vec::new();
        if !to_watch.is_empty() {
            commands.push(LoopCommand::Watch(to_watch));
        }
        if !to_unwatch.is_empty() {
            commands.push(LoopCommand::Unwatch(to_unwatch));
        }
        commands
    }

    fn start_compile(&mut self, entry: PathBuf) -> Vec<LoopCommand> {
        self.compiling = true;
        vec![
            LoopCommand::Emit(CompilerEvent::CompileStart {
                entry: entry.clone(),
            }),
            LoopCommand::StartCompile { entry },
        ]
    }

    fn reschedule_debounce(&mut self) -> LoopCommand {
        self.generation = self.generation.wrapping_add(1);
        LoopCommand::ScheduleDebounce {
            generation: self.generation,
            delay: self.debounce_delay,
        }
    }

    fn any_config_path(&self) -> Option<PathBuf> {
        self.watch_set.config_paths.iter().next().cloned()
    }

    fn running(&self, commands: Vec<LoopCommand>) -> LoopStep {
        LoopStep {
            commands,
            keep_running: !self.stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::pipeline::CompileReport;
    use std::time::Duration;

    fn config(path: &str) -> PathBuf {
        PathBuf::from(path)
    }

    fn core_with(configs: &[&str]) -> DevLoopCore {
        DevLoopCore::new(
            configs.iter().map(PathBuf::from),
            Duration::from_millis(500),
        )
    }

    fn success_report(entry: &str, deps: &[&str]) -> CompileOutcome {
        CompileOutcome::Success(CompileReport {
            entry: PathBuf::from(entry),
            output_path: PathBuf::from("/out.mjs"),
            bundles: Vec::new(),
            warnings: Vec::new(),
            cached: false,
            dependency_paths: deps.iter().map(PathBuf::from).collect(),
            metafile: None,
            duration: Duration::from_millis(1),
        })
    }

    fn compiles_started(step: &LoopStep) -> usize {
        step.commands
            .iter()
            .filter(|c| matches!(c, LoopCommand::StartCompile { .. }))
            .count()
    }

    fn last_scheduled_generation(step: &LoopStep) -> Option<u64> {
        step.commands.iter().rev().find_map(|c| match c {
            LoopCommand::ScheduleDebounce { generation, .. } => Some(*generation),
            _ => None,
        })
    }

    #[test]
    fn rapid_changes_coalesce_into_one_compile() {
        let mut core = core_with(&["/p/lightfast.config.ts"]);

        let mut last_gen = 0;
        for _ in 0..10 {
            let step = core.step(LoopEvent::PathChanged(config("/p/lightfast.config.ts")));
            last_gen = last_scheduled_generation(&step).expect("debounce scheduled");
        }

        // Only the final generation's fire compiles; the nine stale ones
        // are no-ops.
        for stale in 1..last_gen {
            let step = core.step(LoopEvent::DebounceFired(stale));
            assert_eq!(compiles_started(&step), 0);
        }
        let step = core.step(LoopEvent::DebounceFired(last_gen));
        assert_eq!(compiles_started(&step), 1);
    }

    #[test]
    fn at_most_one_compile_in_flight() {
        let mut core = core_with(&["/p/lightfast.config.ts"]);

        let step = core.step(LoopEvent::PathChanged(config("/p/lightfast.config.ts")));
        let generation = last_scheduled_generation(&step).unwrap();
        let step = core.step(LoopEvent::DebounceFired(generation));
        assert_eq!(compiles_started(&step), 1);
        assert!(core.is_compiling());

        // A trigger arriving mid-compile must not start a second compile.
        let step = core.step(LoopEvent::PathChanged(config("/p/lightfast.config.ts")));
        let generation = last_scheduled_generation(&step).unwrap();
        let step = core.step(LoopEvent::DebounceFired(generation));
        assert_eq!(compiles_started(&step), 0);

        // It is coalesced into exactly one follow-up compile on completion.
        let step = core.step(LoopEvent::CompileFinished(success_report(
            "/p/lightfast.config.ts",
            &[],
        )));
        assert_eq!(compiles_started(&step), 1);
    }

    #[test]
    fn completion_without_pending_intent_stays_idle() {
        let mut core = core_with(&["/p/lightfast.config.ts"]);
        core.step(LoopEvent::ForceCompile);
        let step = core.step(LoopEvent::CompileFinished(success_report(
            "/p/lightfast.config.ts",
            &[],
        )));
        assert_eq!(compiles_started(&step), 0);
        assert!(!core.is_compiling());
    }

    #[test]
    fn dependency_change_targets_a_known_config_path() {
        let mut core = core_with(&["/p/lightfast.config.ts"]);
        core.step(LoopEvent::ForceCompile);
        core.step(LoopEvent::CompileFinished(success_report(
            "/p/lightfast.config.ts",
            &["/p/src/tools.ts"],
        )));

        let step = core.step(LoopEvent::PathChanged(config("/p/src/tools.ts")));
        let generation = last_scheduled_generation(&step).expect("dependency change debounces");
        let step = core.step(LoopEvent::DebounceFired(generation));
        let started = step.commands.iter().find_map(|c| match c {
            LoopCommand::StartCompile { entry } => Some(entry.clone()),
            _ => None,
        });
        assert_eq!(started, Some(config("/p/lightfast.config.ts")));
    }

    #[test]
    fn untracked_paths_are_ignored() {
        let mut core = core_with(&["/p/lightfast.config.ts"]);
        let step = core.step(LoopEvent::PathChanged(config("/p/README.md")));
        assert!(step.commands.is_empty());
    }

    #[test]
    fn reconciliation_diffs_watch_set_without_restart() {
        let mut core = core_with(&["/p/lightfast.config.ts"]);

        core.step(LoopEvent::ForceCompile);
        core.step(LoopEvent::CompileFinished(success_report(
            "/p/lightfast.config.ts",
            &["/p/src/a.ts", "/p/src/b.ts"],
        )));
        assert!(core.watch_set().dependency_paths.contains(&config("/p/src/a.ts")));

        // Next compile drops b.ts and picks up x.ts.
        core.step(LoopEvent::ForceCompile);
        let step = core.step(LoopEvent::CompileFinished(success_report(
            "/p/lightfast.config.ts",
            &["/p/src/a.ts", "/p/src/x.ts"],
        )));

        let watched: Vec<PathBuf> = step
            .commands
            .iter()
            .filter_map(|c| match c {
                LoopCommand::Watch(paths) => Some(paths.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        let unwatched: Vec<PathBuf> = step
            .commands
            .iter()
            .filter_map(|c| match c {
                LoopCommand::Unwatch(paths) => Some(paths.clone()),
                _ => None,
            })
            .flatten()
            .collect();

        assert_eq!(watched, vec![config("/p/src/x.ts")]);
        assert_eq!(unwatched, vec![config("/p/src/b.ts")]);
        assert!(core.watch_set().dependency_paths.contains(&config("/p/src/x.ts")));
        assert!(!core.watch_set().dependency_paths.contains(&config("/p/src/b.ts")));
    }

    #[test]
    fn config_paths_never_enter_the_dependency_set() {
        let mut core = core_with(&["/p/lightfast.config.ts"]);
        core.step(LoopEvent::ForceCompile);
        core.step(LoopEvent::CompileFinished(success_report(
            "/p/lightfast.config.ts",
            &["/p/lightfast.config.ts", "/p/src/a.ts"],
        )));
        assert!(!core
            .watch_set()
            .dependency_paths
            .contains(&config("/p/lightfast.config.ts")));
    }

    #[test]
    fn candidate_add_promotes_and_emits() {
        let mut core = core_with(&["/p/lightfast.config.ts"]);
        let step = core.step(LoopEvent::ConfigCandidateAdded(config(
            "/p/lightfast.config.mjs",
        )));

        assert!(core
            .watch_set()
            .config_paths
            .contains(&config("/p/lightfast.config.mjs")));
        assert!(step
            .commands
            .iter()
            .any(|c| matches!(c, LoopCommand::Emit(CompilerEvent::ConfigAdded(_)))));
        assert!(last_scheduled_generation(&step).is_some());
    }

    #[test]
    fn config_unlink_demotes_without_recompiling() {
        let mut core = core_with(&["/p/lightfast.config.ts", "/p/lightfast.config.mjs"]);
        let step = core.step(LoopEvent::PathRemoved(config("/p/lightfast.config.mjs")));

        assert!(!core
            .watch_set()
            .config_paths
            .contains(&config("/p/lightfast.config.mjs")));
        assert!(step
            .commands
            .iter()
            .any(|c| matches!(c, LoopCommand::Emit(CompilerEvent::ConfigRemoved(_)))));
        assert_eq!(compiles_started(&step), 0);
        assert!(last_scheduled_generation(&step).is_none());
    }

    #[test]
    fn force_compile_is_noop_while_compiling() {
        let mut core = core_with(&["/p/lightfast.config.ts"]);
        let step = core.step(LoopEvent::ForceCompile);
        assert_eq!(compiles_started(&step), 1);

        let step = core.step(LoopEvent::ForceCompile);
        assert_eq!(compiles_started(&step), 0);
    }

    #[test]
    fn stop_cancels_pending_debounce_and_shuts_down() {
        let mut core = core_with(&["/p/lightfast.config.ts"]);
        let step = core.step(LoopEvent::PathChanged(config("/p/lightfast.config.ts")));
        let generation = last_scheduled_generation(&step).unwrap();

        let step = core.step(LoopEvent::StopRequested);
        assert!(!step.keep_running);
        assert!(step
            .commands
            .iter()
            .any(|c| matches!(c, LoopCommand::Shutdown)));

        // A timer that fires after stop does nothing.
        let step = core.step(LoopEvent::DebounceFired(generation));
        assert!(step.commands.is_empty());
        assert!(!step.keep_running);
    }

    #[test]
    fn compile_error_keeps_the_loop_alive() {
        let mut core = core_with(&["/p/lightfast.config.ts"]);
        core.step(LoopEvent::ForceCompile);
        let step = core.step(LoopEvent::CompileFinished(CompileOutcome::Error {
            entry: config("/p/lightfast.config.ts"),
            message: "syntax error".to_string(),
            partial_code: None,
        }));

        assert!(step.keep_running);
        assert!(step
            .commands
            .iter()
            .any(|c| matches!(c, LoopCommand::Emit(CompilerEvent::CompileError { .. }))));

        // And the next change still compiles.
        let step = core.step(LoopEvent::PathChanged(config("/p/lightfast.config.ts")));
        let generation = last_scheduled_generation(&step).unwrap();
        let step = core.step(LoopEvent::DebounceFired(generation));
        assert_eq!(compiles_started(&step), 1);
    }
}
