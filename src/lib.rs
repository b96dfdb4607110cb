// src/lib.rs

pub mod bundle;
pub mod cache;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cache::CompilationCache;
use crate::cli::CliArgs;
use crate::compiler::{CommandTranspiler, CompilePipeline};
use crate::config::{discover_config_paths, load_and_validate, DevSettings};
use crate::engine::{CompileOutcome, CompilerEvent, DevWatcher, WatchOptions};
use crate::errors::CompilerError;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - settings loading
/// - cache / transpiler / pipeline
/// - the dev watcher (unless `--once` or a maintenance flag is given)
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let base_dir = PathBuf::from(&args.dir);
    let settings_path = base_dir.join(&args.settings);
    let mut settings = load_and_validate(&settings_path)?;

    if let Some(ms) = args.debounce_ms {
        if ms == 0 {
            return Err(CompilerError::ConfigError(
                "debounce_ms must be at least 1".to_string(),
            )
            .into());
        }
        settings.debounce_ms = ms;
    }

    let cache = CompilationCache::new(base_dir.join(&settings.cache_dir));

    if args.clear_cache {
        cache.clear()?;
        println!("cache cleared: {:?}", cache.cache_dir());
        return Ok(());
    }

    if args.cache_stats {
        print_cache_stats(&cache)?;
        return Ok(());
    }

    let transpiler = Arc::new(CommandTranspiler::new(settings.transpiler_command.clone()));
    let pipeline = Arc::new(CompilePipeline::new(
        cache,
        transpiler,
        base_dir.join(&settings.output_dir),
        env!("CARGO_PKG_VERSION"),
    ));

    if args.once {
        return run_once(&base_dir, &pipeline).await;
    }

    let options = WatchOptions {
        debounce_delay: Duration::from_millis(settings.debounce_ms),
        ignore_initial: settings.ignore_initial,
        extra_watch_paths: resolve_extra_paths(&base_dir, &settings),
    };

    let (events_tx, mut events_rx) = mpsc::channel::<CompilerEvent>(64);
    let mut watcher = DevWatcher::new(base_dir, pipeline, options, events_tx);
    watcher.start().await?;

    // Ctrl-C → graceful shutdown.
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    eprintln!("failed to listen for Ctrl+C: {e}");
                }
                info!("shutdown requested");
                break;
            }
            event = events_rx.recv() => {
                match event {
                    Some(event) => print_event(&event),
                    None => {
                        debug!("event stream closed");
                        break;
                    }
                }
            }
        }
    }

    watcher.stop().await;
    Ok(())
}

/// `--once` mode: compile every discovered config sequentially, no watching.
/// Exits non-zero (via the returned error) if any compile fails.
async fn run_once(base_dir: &Path, pipeline: &CompilePipeline) -> Result<()> {
    let config_paths = discover_config_paths(base_dir);
    if config_paths.is_empty() {
        return Err(CompilerError::NoConfigFound(base_dir.to_path_buf()).into());
    }

    let mut failed = 0usize;
    for entry in &config_paths {
        match pipeline.compile(entry, base_dir, None).await {
            CompileOutcome::Success(report) => {
                println!(
                    "compiled {:?} -> {} bundle(s){} in {}ms",
                    report.entry,
                    report.bundles.len(),
                    if report.cached { " (cached)" } else { "" },
                    report.duration.as_millis()
                );
                for bundle in &report.bundles {
                    println!("  {} ({} bytes)", bundle.filename, bundle.size);
                }
            }
            CompileOutcome::Error { entry, message, .. } => {
                eprintln!("compile failed for {entry:?}: {message}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} compile(s) failed");
    }
    Ok(())
}

fn resolve_extra_paths(base_dir: &Path, settings: &DevSettings) -> Vec<PathBuf> {
    settings
        .extra_watch_paths
        .iter()
        .map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                base_dir.join(p)
            }
        })
        .collect()
}

fn print_cache_stats(cache: &CompilationCache) -> Result<()> {
    let stats = cache.stats()?;
    println!("cache: {:?}", cache.cache_dir());
    println!("  entries: {}", stats.entries);
    println!("  total size: {} bytes", stats.total_size);
    if let Some(oldest) = stats.oldest_entry {
        println!("  oldest entry: {oldest} (unix ms)");
    }
    if let Some(newest) = stats.newest_entry {
        println!("  newest entry: {newest} (unix ms)");
    }
    for file in &stats.files {
        println!("  {file:?}");
    }
    Ok(())
}

fn print_event(event: &CompilerEvent) {
    match event {
        CompilerEvent::WatcherReady => println!("watching for changes..."),
        CompilerEvent::CompileStart { entry } => println!("compiling {entry:?}..."),
        CompilerEvent::CompileSuccess(report) => {
            println!(
                "compiled {:?} -> {} bundle(s){} in {}ms",
                report.entry,
                report.bundles.len(),
                if report.cached { " (cached)" } else { "" },
                report.duration.as_millis()
            );
        }
        CompilerEvent::CompileError { entry, message, .. } => {
            eprintln!("compile failed for {entry:?}: {message}");
        }
        CompilerEvent::ConfigAdded(path) => println!("new config detected: {path:?}"),
        CompilerEvent::ConfigRemoved(path) => println!("config removed: {path:?}"),
        CompilerEvent::WatcherError { message } => eprintln!("watcher error: {message}"),
    }
}
