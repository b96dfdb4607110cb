// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for the lightfast compiler.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "lightfast-compiler",
    version,
    about = "Compile lightfast agent configs into deployable bundles and keep them fresh.",
    long_about = None
)]
pub struct CliArgs {
    /// Project directory containing the lightfast config.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub dir: String,

    /// Path to the dev settings file (TOML), relative to the project
    /// directory. Missing file means built-in defaults.
    #[arg(long, value_name = "PATH", default_value = "lightfast-dev.toml")]
    pub settings: String,

    /// Compile the discovered configs once and exit, no watching.
    #[arg(long)]
    pub once: bool,

    /// Delete the compilation cache and exit.
    #[arg(long)]
    pub clear_cache: bool,

    /// Print cache statistics and exit.
    #[arg(long)]
    pub cache_stats: bool,

    /// Override the debounce delay in milliseconds.
    #[arg(long, value_name = "MS")]
    pub debounce_ms: Option<u64>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `LIGHTFAST_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
