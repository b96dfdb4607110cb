// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompilerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("no lightfast config file found in {0:?} (looked for lightfast.config.ts/js/mjs)")]
    NoConfigFound(PathBuf),

    #[error("dev watcher is already running; call stop() before starting again")]
    AlreadyWatching,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CompilerError>;
