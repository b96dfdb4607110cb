// src/config/model.rs

use std::path::PathBuf;

use serde::Deserialize;

use crate::errors::{CompilerError, Result};

/// Developer-facing settings, loaded from an optional `lightfast-dev.toml`.
///
/// Every field has a default; a missing settings file means "all defaults".
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DevSettings {
    /// Cache directory, relative to the project directory.
    pub cache_dir: PathBuf,
    /// Bundle output directory, relative to the project directory.
    pub output_dir: PathBuf,
    /// Debounce delay for file-change bursts, in milliseconds.
    pub debounce_ms: u64,
    /// Skip the initial compile at watcher start.
    pub ignore_initial: bool,
    /// Extra paths to watch beyond the discovered config files.
    pub extra_watch_paths: Vec<PathBuf>,
    /// External bundler command producing JSON transpile output on stdout.
    pub transpiler_command: String,
}

impl Default for DevSettings {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".lightfast"),
            output_dir: PathBuf::from(".lightfast/bundles"),
            debounce_ms: 500,
            ignore_initial: false,
            extra_watch_paths: Vec::new(),
            transpiler_command: "lightfast-bundler".to_string(),
        }
    }
}

/// Basic sanity checks over loaded settings.
pub fn validate_settings(settings: &DevSettings) -> Result<()> {
    if settings.debounce_ms == 0 {
        return Err(CompilerError::ConfigError(
            "debounce_ms must be at least 1".to_string(),
        ));
    }
    if settings.transpiler_command.trim().is_empty() {
        return Err(CompilerError::ConfigError(
            "transpiler_command must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        validate_settings(&DevSettings::default()).unwrap();
    }

    #[test]
    fn zero_debounce_is_rejected() {
        let settings = DevSettings {
            debounce_ms: 0,
            ..DevSettings::default()
        };
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn toml_overrides_apply_over_defaults() {
        let settings: DevSettings =
            toml::from_str("debounce_ms = 250\ncache_dir = \".cache\"").unwrap();
        assert_eq!(settings.debounce_ms, 250);
        assert_eq!(settings.cache_dir, PathBuf::from(".cache"));
        assert_eq!(settings.transpiler_command, "lightfast-bundler");
    }
}
