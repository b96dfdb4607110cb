// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{validate_settings, DevSettings};
use crate::errors::Result;

/// Load settings from a given path, falling back to built-in defaults when
/// the file does not exist. A present-but-broken file is an error; silently
/// ignoring it would mask typos.
pub fn load_or_default(path: impl AsRef<Path>) -> Result<DevSettings> {
    let path = path.as_ref();
    if !path.is_file() {
        return Ok(DevSettings::default());
    }

    let contents = fs::read_to_string(path)?;
    let settings: DevSettings = toml::from_str(&contents)?;
    Ok(settings)
}

/// Load settings and run basic validation. Recommended entry point.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<DevSettings> {
    let settings = load_or_default(path)?;
    validate_settings(&settings)?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_and_validate("/definitely/not/here.toml").unwrap();
        assert_eq!(settings.debounce_ms, 500);
    }

    #[test]
    fn broken_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lightfast-dev.toml");
        fs::write(&path, "debounce_ms = \"soon\"").unwrap();
        assert!(load_and_validate(&path).is_err());
    }
}
