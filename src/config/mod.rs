// src/config/mod.rs

//! Developer settings and config-file discovery.

pub mod discovery;
pub mod loader;
pub mod model;

pub use discovery::{discover_config_paths, is_config_candidate, CONFIG_CANDIDATES};
pub use loader::{load_and_validate, load_or_default};
pub use model::{validate_settings, DevSettings};
