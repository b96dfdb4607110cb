// src/bundle/mod.rs

//! Bundle splitting: turning one compiled config module into N
//! independently addressable, hash-named artifacts.

pub mod scan;
pub mod splitter;

pub use scan::{scan_agents, AgentRef};
pub use splitter::{generate_bundles, Bundle, BundleMetadata};
