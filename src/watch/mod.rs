// src/watch/mod.rs

//! File watching.
//!
//! This module wires up a cross-platform filesystem watcher (`notify`) whose
//! watch set is mutated in place as the dependency closure changes. It does
//! **not** know about debouncing or compiles; it only turns filesystem
//! changes into loop events for the engine.

pub mod watcher;

pub use watcher::FileWatcher;
