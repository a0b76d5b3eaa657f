//! Model Snapshot Module
//!
//! Detecting what changed in the model declarations.
//! This module provides:
//! - Snapshot store (last-seen text per model file)
//! - Declaration parser (tokenizer + recursive descent)
//! - Diff engine (risk-rated changes between two parses)
//! - Change detector (two-phase observe / commit)

pub mod detector;
pub mod diff;
pub mod parser;
pub mod store;

pub use detector::{ModelChangeDetector, Observation};
pub use diff::DiffEngine;
pub use parser::ModelParser;
pub use store::{FileSnapshotStore, MemorySnapshotStore, Snapshot, SnapshotStore};
