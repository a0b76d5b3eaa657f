//! Migration Generation Module
//!
//! Drives the external revision tool, stages large migrations, and annotates
//! the generated files with the safety analysis.

pub mod annotate;
pub mod generator;
pub mod inspect;
pub mod naming;
pub mod staging;
pub mod tool;

pub use generator::{GenerationResult, MigrationGenerator};
pub use inspect::ArtifactInspector;
pub use staging::Stage;
pub use tool::{AlembicTool, MigrationTool};
