//! SchemaGuard - Migration Safety Guardian
//!
//! Watches declarative ORM model files, detects schema changes between
//! edits, rates their risk, orders cross-module dependencies, and drives an
//! external revision tool to produce safety-annotated migrations.
//!
//! Pipeline stages:
//! - Snapshot: parse model files and diff them against the last observation
//! - Dependency: map tables to modules and order modules topologically
//! - Safety: risk, data volume, downtime, pre-flight checks, rollback SQL
//! - Migration: staged generation, naming, annotation, artifact inspection
//! - Pipeline: hook events, confirmation policy, reports

pub mod config;
pub mod dependency;
pub mod error;
pub mod migration;
pub mod models;
pub mod pipeline;
pub mod safety;
pub mod snapshot;

pub use config::GuardianConfig;
pub use error::{GuardianError, GuardianResult};
pub use pipeline::{Guardian, HookEvent, RunOutcome};
