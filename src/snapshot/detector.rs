//! Model Change Detector
//!
//! Reads a model file, compares it with the stored snapshot and yields the
//! module's `ChangeSet`. Detection is fail-soft: unreadable or unparsable
//! files are logged and produce an empty set without touching the snapshot.

use super::diff::DiffEngine;
use super::parser::ModelParser;
use super::store::{checksum, Snapshot, SnapshotStore};
use crate::error::GuardianResult;
use crate::models::ChangeSet;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Result of the first detection phase
#[derive(Debug, Clone)]
pub struct Observation {
    pub change_set: ChangeSet,
    /// Snapshot to store once the run completes; `None` when nothing should change
    pub pending: Option<Snapshot>,
}

impl Observation {
    fn unchanged(module: &str) -> Self {
        Self {
            change_set: ChangeSet::empty(module),
            pending: None,
        }
    }
}

pub struct ModelChangeDetector<S> {
    parser: ModelParser,
    store: S,
}

impl<S: SnapshotStore> ModelChangeDetector<S> {
    pub fn new(parser: ModelParser, store: S) -> Self {
        Self { parser, store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn parser(&self) -> &ModelParser {
        &self.parser
    }

    /// Detect and immediately commit the new snapshot
    pub fn detect_changes(&mut self, path: &Path, module: &str) -> ChangeSet {
        let observation = self.observe(path, module);
        if let Err(e) = self.commit(&observation) {
            error!("❌ Failed to store snapshot for {}: {}", path.display(), e);
        }
        observation.change_set
    }

    /// Read `path` and diff it against the stored snapshot, without storing anything
    pub fn observe(&self, path: &Path, module: &str) -> Observation {
        match std::fs::read_to_string(path) {
            Ok(content) => self.observe_content(path, &content, module),
            Err(e) => {
                error!("❌ Cannot read {}: {}", path.display(), e);
                Observation::unchanged(module)
            }
        }
    }

    pub fn observe_content(&self, path: &Path, content: &str, module: &str) -> Observation {
        let previous = match self.store.load(path) {
            Ok(previous) => previous,
            Err(e) => {
                warn!("⚠️  Ignoring unreadable snapshot for {}: {}", path.display(), e);
                None
            }
        };

        if previous
            .as_ref()
            .is_some_and(|p| p.checksum == checksum(content))
        {
            debug!("No changes in {} (checksum match)", path.display());
            return Observation::unchanged(module);
        }

        let current = match self.parser.parse(content) {
            Ok(models) => models,
            Err(e) => {
                error!("❌ Failed to parse {}: {}", path.display(), e);
                return Observation::unchanged(module);
            }
        };

        let changes = match previous {
            None => DiffEngine::initial(&current),
            Some(previous) => match self.parser.parse(&previous.content) {
                Ok(old) => DiffEngine::diff(&old, &current),
                Err(e) => {
                    warn!(
                        "⚠️  Stored snapshot of {} no longer parses ({}), treating file as new",
                        path.display(),
                        e
                    );
                    DiffEngine::initial(&current)
                }
            },
        };

        info!(
            "🔍 Detected {} change(s) in {} for module '{}'",
            changes.len(),
            path.display(),
            module
        );

        Observation {
            change_set: ChangeSet::new(module, changes),
            pending: Some(Snapshot::new(path, content)),
        }
    }

    /// Second phase: persist the observed content
    pub fn commit(&mut self, observation: &Observation) -> GuardianResult<()> {
        if let Some(snapshot) = &observation.pending {
            self.store.save(snapshot.clone())?;
        }
        Ok(())
    }
}
