//! Declaration Snapshot Store
//!
//! Keeps the last-seen text of every monitored model file so the next
//! observation can be diffed against it. One entry per source file, replaced
//! wholesale on every save.

use crate::error::{snapshot_error, GuardianResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Last observed content of one model file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub source: PathBuf,
    pub content: String,
    /// SHA-256 of `content`, hex encoded
    pub checksum: String,
    pub captured_at: DateTime<Utc>,
    /// Number of times this file has been observed
    pub version: u64,
}

impl Snapshot {
    pub fn new(source: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            source: source.into(),
            checksum: checksum(&content),
            content,
            captured_at: Utc::now(),
            version: 1,
        }
    }
}

/// Compute the hex SHA-256 checksum of a text
pub fn checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Key-value persistence for snapshots, keyed by source path
pub trait SnapshotStore {
    fn load(&self, source: &Path) -> GuardianResult<Option<Snapshot>>;

    /// Replace the entry for `snapshot.source`, bumping its version
    fn save(&mut self, snapshot: Snapshot) -> GuardianResult<Snapshot>;
}

/// In-memory store, used by tests and one-shot `check` runs
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: HashMap<PathBuf, Snapshot>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, source: &Path) -> GuardianResult<Option<Snapshot>> {
        Ok(self.snapshots.get(source).cloned())
    }

    fn save(&mut self, mut snapshot: Snapshot) -> GuardianResult<Snapshot> {
        if let Some(previous) = self.snapshots.get(&snapshot.source) {
            snapshot.version = previous.version + 1;
        }
        self.snapshots
            .insert(snapshot.source.clone(), snapshot.clone());
        Ok(snapshot)
    }
}

/// Store backed by one JSON file per source under a cache directory
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<file name>_<first 8 hex chars of sha256(path)>.json`
    fn entry_path(&self, source: &Path) -> PathBuf {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".to_string());
        let key = checksum(&source.to_string_lossy());
        self.dir.join(format!("{}_{}.json", name, &key[..8]))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self, source: &Path) -> GuardianResult<Option<Snapshot>> {
        let path = self.entry_path(source);
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(&path)?;
        let snapshot: Snapshot = serde_json::from_str(&raw)
            .map_err(|e| snapshot_error(&path, format!("corrupt snapshot: {}", e)))?;
        Ok(Some(snapshot))
    }

    fn save(&mut self, mut snapshot: Snapshot) -> GuardianResult<Snapshot> {
        std::fs::create_dir_all(&self.dir)?;

        // Version continues from whatever is readable; a corrupt entry restarts at 1
        if let Ok(Some(previous)) = self.load(&snapshot.source) {
            snapshot.version = previous.version + 1;
        }

        let path = self.entry_path(&snapshot.source);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?)?;
        std::fs::rename(&tmp, &path)?;

        tracing::debug!(
            "💾 Saved snapshot v{} for {} ({})",
            snapshot.version,
            snapshot.source.display(),
            &snapshot.checksum[..12]
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable() {
        assert_eq!(checksum("abc"), checksum("abc"));
        assert_ne!(checksum("abc"), checksum("abd"));
        assert_eq!(checksum("").len(), 64);
    }

    #[test]
    fn test_memory_store_replaces_entry() {
        let mut store = MemorySnapshotStore::new();
        let path = Path::new("app/auth/models/user.py");

        assert!(store.load(path).unwrap().is_none());
        store.save(Snapshot::new(path, "v1")).unwrap();
        let saved = store.save(Snapshot::new(path, "v2")).unwrap();

        assert_eq!(saved.version, 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.load(path).unwrap().unwrap().content, "v2");
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileSnapshotStore::new(dir.path().join("cache"));
        let path = Path::new("app/billing/models/invoice.py");

        store.save(Snapshot::new(path, "class Invoice(Base): ...")).unwrap();
        let loaded = store.load(path).unwrap().unwrap();

        assert_eq!(loaded.content, "class Invoice(Base): ...");
        assert_eq!(loaded.checksum, checksum("class Invoice(Base): ..."));
        assert!(!store.entry_path(path).with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_store_keys_by_full_path() {
        let store = FileSnapshotStore::new("/tmp/cache");
        assert_ne!(
            store.entry_path(Path::new("app/a/models/base.py")),
            store.entry_path(Path::new("app/b/models/base.py"))
        );
    }

    #[test]
    fn test_corrupt_entry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        let path = Path::new("app/auth/models/user.py");
        std::fs::write(store.entry_path(path), "not json").unwrap();

        assert!(store.load(path).is_err());
    }
}
