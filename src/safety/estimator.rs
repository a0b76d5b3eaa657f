//! Row-count estimation
//!
//! The analyzer never talks to a database. It asks a `RowEstimator` how big a
//! table is and falls back to a fixed guess when the estimator has no answer.

use crate::config::TableStats;
use std::collections::BTreeMap;

/// Assumed size of a table nobody told us about
pub const DEFAULT_ESTIMATE: TableStats = TableStats {
    rows: 1_000,
    size_bytes: None,
};

pub trait RowEstimator: Send + Sync {
    fn estimate(&self, table: &str) -> Option<TableStats>;
}

/// Estimator backed by the configured `table_stats`
#[derive(Debug, Clone, Default)]
pub struct StaticEstimator {
    stats: BTreeMap<String, TableStats>,
}

impl StaticEstimator {
    pub fn new(stats: BTreeMap<String, TableStats>) -> Self {
        Self { stats }
    }

    pub fn with_table(mut self, table: impl Into<String>, rows: u64) -> Self {
        self.stats.insert(
            table.into(),
            TableStats {
                rows,
                size_bytes: None,
            },
        );
        self
    }
}

impl RowEstimator for StaticEstimator {
    fn estimate(&self, table: &str) -> Option<TableStats> {
        self.stats.get(table).copied()
    }
}
