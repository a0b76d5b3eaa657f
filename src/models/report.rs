//! Analysis results and generated artifacts

use crate::models::change::{ChangeSet, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Estimated data volume for a touched table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableImpact {
    pub row_count: u64,
    /// Size in bytes, `None` when the estimator does not know
    pub size: Option<u64>,
    pub has_data: bool,
}

impl TableImpact {
    pub fn new(row_count: u64, size: Option<u64>) -> Self {
        Self {
            row_count,
            size,
            has_data: row_count > 0,
        }
    }

    /// A table created in the same run holds nothing yet
    pub fn empty() -> Self {
        Self::new(0, Some(0))
    }
}

/// A non-LOW change as listed in the safety report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskEntry {
    pub change: String,
    pub level: RiskLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Aggregate safety assessment of one `ChangeSet`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub risk_level: RiskLevel,
    pub risks: Vec<RiskEntry>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub data_impact: BTreeMap<String, TableImpact>,
    pub requires_backup: bool,
    pub requires_staging: bool,
    pub exceeds_auto_threshold: bool,
    pub estimated_downtime_seconds: u64,
    pub safety_checks: Vec<String>,
    pub rollback_script: String,
}

impl SafetyReport {
    /// Total rows across every touched table
    pub fn total_rows(&self) -> u64 {
        self.data_impact.values().map(|i| i.row_count).sum()
    }
}

/// A migration file emitted by the revision tool and annotated afterwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationArtifact {
    pub filename: String,
    pub filepath: PathBuf,
    pub module: String,
    pub risk_level: RiskLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_name: Option<String>,
    pub description: String,
    pub warnings: Vec<String>,
}

/// Structured failure that halted generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationFailure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<usize>,
    pub message: String,
}

/// Persisted record of one guardian run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub module: String,
    pub change_set: ChangeSet,
    pub dependencies: crate::dependency::DependencyAnalysis,
    pub safety_report: SafetyReport,
    pub migrations: Vec<MigrationArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<GenerationFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_impact_has_data() {
        assert!(TableImpact::new(10, None).has_data);
        assert!(!TableImpact::empty().has_data);
    }
}
