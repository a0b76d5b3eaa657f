//! Safety analyzer for detected changes
//!
//! Turns a `ChangeSet` plus its dependency analysis into a `SafetyReport`:
//! aggregate risk, warnings and recommendations, estimated data volume,
//! threshold decisions, downtime, pre-flight checks and a rollback script.

use super::estimator::{RowEstimator, DEFAULT_ESTIMATE};
use super::scripts::{rollback_script, safety_checks};
use crate::config::SafetyThresholds;
use crate::dependency::DependencyAnalysis;
use crate::models::{
    Change, ChangeSet, RiskEntry, RiskLevel, SafetyReport, SchemaOp, TableImpact,
};
use std::collections::BTreeMap;
use tracing::info;

pub struct SafetyAnalyzer {
    thresholds: SafetyThresholds,
    estimator: Box<dyn RowEstimator>,
    warn_on_cross_dependencies: bool,
}

impl SafetyAnalyzer {
    pub fn new(thresholds: SafetyThresholds, estimator: Box<dyn RowEstimator>) -> Self {
        Self {
            thresholds,
            estimator,
            warn_on_cross_dependencies: true,
        }
    }

    pub fn warn_on_cross_dependencies(mut self, enabled: bool) -> Self {
        self.warn_on_cross_dependencies = enabled;
        self
    }

    /// Analyze a change set and produce the safety report
    pub fn analyze(&self, change_set: &ChangeSet, dependencies: &DependencyAnalysis) -> SafetyReport {
        let mut risks = Vec::new();
        let mut warnings = Vec::new();
        let mut recommendations = Vec::new();

        for change in &change_set.changes {
            if change.risk > RiskLevel::Low {
                risks.push(RiskEntry {
                    change: format!("{} {}", change.kind(), change.target()),
                    level: change.risk,
                    warning: change.warning.clone(),
                });
            }
            if let Some(warning) = &change.warning {
                push_unique(&mut warnings, warning.clone());
            }
            for recommendation in Self::recommend(change) {
                push_unique(&mut recommendations, recommendation);
            }
        }

        if dependencies.cross_module && self.warn_on_cross_dependencies {
            push_unique(
                &mut warnings,
                "Cross-module dependencies detected. Ensure proper migration order.".to_string(),
            );
            push_unique(
                &mut recommendations,
                format!(
                    "Apply migrations in order: {}",
                    dependencies.migration_order.join(" → ")
                ),
            );
        }

        let data_impact = self.data_impact(change_set);
        let total_rows: u64 = data_impact.values().map(|i| i.row_count).sum();

        let requires_backup = total_rows > self.thresholds.require_backup_above_rows;
        if requires_backup {
            recommendations.push(format!(
                "Backup recommended: {} rows affected",
                group_thousands(total_rows)
            ));
        }

        let requires_staging = total_rows > self.thresholds.require_staged_migration_above;
        if requires_staging {
            recommendations.push("Consider staged migration due to large data volume".to_string());
        }

        let exceeds_auto_threshold = total_rows > self.thresholds.max_affected_rows_auto;
        if exceeds_auto_threshold {
            recommendations.push(format!(
                "Manual review required: {} rows affected exceeds the auto-apply limit of {}",
                group_thousands(total_rows),
                group_thousands(self.thresholds.max_affected_rows_auto)
            ));
        }

        let estimated_downtime_seconds = estimate_downtime(&change_set.changes, &data_impact);

        let report = SafetyReport {
            risk_level: change_set.max_risk(),
            risks,
            warnings,
            recommendations,
            data_impact,
            requires_backup,
            requires_staging,
            exceeds_auto_threshold,
            estimated_downtime_seconds,
            safety_checks: safety_checks(change_set),
            rollback_script: rollback_script(change_set),
        };

        info!(
            "{} Safety analysis for '{}': {} risk, {} rows, ~{}s downtime",
            report.risk_level.emoji(),
            change_set.module,
            report.risk_level,
            total_rows,
            report.estimated_downtime_seconds
        );

        report
    }

    fn recommend(change: &Change) -> Vec<String> {
        match &change.op {
            SchemaOp::DropTable { table, .. } => vec![format!(
                "CREATE TABLE {t}_backup AS SELECT * FROM {t};",
                t = table
            )],
            SchemaOp::DropColumn { column, .. } => {
                vec![format!("Consider renaming to '{}_deprecated' instead", column)]
            }
            SchemaOp::AddColumn { .. } if change.risk > RiskLevel::Low => vec![
                "Add column as nullable first, update data, then add NOT NULL constraint"
                    .to_string(),
            ],
            SchemaOp::AlterColumnType { table, column, .. } => {
                let mut recs = vec!["Test type conversion on a data sample first".to_string()];
                if change.risk == RiskLevel::High {
                    recs.push(format!(
                        "CREATE TABLE {t}_{c}_backup AS SELECT id, {c} FROM {t};",
                        t = table,
                        c = column
                    ));
                }
                recs
            }
            SchemaOp::AlterColumnNullable {
                table,
                column,
                nullable: false,
            } => vec![format!(
                "UPDATE {t} SET {c} = <default> WHERE {c} IS NULL;",
                t = table,
                c = column
            )],
            SchemaOp::CreateIndex {
                table,
                column,
                unique: true,
            } => vec![format!(
                "Remove duplicate {}.{} values before adding the unique constraint",
                table, column
            )],
            SchemaOp::DropConstraint { table, column, .. } => vec![format!(
                "Confirm no code relies on the constraint on {}.{} before dropping it",
                table, column
            )],
            SchemaOp::ExecuteRaw { .. } => {
                vec!["Review raw SQL statements before applying".to_string()]
            }
            _ => Vec::new(),
        }
    }

    /// Tables created by this set are empty; everything else asks the estimator
    fn data_impact(&self, change_set: &ChangeSet) -> BTreeMap<String, TableImpact> {
        let created = change_set.created_tables();
        change_set
            .tables()
            .into_iter()
            .map(|table| {
                let impact = if created.contains(&table) {
                    TableImpact::empty()
                } else {
                    let stats = self.estimator.estimate(table).unwrap_or(DEFAULT_ESTIMATE);
                    TableImpact::new(stats.rows, stats.size_bytes)
                };
                (table.to_string(), impact)
            })
            .collect()
    }
}

/// Seconds of expected downtime, summed per change and floored
pub fn estimate_downtime(changes: &[Change], data_impact: &BTreeMap<String, TableImpact>) -> u64 {
    let total: f64 = changes
        .iter()
        .map(|change| {
            let rows = change
                .table()
                .and_then(|t| data_impact.get(t))
                .map(|i| i.row_count as f64)
                .unwrap_or(0.0);

            match &change.op {
                SchemaOp::CreateTable { .. } => 1.0,
                SchemaOp::DropTable { .. } => 2.0,
                SchemaOp::AddColumn { .. } => (rows / 10_000.0).max(1.0),
                SchemaOp::DropColumn { .. } => 5.0,
                SchemaOp::AlterColumnType { .. } => (rows / 5_000.0).max(5.0),
                SchemaOp::CreateIndex { .. } => (rows / 1_000.0).max(10.0),
                SchemaOp::DropConstraint { .. } => 1.0,
                SchemaOp::AlterColumnNullable { .. } | SchemaOp::ExecuteRaw { .. } => 0.0,
            }
        })
        .sum();
    total.floor() as u64
}

fn push_unique(items: &mut Vec<String>, item: String) {
    if !items.contains(&item) {
        items.push(item);
    }
}

/// `150000` -> `150,000`
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
