//! Run reports
//!
//! Console alert and summary, the Markdown analysis document, and the
//! append-only history directory holding one JSON and one Markdown file per
//! successful run.

use crate::error::GuardianResult;
use crate::models::{Change, RiskLevel, RunReport, SafetyReport, SchemaOp};
use crate::safety::analyzer::group_thousands;
use std::path::{Path, PathBuf};
use tracing::info;

const RULE_WIDTH: usize = 60;

/// Alert shown before asking for confirmation
pub fn format_alert(report: &SafetyReport) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let title = match report.risk_level {
        RiskLevel::High => "🚨 MIGRATION GUARDIAN: DANGEROUS OPERATION DETECTED!",
        RiskLevel::Medium => "⚠️  MIGRATION GUARDIAN: CAUTION REQUIRED",
        RiskLevel::Low => "✅ MIGRATION GUARDIAN: Safe Migration",
    };
    let mut out = vec![String::new(), rule.clone(), title.to_string(), rule.clone(), String::new()];

    if !report.risks.is_empty() {
        out.push("⚠️  RISKS DETECTED:".to_string());
        out.extend(report.risks.iter().map(|r| format!("   - {}", r.change)));
        out.push(String::new());
    }

    if !report.warnings.is_empty() {
        out.push("🔴 WARNINGS:".to_string());
        out.extend(report.warnings.iter().map(|w| format!("   - {}", w)));
        out.push(String::new());
    }

    let with_data: Vec<_> = report
        .data_impact
        .iter()
        .filter(|(_, impact)| impact.has_data)
        .collect();
    if !with_data.is_empty() {
        out.push("📊 DATA IMPACT:".to_string());
        for (table, impact) in with_data {
            out.push(format!(
                "   - {}: {} rows affected",
                table,
                group_thousands(impact.row_count)
            ));
        }
        out.push(String::new());
    }

    if !report.recommendations.is_empty() {
        out.push("💡 RECOMMENDATIONS:".to_string());
        out.extend(report.recommendations.iter().map(|r| format!("   - {}", r)));
        out.push(String::new());
    }

    if report.risk_level == RiskLevel::High {
        out.extend(
            [
                "🛡️  SAFETY CHECKLIST:",
                "   [ ] Database backup created",
                "   [ ] Tested on staging environment",
                "   [ ] Downtime window scheduled",
                "   [ ] Rollback plan prepared",
                "   [ ] Team notified of changes",
                "",
            ]
            .map(String::from),
        );
    }

    out.push(rule);
    out.join("\n")
}

/// Summary printed to stdout after a run
pub fn console_report(run: &RunReport) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = vec![
        String::new(),
        rule.clone(),
        "🔄 MIGRATION GUARDIAN REPORT".to_string(),
        rule.clone(),
        String::new(),
        format!("📦 Module: {}", run.module),
        format!("📝 Changes detected: {}", run.change_set.len()),
    ];

    if run.dependencies.cross_module {
        out.push(String::new());
        out.push("🔗 Cross-Module Dependencies:".to_string());
        for edge in &run.dependencies.edges {
            out.push(format!(
                "   {} → {} ({})",
                edge.from_module, edge.to_module, edge.reference
            ));
        }
    }

    let risk = run.safety_report.risk_level;
    out.push(String::new());
    out.push(format!("🛡️ Risk Level: {} {}", risk.emoji(), risk));

    out.push(String::new());
    out.push(format!("📝 Migrations Generated: {}", run.migrations.len()));
    for (i, migration) in run.migrations.iter().enumerate() {
        out.push(format!("   {}. {}", i + 1, migration.filename));
        for warning in &migration.warnings {
            out.push(format!("      ⚠️  {}", warning));
        }
    }
    if let Some(failure) = &run.failure {
        let stage = failure
            .stage
            .map(|s| format!(" at stage {}", s))
            .unwrap_or_default();
        out.push(format!("   ❌ Generation stopped{}: {}", stage, failure.message));
    }

    if !run.safety_report.recommendations.is_empty() {
        out.push(String::new());
        out.push("💡 Recommendations:".to_string());
        out.extend(
            run.safety_report
                .recommendations
                .iter()
                .map(|r| format!("   • {}", r)),
        );
    }

    out.push(String::new());
    out.push(rule);
    out.join("\n")
}

/// Markdown analysis document
pub fn render_markdown(run: &RunReport) -> String {
    let safety = &run.safety_report;
    let deps = &run.dependencies;
    let mut md = vec![
        "# Migration Guardian Report".to_string(),
        format!("**Date**: {}", run.timestamp.format("%Y-%m-%d %H:%M:%S UTC")),
        format!("**Module**: {}", run.module),
        format!("**Run**: {}", run.id),
        String::new(),
        "## Summary".to_string(),
        format!("- **Changes Detected**: {}", run.change_set.len()),
        format!("- **Migrations Generated**: {}", run.migrations.len()),
        format!("- **Risk Level**: {}", safety.risk_level),
        format!(
            "- **Cross-Module Dependencies**: {}",
            if deps.cross_module { "Yes" } else { "No" }
        ),
        String::new(),
        "## Changes Detail".to_string(),
        String::new(),
        "| Type | Table | Details | Risk |".to_string(),
        "|------|-------|---------|------|".to_string(),
    ];
    for change in &run.change_set.changes {
        md.push(format!(
            "| {} | {} | {} | {} |",
            change.kind(),
            change.table().unwrap_or("-"),
            change_details(change),
            change.risk
        ));
    }
    md.push(String::new());

    if deps.cross_module {
        md.push("## Cross-Module Dependencies".to_string());
        md.push(String::new());
        for edge in &deps.edges {
            md.push(format!(
                "- **{}** → **{}** (foreign_key: {})",
                edge.from_module, edge.to_module, edge.reference
            ));
        }
        md.push(String::new());
        md.push("### Migration Order".to_string());
        md.push(format!(
            "Apply migrations in this order: {}",
            deps.migration_order.join(" → ")
        ));
        md.push(String::new());
    }

    md.push("## Safety Analysis".to_string());
    md.push(String::new());
    md.push(format!("**Overall Risk**: {}", safety.risk_level));
    md.push(format!(
        "**Estimated Downtime**: ~{} seconds",
        safety.estimated_downtime_seconds
    ));
    md.push(String::new());

    if !safety.warnings.is_empty() {
        md.push("### Warnings".to_string());
        md.extend(safety.warnings.iter().map(|w| format!("- ⚠️  {}", w)));
        md.push(String::new());
    }

    if !safety.recommendations.is_empty() {
        md.push("### Recommendations".to_string());
        md.extend(safety.recommendations.iter().map(|r| format!("- 💡 {}", r)));
        md.push(String::new());
    }

    if !safety.data_impact.is_empty() {
        md.push("### Data Impact".to_string());
        md.push(String::new());
        md.push("| Table | Rows | Size (MB) |".to_string());
        md.push("|-------|------|-----------|".to_string());
        for (table, impact) in &safety.data_impact {
            let size = impact
                .size
                .map(|bytes| format!("{:.1}", bytes as f64 / (1024.0 * 1024.0)))
                .unwrap_or_else(|| "unknown".to_string());
            md.push(format!(
                "| {} | {} | {} |",
                table,
                group_thousands(impact.row_count),
                size
            ));
        }
        md.push(String::new());
    }

    if !safety.safety_checks.is_empty() {
        md.push("### Pre-flight Checks".to_string());
        md.push(String::new());
        md.push("```sql".to_string());
        md.extend(safety.safety_checks.iter().cloned());
        md.push("```".to_string());
        md.push(String::new());
    }

    md.push("## Generated Migrations".to_string());
    md.push(String::new());
    for (i, migration) in run.migrations.iter().enumerate() {
        md.push(format!(
            "{}. {} `{}`",
            i + 1,
            migration.risk_level.emoji(),
            migration.filename
        ));
        md.extend(migration.warnings.iter().map(|w| format!("   - {}", w)));
    }
    if let Some(failure) = &run.failure {
        md.push(String::new());
        md.push(format!("**Generation failed**: {}", failure.message));
    }

    md.extend(
        [
            "",
            "## Next Steps",
            "",
            "1. Review the generated migration files",
            "2. Test migrations on a staging database",
            "3. Create database backup if needed",
            "4. Apply migrations in the recommended order",
            "5. Monitor application after deployment",
            "",
        ]
        .map(String::from),
    );

    if safety.risk_level == RiskLevel::High {
        md.push("## Emergency Rollback SQL".to_string());
        md.push(String::new());
        md.push("```sql".to_string());
        md.push("-- Save this for emergency rollback".to_string());
        for change in &run.change_set.changes {
            if let SchemaOp::DropColumn { table, column, .. } = &change.op {
                md.push(format!("-- Before dropping {}.{}:", table, column));
                md.push(format!(
                    "CREATE TABLE {t}_{c}_backup AS SELECT id, {c} FROM {t};",
                    t = table,
                    c = column
                ));
            }
        }
        if !safety.rollback_script.is_empty() {
            md.push(String::new());
            md.push("-- Reverse of this migration".to_string());
            md.push(safety.rollback_script.clone());
        }
        md.push("```".to_string());
        md.push(String::new());
    }

    md.join("\n")
}

fn change_details(change: &Change) -> String {
    let details = match &change.op {
        SchemaOp::CreateTable { fields, .. } => vec![format!("{} columns", fields.len())],
        SchemaOp::DropTable { model, .. } => vec![format!("Model: {}", model)],
        SchemaOp::AddColumn { field, .. } => {
            let mut d = vec![
                format!("Column: {}", field.name),
                format!("Type: {}", field.column_type),
                format!("Nullable: {}", field.nullable),
            ];
            if let Some(fk) = &field.foreign_key {
                d.push(format!("FK: {}", fk));
            }
            d
        }
        SchemaOp::DropColumn {
            column,
            column_type,
            ..
        } => vec![format!("Column: {}", column), format!("Type: {}", column_type)],
        SchemaOp::AlterColumnType {
            column,
            old_type,
            new_type,
            ..
        } => vec![format!("Column: {}", column), format!("{} → {}", old_type, new_type)],
        SchemaOp::AlterColumnNullable {
            column, nullable, ..
        } => vec![format!("Column: {}", column), format!("Nullable: {}", nullable)],
        SchemaOp::CreateIndex { column, unique, .. } => vec![
            format!("Column: {}", column),
            (if *unique { "Unique" } else { "Index" }).to_string(),
        ],
        SchemaOp::DropConstraint {
            column, constraint, ..
        } => vec![format!("Column: {}", column), format!("{:?}", constraint)],
        SchemaOp::ExecuteRaw { sql, .. } => vec![format!("`{}`", sql.replace('|', "\\|"))],
    };
    details.join(", ")
}

/// Writes run reports into the history directory without ever overwriting
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `<timestamp>_<module>_analysis.{json,md}` and return the JSON path
    pub async fn write(&self, run: &RunReport) -> GuardianResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let stem = format!(
            "{}_{}_analysis",
            run.timestamp.format("%Y_%m_%d_%H%M%S"),
            run.module
        );
        let stem = self.free_stem(&stem).await;

        let json_path = self.dir.join(format!("{}.json", stem));
        tokio::fs::write(&json_path, serde_json::to_string_pretty(run)?).await?;
        tokio::fs::write(self.dir.join(format!("{}.md", stem)), render_markdown(run)).await?;

        info!("📄 Detailed report saved to: {}", json_path.display());
        Ok(json_path)
    }

    /// First stem with neither a `.json` nor a `.md` file on disk
    async fn free_stem(&self, stem: &str) -> String {
        let mut candidate = stem.to_string();
        let mut n = 1;
        while self.taken(&candidate).await {
            candidate = format!("{}_{}", stem, n);
            n += 1;
        }
        candidate
    }

    async fn taken(&self, stem: &str) -> bool {
        for ext in ["json", "md"] {
            let path = self.dir.join(format!("{}.{}", stem, ext));
            if tokio::fs::try_exists(&path).await.unwrap_or(true) {
                return true;
            }
        }
        false
    }
}
