//! Migration file annotation
//!
//! Generated revision files get a header docstring summarising the analysis,
//! safety comments at the top of `upgrade()`, and a rollback warning at the
//! top of `downgrade()` when the migration is HIGH risk.

use crate::dependency::DependencyAnalysis;
use crate::models::{Change, ChangeSet, RiskLevel, SafetyReport};
use crate::safety::analyzer::group_thousands;
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;

static REVISION_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^revision\b").expect("valid regex"));
static UPGRADE_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"def upgrade\(\)[^:]*:").expect("valid regex"));
static DOWNGRADE_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"def downgrade\(\)[^:]*:").expect("valid regex"));

/// What the `upgrade()`/`downgrade()` comments are derived from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyNotes {
    pub risk: RiskLevel,
    pub requires_backup: bool,
    /// `TYPE on table` for every non-LOW operation
    pub operations: Vec<String>,
}

impl SafetyNotes {
    pub fn from_changes(changes: &[Change], requires_backup: bool) -> Self {
        Self {
            risk: changes.iter().map(|c| c.risk).max().unwrap_or_default(),
            requires_backup,
            operations: changes
                .iter()
                .filter(|c| c.risk > RiskLevel::Low)
                .map(|c| match c.table() {
                    Some(table) => format!("{} on {}", c.kind(), table),
                    None => c.kind().to_string(),
                })
                .collect(),
        }
    }

    /// Raise the risk after the artifact itself was inspected
    pub fn escalate(&mut self, risk: RiskLevel, operation: String) {
        self.risk = self.risk.max(risk);
        if risk > RiskLevel::Low {
            self.operations.push(operation);
        }
    }
}

/// Header docstring for a single (unstaged) migration
pub fn render_header(
    change_set: &ChangeSet,
    dependencies: &DependencyAnalysis,
    report: &SafetyReport,
    generated_at: &NaiveDateTime,
) -> String {
    let mut lines = vec![
        "\"\"\"".to_string(),
        "Migration Guardian Analysis".to_string(),
        "==========================".to_string(),
        String::new(),
        format!("Module: {}", change_set.module),
        format!("Risk Level: {} {}", report.risk_level.emoji(), report.risk_level),
        format!("Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S")),
        String::new(),
        "Changes Summary:".to_string(),
        "---------------".to_string(),
    ];
    for change in &change_set.changes {
        lines.push(format!("- {}: {}", change.kind(), change.target()));
    }

    if !report.data_impact.is_empty() {
        section(&mut lines, "Affected Data:", "--------------");
        for (table, impact) in &report.data_impact {
            lines.push(format!("- {}: {} rows", table, group_thousands(impact.row_count)));
        }
    }

    lines.push(String::new());
    lines.push(format!(
        "Estimated Migration Time: ~{} seconds",
        report.estimated_downtime_seconds
    ));

    if dependencies.cross_module {
        section(&mut lines, "Cross-Module Dependencies:", "-------------------------");
        for edge in &dependencies.edges {
            lines.push(format!(
                "- {} → {} ({})",
                edge.from_module, edge.to_module, edge.reference
            ));
        }
    }

    if !report.warnings.is_empty() {
        section(&mut lines, "⚠️  WARNINGS:", "----------");
        lines.extend(report.warnings.iter().map(|w| format!("- {}", w)));
    }

    if !report.recommendations.is_empty() {
        section(&mut lines, "💡 RECOMMENDATIONS:", "----------------");
        lines.extend(report.recommendations.iter().map(|r| format!("- {}", r)));
    }

    if !report.safety_checks.is_empty() {
        section(&mut lines, "Pre-flight Checks:", "------------------");
        for check in &report.safety_checks {
            lines.extend(check.lines().map(str::to_string));
        }
    }

    if report.risk_level > RiskLevel::Low {
        section(&mut lines, "SAFETY CHECKLIST:", "----------------");
        lines.push("[ ] Backup completed".to_string());
        lines.push("[ ] Tested on staging".to_string());
        if report.risk_level == RiskLevel::High {
            lines.push("[ ] Downtime window scheduled".to_string());
            lines.push("[ ] Rollback plan prepared".to_string());
            lines.push("[ ] Team notified".to_string());
        }
    }

    lines.push("\"\"\"".to_string());
    lines.join("\n")
}

/// Header docstring for one stage of a staged migration
pub fn render_stage_header(stage_changes: &[Change], step: usize, total: usize) -> String {
    let mut lines = vec![
        "\"\"\"".to_string(),
        format!("Migration Guardian - Staged Migration (Step {}/{})", step, total),
        "================================================================".to_string(),
        String::new(),
        "This is part of a staged migration to safely apply complex changes.".to_string(),
        String::new(),
        format!("Stage {} Operations:", step),
    ];
    for change in stage_changes {
        lines.push(format!(
            "- {}: {}",
            change.kind(),
            change.table().unwrap_or("unknown")
        ));
    }
    lines.push(String::new());
    lines.push(format!("⚠️  IMPORTANT: Apply all {} stages in order!", total));
    lines.push("Previous stages must be completed before running this migration.".to_string());
    lines.push("\"\"\"".to_string());
    lines.join("\n")
}

fn section(lines: &mut Vec<String>, title: &str, underline: &str) {
    lines.push(String::new());
    lines.push(title.to_string());
    lines.push(underline.to_string());
}

/// Comment block placed at the top of `upgrade()`, empty for LOW risk
pub fn upgrade_comments(notes: &SafetyNotes) -> String {
    if notes.risk == RiskLevel::Low {
        return String::new();
    }

    let mut comment = vec!["# Migration Guardian Safety Checks".to_string()];
    if notes.requires_backup {
        comment.push("# ⚠️  BACKUP REQUIRED - Large number of rows affected".to_string());
    }
    if !notes.operations.is_empty() {
        comment.push("# 🚨 HIGH RISK OPERATIONS:".to_string());
        comment.extend(notes.operations.iter().map(|op| format!("#   - {}", op)));
    }
    indented(&comment)
}

/// Comment block placed at the top of `downgrade()`, only for HIGH risk
pub fn downgrade_comments(notes: &SafetyNotes) -> String {
    if notes.risk < RiskLevel::High {
        return String::new();
    }
    indented(&[
        "# ⚠️  WARNING: High-risk rollback".to_string(),
        "# Some operations cannot be fully rolled back without data loss".to_string(),
        "# Ensure you have backups before proceeding".to_string(),
    ])
}

fn indented(lines: &[String]) -> String {
    lines.iter().map(|l| format!("\n    {}", l)).collect()
}

/// Insert the header before the `revision` assignment and the safety
/// comments into `upgrade()`/`downgrade()`. Missing anchors are skipped.
pub fn annotate(content: &str, header: &str, notes: &SafetyNotes) -> String {
    let mut annotated = match REVISION_LINE.find(content) {
        Some(m) => format!("{}{}\n{}", &content[..m.start()], header, &content[m.start()..]),
        None => content.to_string(),
    };

    for (pattern, block) in [
        (&*UPGRADE_DEF, upgrade_comments(notes)),
        (&*DOWNGRADE_DEF, downgrade_comments(notes)),
    ] {
        if block.is_empty() {
            continue;
        }
        if let Some(end) = pattern.find(&annotated).map(|m| m.end()) {
            annotated.insert_str(end, &block);
        }
    }

    annotated
}
