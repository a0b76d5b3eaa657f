//! Migration Generator
//!
//! Asks the revision tool for one migration (or one per stage when the data
//! volume calls for staging), then inspects and annotates every file it
//! produced. Annotation is fail-soft: a file that cannot be rewritten is kept
//! as the tool generated it.

use super::annotate::{annotate, render_header, render_stage_header, SafetyNotes};
use super::inspect::{ArtifactInspector, Inspection};
use super::naming::{describe, migration_name, stage_description};
use super::staging::partition;
use super::tool::MigrationTool;
use crate::config::NamingConvention;
use crate::dependency::DependencyAnalysis;
use crate::models::{
    Change, ChangeSet, GenerationFailure, MigrationArtifact, RiskLevel, SafetyReport, TableImpact,
};
use crate::safety::analyzer::estimate_downtime;
use crate::safety::scripts::{rollback_script, safety_checks};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info, warn};

/// Artifacts produced by one generation, plus the failure that stopped it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub artifacts: Vec<MigrationArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<GenerationFailure>,
}

impl GenerationResult {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

pub struct MigrationGenerator {
    tool: Box<dyn MigrationTool>,
    naming: NamingConvention,
    inspector: ArtifactInspector,
}

impl MigrationGenerator {
    pub fn new(
        tool: Box<dyn MigrationTool>,
        naming: NamingConvention,
        inspector: ArtifactInspector,
    ) -> Self {
        Self {
            tool,
            naming,
            inspector,
        }
    }

    /// Generate the migration(s) for an analysed change set
    pub async fn generate(
        &self,
        change_set: &ChangeSet,
        dependencies: &DependencyAnalysis,
        report: &SafetyReport,
        now: &NaiveDateTime,
    ) -> GenerationResult {
        if report.requires_staging {
            self.generate_staged(change_set, dependencies, report, now).await
        } else {
            self.generate_single(change_set, dependencies, report, now).await
        }
    }

    async fn generate_single(
        &self,
        change_set: &ChangeSet,
        dependencies: &DependencyAnalysis,
        report: &SafetyReport,
        now: &NaiveDateTime,
    ) -> GenerationResult {
        let description = describe(change_set);
        let name = migration_name(
            &self.naming,
            &change_set.module,
            &description,
            report.risk_level,
            false,
            now,
        );

        let path = match self.tool.revision(&name).await {
            Ok(path) => path,
            Err(e) => {
                error!("❌ Failed to generate migration '{}': {}", name, e);
                return GenerationResult {
                    artifacts: Vec::new(),
                    failure: Some(GenerationFailure {
                        stage: None,
                        message: e.to_string(),
                    }),
                };
            }
        };

        let header = render_header(change_set, dependencies, report, now);
        let notes = SafetyNotes::from_changes(&change_set.changes, report.requires_backup);
        let inspection = self.post_process(&path, &header, notes).await;

        let mut warnings = report.warnings.clone();
        warnings.extend(inspection.warnings());

        let artifact = MigrationArtifact {
            filename: file_name(&path),
            filepath: path,
            module: change_set.module.clone(),
            risk_level: report.risk_level.max(inspection.risk()),
            stage: None,
            stage_name: None,
            description,
            warnings,
        };
        info!("💾 Generated migration {}", artifact.filename);

        GenerationResult {
            artifacts: vec![artifact],
            failure: None,
        }
    }

    async fn generate_staged(
        &self,
        change_set: &ChangeSet,
        dependencies: &DependencyAnalysis,
        report: &SafetyReport,
        now: &NaiveDateTime,
    ) -> GenerationResult {
        let stages = partition(&change_set.changes);
        let total = stages.len();
        info!(
            "📦 Splitting {} changes for '{}' into {} stages",
            change_set.len(),
            change_set.module,
            total
        );

        let mut result = GenerationResult::default();
        for (index, (stage, changes)) in stages.iter().enumerate() {
            let step = index + 1;
            let description = stage_description(stage.name(), step);
            let name = migration_name(
                &self.naming,
                &change_set.module,
                &description,
                report.risk_level,
                true,
                now,
            );

            let path = match self.tool.revision(&name).await {
                Ok(path) => path,
                Err(e) => {
                    error!(
                        "❌ Stage {}/{} ({}) failed, remaining stages skipped: {}",
                        step, total, stage, e
                    );
                    result.failure = Some(GenerationFailure {
                        stage: Some(step),
                        message: e.to_string(),
                    });
                    break;
                }
            };

            let stage_set = ChangeSet::new(change_set.module.clone(), changes.clone());
            let header = format!(
                "{}\n{}",
                render_header(&stage_set, dependencies, &stage_report(report, &stage_set), now),
                render_stage_header(changes, step, total)
            );
            let notes = SafetyNotes::from_changes(changes, report.requires_backup);
            let inspection = self.post_process(&path, &header, notes).await;

            let mut warnings = stage_warnings(changes);
            warnings.extend(inspection.warnings());

            let stage_risk = changes.iter().map(|c| c.risk).max().unwrap_or_default();
            let artifact = MigrationArtifact {
                filename: file_name(&path),
                filepath: path,
                module: change_set.module.clone(),
                risk_level: stage_risk.max(inspection.risk()),
                stage: Some(step),
                stage_name: Some(stage.name().to_string()),
                description,
                warnings,
            };
            info!("💾 Generated stage {}/{}: {}", step, total, artifact.filename);
            result.artifacts.push(artifact);
        }

        result
    }

    /// Inspect the generated file and write the annotated version back
    async fn post_process(&self, path: &Path, header: &str, mut notes: SafetyNotes) -> Inspection {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                error!("❌ Could not read generated migration {}: {}", path.display(), e);
                return Inspection::default();
            }
        };

        let inspection = self.inspector.inspect(&content);
        for (line, change) in &inspection.raw_sql {
            notes.escalate(change.risk, format!("{} at line {}", change.kind(), line));
        }
        if inspection.risk() == RiskLevel::High {
            warn!("⚠️  {} contains dangerous raw SQL", path.display());
        }

        if let Err(e) = tokio::fs::write(path, annotate(&content, header, &notes)).await {
            error!("❌ Could not annotate migration {}: {}", path.display(), e);
        }
        inspection
    }
}

/// The run's safety report narrowed to the changes of one stage
fn stage_report(report: &SafetyReport, stage: &ChangeSet) -> SafetyReport {
    let tables = stage.tables();
    let data_impact: BTreeMap<String, TableImpact> = report
        .data_impact
        .iter()
        .filter(|(table, _)| tables.contains(&table.as_str()))
        .map(|(table, impact)| (table.clone(), *impact))
        .collect();

    SafetyReport {
        risk_level: stage.max_risk(),
        risks: report
            .risks
            .iter()
            .filter(|entry| {
                stage
                    .changes
                    .iter()
                    .any(|c| entry.change == format!("{} {}", c.kind(), c.target()))
            })
            .cloned()
            .collect(),
        warnings: stage_warnings(&stage.changes),
        recommendations: report.recommendations.clone(),
        estimated_downtime_seconds: estimate_downtime(&stage.changes, &data_impact),
        data_impact,
        requires_backup: report.requires_backup,
        requires_staging: report.requires_staging,
        exceeds_auto_threshold: report.exceeds_auto_threshold,
        safety_checks: safety_checks(stage),
        rollback_script: rollback_script(stage),
    }
}

fn stage_warnings(changes: &[Change]) -> Vec<String> {
    let mut warnings: Vec<String> = Vec::new();
    for warning in changes.iter().filter_map(|c| c.warning.as_ref()) {
        if !warnings.contains(warning) {
            warnings.push(warning.clone());
        }
    }
    warnings
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::models::{FieldDefinition, SchemaOp};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    const TEMPLATE: &str = "from alembic import op\nimport sqlalchemy as sa\n\nrevision = 'abc'\n\n\n\
        def upgrade() -> None:\n    op.add_column('users', sa.Column('nickname', sa.String(length=50), nullable=True))\n\n\n\
        def downgrade() -> None:\n    op.drop_column('users', 'nickname')\n";

    struct FakeTool {
        dir: PathBuf,
        body: String,
        fail_on_call: Option<usize>,
        names: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl MigrationTool for FakeTool {
        async fn revision(&self, name: &str) -> Result<PathBuf, ToolError> {
            let call = {
                let mut names = self.names.lock().unwrap();
                names.push(name.to_string());
                names.len()
            };
            if self.fail_on_call == Some(call) {
                return Err(ToolError::Failed {
                    status: "exit status: 1".to_string(),
                    stderr: "Target database is not up to date.".to_string(),
                });
            }
            let path = self.dir.join(format!("{}.py", name));
            std::fs::write(&path, &self.body).unwrap();
            Ok(path)
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(14, 5, 0))
            .unwrap()
    }

    fn generator(
        dir: &Path,
        body: &str,
        fail_on_call: Option<usize>,
    ) -> (MigrationGenerator, Arc<Mutex<Vec<String>>>) {
        let names = Arc::new(Mutex::new(Vec::new()));
        let tool = FakeTool {
            dir: dir.to_path_buf(),
            body: body.to_string(),
            fail_on_call,
            names: names.clone(),
        };
        let generator = MigrationGenerator::new(
            Box::new(tool),
            NamingConvention::default(),
            ArtifactInspector::new(&["DELETE FROM".to_string()]),
        );
        (generator, names)
    }

    fn change_set() -> ChangeSet {
        ChangeSet::new(
            "auth",
            vec![
                Change::new(
                    SchemaOp::DropColumn {
                        table: "users".to_string(),
                        column: "legacy_flag".to_string(),
                        column_type: "Boolean".to_string(),
                    },
                    RiskLevel::High,
                )
                .with_warning("Data will be permanently lost"),
                Change::new(
                    SchemaOp::AddColumn {
                        table: "users".to_string(),
                        field: FieldDefinition::new("nickname", "String(50)"),
                    },
                    RiskLevel::Low,
                ),
            ],
        )
    }

    fn report(requires_staging: bool) -> SafetyReport {
        SafetyReport {
            risk_level: RiskLevel::High,
            risks: Vec::new(),
            warnings: vec!["Data will be permanently lost".to_string()],
            recommendations: Vec::new(),
            data_impact: BTreeMap::from([("users".to_string(), TableImpact::new(150_000, None))]),
            requires_backup: true,
            requires_staging,
            exceeds_auto_threshold: true,
            estimated_downtime_seconds: 5,
            safety_checks: Vec::new(),
            rollback_script: String::new(),
        }
    }

    #[tokio::test]
    async fn test_single_migration() {
        let dir = tempfile::tempdir().unwrap();
        let (generator, names) = generator(dir.path(), TEMPLATE, None);

        let result = generator
            .generate(&change_set(), &DependencyAnalysis::default(), &report(false), &now())
            .await;

        assert!(result.is_complete());
        assert_eq!(
            *names.lock().unwrap(),
            vec!["2024_03_09_1405_auth_add_1_columns_drop_1_columns_DANGEROUS"]
        );

        let artifact = &result.artifacts[0];
        assert_eq!(artifact.risk_level, RiskLevel::High);
        assert_eq!(artifact.stage, None);
        assert_eq!(artifact.warnings[0], "Data will be permanently lost");

        let content = std::fs::read_to_string(&artifact.filepath).unwrap();
        assert!(content.contains("Migration Guardian Analysis"));
        assert!(content.contains("#   - DROP_COLUMN on users"));
        assert!(content.contains("# ⚠️  WARNING: High-risk rollback"));
    }

    #[tokio::test]
    async fn test_staged_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let (generator, names) = generator(dir.path(), TEMPLATE, None);

        let result = generator
            .generate(&change_set(), &DependencyAnalysis::default(), &report(true), &now())
            .await;

        assert_eq!(
            *names.lock().unwrap(),
            vec![
                "2024_03_09_1405_auth_safe_additions_step1_staged_DANGEROUS",
                "2024_03_09_1405_auth_dangerous_cleanup_step2_staged_DANGEROUS",
            ]
        );
        assert_eq!(result.artifacts.len(), 2);
        assert_eq!(result.artifacts[0].risk_level, RiskLevel::Low);
        assert!(result.artifacts[0].warnings.is_empty());
        assert_eq!(result.artifacts[1].risk_level, RiskLevel::High);
        assert_eq!(result.artifacts[1].stage_name.as_deref(), Some("dangerous_cleanup"));

        let first = std::fs::read_to_string(&result.artifacts[0].filepath).unwrap();
        assert!(first.contains("Module: auth"));
        assert!(first.contains("- ADD_COLUMN: users.nickname"));
        assert!(!first.contains("DROP_COLUMN"));
        assert!(!first.contains("SAFETY CHECKLIST:"));

        let content = std::fs::read_to_string(&result.artifacts[1].filepath).unwrap();
        assert!(content.contains("Staged Migration (Step 2/2)"));
        assert!(content.contains("Module: auth"));
        assert!(content.contains("Risk Level: 🚨 HIGH"));
        assert!(content.contains("- users: 150,000 rows"));
        assert!(content.contains("Estimated Migration Time: ~5 seconds"));
        assert!(content.contains("- Data will be permanently lost"));
        assert!(content.contains("[ ] Rollback plan prepared"));
        assert!(content.find("Migration Guardian Analysis") < content.find("Staged Migration"));
    }

    #[tokio::test]
    async fn test_tool_failure_keeps_earlier_stages() {
        let dir = tempfile::tempdir().unwrap();
        let (generator, names) = generator(dir.path(), TEMPLATE, Some(2));

        let result = generator
            .generate(&change_set(), &DependencyAnalysis::default(), &report(true), &now())
            .await;

        assert_eq!(names.lock().unwrap().len(), 2);
        assert_eq!(result.artifacts.len(), 1);
        let failure = result.failure.unwrap();
        assert_eq!(failure.stage, Some(2));
        assert!(failure.message.contains("Target database is not up to date."));
    }

    #[tokio::test]
    async fn test_raw_sql_raises_artifact_risk() {
        let dir = tempfile::tempdir().unwrap();
        let body = TEMPLATE.replace(
            "def upgrade() -> None:\n",
            "def upgrade() -> None:\n    op.execute(\"DELETE FROM users WHERE legacy_flag\")\n",
        );
        let (generator, _) = generator(dir.path(), &body, None);

        let mut low = report(false);
        low.risk_level = RiskLevel::Low;
        low.warnings.clear();
        let set = ChangeSet::new("auth", vec![change_set().changes[1].clone()]);

        let result = generator
            .generate(&set, &DependencyAnalysis::default(), &low, &now())
            .await;

        let artifact = &result.artifacts[0];
        assert_eq!(artifact.risk_level, RiskLevel::High);
        assert_eq!(artifact.warnings.len(), 1);
        assert!(artifact.warnings[0].contains("DELETE FROM"));

        let content = std::fs::read_to_string(&artifact.filepath).unwrap();
        assert!(content.contains("#   - EXECUTE_RAW at line"));
    }
}
