//! Orchestrator - one guardian run per hook event
//!
//! route -> observe -> dependencies -> safety -> policy -> generate -> report.
//! The snapshot of the edited file is only replaced once generation
//! completes, so a blocked, declined or failed run is detected again on the
//! next edit.

use super::event::{EventRouter, HookEvent, Skip, Target};
use super::policy::{Confirmer, Decision, GenerationPolicy, TerminalConfirmer};
use super::report::{console_report, ReportWriter};
use crate::config::GuardianConfig;
use crate::dependency::{DependencyDetector, ModuleReport, OwnershipMap};
use crate::error::{invalid_event, GuardianResult};
use crate::migration::{AlembicTool, ArtifactInspector, MigrationGenerator, MigrationTool};
use crate::models::RunReport;
use crate::safety::{SafetyAnalyzer, StaticEstimator};
use crate::snapshot::{FileSnapshotStore, ModelChangeDetector, ModelParser, SnapshotStore};
use chrono::{Local, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How a run ended
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Skipped(Skip),
    NoChanges { module: String },
    Blocked(Box<RunReport>),
    Declined(Box<RunReport>),
    Generated {
        report: Box<RunReport>,
        saved_to: Option<PathBuf>,
    },
}

impl RunOutcome {
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunOutcome::Blocked(report) | RunOutcome::Declined(report) => Some(report),
            RunOutcome::Generated { report, .. } => Some(report),
            _ => None,
        }
    }
}

pub struct Guardian<S> {
    router: EventRouter,
    detector: ModelChangeDetector<S>,
    dependencies: DependencyDetector,
    safety: SafetyAnalyzer,
    policy: GenerationPolicy,
    generator: MigrationGenerator,
    reports: ReportWriter,
}

impl Guardian<FileSnapshotStore> {
    /// Production wiring: snapshot files, the configured revision tool and a
    /// terminal prompt
    pub fn from_config(config: &GuardianConfig, root: &Path) -> Self {
        let store = FileSnapshotStore::new(&config.snapshot_dir);
        let tool = AlembicTool::new(&config.migration_tool);
        Self::new(config, root, store, Box::new(tool), Box::new(TerminalConfirmer))
    }
}

impl<S: SnapshotStore> Guardian<S> {
    /// `config` directories are expected to be resolved against `root` already
    pub fn new(
        config: &GuardianConfig,
        root: &Path,
        store: S,
        tool: Box<dyn MigrationTool>,
        confirmer: Box<dyn Confirmer>,
    ) -> Self {
        let parser = ModelParser::new(config.model_base_classes.iter().cloned());
        let ownership = OwnershipMap::scan(&config.app_root, &parser);
        debug!(
            "Ownership map: {} tables across {} modules",
            ownership.table_count(),
            ownership.modules().count()
        );

        Self {
            router: EventRouter::new(config, root),
            detector: ModelChangeDetector::new(parser, store),
            dependencies: DependencyDetector::new(
                ownership,
                config.cross_module_detection.enabled,
            ),
            safety: SafetyAnalyzer::new(
                config.safety_thresholds.clone(),
                Box::new(StaticEstimator::new(config.table_stats.clone())),
            )
            .warn_on_cross_dependencies(config.cross_module_detection.warn_on_cross_dependencies),
            policy: GenerationPolicy::new(config, confirmer),
            generator: MigrationGenerator::new(
                tool,
                config.naming_convention.clone(),
                ArtifactInspector::new(&config.dangerous_operations),
            ),
            reports: ReportWriter::new(&config.report_dir),
        }
    }

    pub fn store(&self) -> &S {
        self.detector.store()
    }

    /// Handle one hook event
    pub async fn run(&mut self, event: &HookEvent) -> GuardianResult<RunOutcome> {
        match self.router.route(event) {
            Ok(target) => self.run_target(target).await,
            Err(skip) => {
                debug!("Skipping event: {}", skip);
                Ok(RunOutcome::Skipped(skip))
            }
        }
    }

    /// Analyse one model file directly, bypassing the tool and glob filters
    pub async fn check(&mut self, path: &Path, module: Option<&str>) -> GuardianResult<RunOutcome> {
        let module = match module {
            Some(module) => module.to_string(),
            None => {
                let event = HookEvent::for_file("Write", path.to_string_lossy());
                match self.router.route(&event) {
                    Ok(target) => target.module,
                    Err(skip) => {
                        return Err(invalid_event(format!(
                            "{}; pass --module explicitly",
                            skip
                        )))
                    }
                }
            }
        };

        self.run_target(Target {
            path: path.to_path_buf(),
            module,
        })
        .await
    }

    pub fn module_report(&self) -> ModuleReport {
        self.dependencies.module_report()
    }

    async fn run_target(&mut self, target: Target) -> GuardianResult<RunOutcome> {
        let Target { path, module } = target;
        info!("🔍 Migration Guardian: Detected changes in {} module", module);

        let observation = self.detector.observe(&path, &module);
        if observation.change_set.is_empty() {
            // Formatting-only edits still move the baseline forward
            self.detector.commit(&observation)?;
            return Ok(RunOutcome::NoChanges { module });
        }
        let change_set = observation.change_set.clone();

        let dependencies = self.dependencies.analyze(&change_set)?;
        let safety_report = self.safety.analyze(&change_set, &dependencies);

        let mut run = RunReport {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            module: module.clone(),
            change_set,
            dependencies,
            safety_report,
            migrations: Vec::new(),
            failure: None,
        };

        match self.policy.should_generate(&run.safety_report) {
            Decision::Proceed => {}
            Decision::Blocked => return Ok(RunOutcome::Blocked(Box::new(run))),
            Decision::Declined => return Ok(RunOutcome::Declined(Box::new(run))),
        }

        let now = Local::now().naive_local();
        let generation = self
            .generator
            .generate(&run.change_set, &run.dependencies, &run.safety_report, &now)
            .await;
        run.migrations = generation.artifacts;
        run.failure = generation.failure;

        if run.failure.is_none() {
            self.detector.commit(&observation)?;
        } else {
            warn!("⚠️  Snapshot of {} kept until generation succeeds", path.display());
        }

        println!("{}", console_report(&run));

        let saved_to = match self.reports.write(&run).await {
            Ok(path) => Some(path),
            Err(e) => {
                error!("❌ Failed to save report: {}", e);
                None
            }
        };

        Ok(RunOutcome::Generated {
            report: Box::new(run),
            saved_to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GuardianError, ToolError};
    use crate::pipeline::policy::ScriptedConfirmer;
    use crate::snapshot::{MemorySnapshotStore, Snapshot};
    use async_trait::async_trait;

    struct NoTool;

    #[async_trait]
    impl MigrationTool for NoTool {
        async fn revision(&self, _name: &str) -> Result<PathBuf, ToolError> {
            Err(ToolError::MissingArtifact)
        }
    }

    const USERS: &str = "class User(Base):\n    __tablename__ = 'users'\n    id = Column(Integer, primary_key=True)\n    legacy_flag = Column(Boolean)\n";

    struct Project {
        dir: tempfile::TempDir,
        guardian: Guardian<MemorySnapshotStore>,
    }

    impl Project {
        fn model_path(&self) -> PathBuf {
            self.dir.path().join("app/auth/models/user.py")
        }
    }

    /// `seeded` stores the current file as the previous snapshot
    fn project(config: GuardianConfig, seeded: bool) -> Project {
        let dir = tempfile::tempdir().unwrap();
        let models = dir.path().join("app/auth/models");
        std::fs::create_dir_all(&models).unwrap();
        std::fs::write(models.join("user.py"), USERS).unwrap();

        let mut store = MemorySnapshotStore::new();
        if seeded {
            store.save(Snapshot::new(models.join("user.py"), USERS)).unwrap();
        }

        let config = config.rooted(dir.path());
        let guardian = Guardian::new(
            &config,
            dir.path(),
            store,
            Box::new(NoTool),
            Box::new(ScriptedConfirmer::new([false])),
        );
        Project { dir, guardian }
    }

    fn edit() -> HookEvent {
        HookEvent::for_file("Edit", "app/auth/models/user.py")
    }

    fn stored_content(project: &Project) -> Option<String> {
        project
            .guardian
            .store()
            .load(&project.model_path())
            .unwrap()
            .map(|s| s.content)
    }

    #[tokio::test]
    async fn test_failed_generation_keeps_snapshot() {
        let mut project = project(GuardianConfig::default(), false);

        let outcome = project.guardian.run(&edit()).await.unwrap();
        let report = outcome.report().unwrap();
        assert!(report.failure.is_some());
        assert!(report.migrations.is_empty());
        assert!(project.guardian.store().is_empty());

        // Still pending, so the next run sees the same change again
        let again = project.guardian.run(&edit()).await.unwrap();
        assert_eq!(again.report().unwrap().change_set.len(), 1);
    }

    #[tokio::test]
    async fn test_declined_run_keeps_snapshot() {
        let mut project = project(GuardianConfig::default(), true);
        std::fs::write(
            project.model_path(),
            USERS.replace("    legacy_flag = Column(Boolean)\n", ""),
        )
        .unwrap();

        let outcome = project.guardian.run(&edit()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Declined(_)));
        assert_eq!(stored_content(&project).as_deref(), Some(USERS));
    }

    #[tokio::test]
    async fn test_blocked_run() {
        let config = GuardianConfig {
            block_dangerous: true,
            ..Default::default()
        };
        let mut project = project(config, true);
        std::fs::write(
            project.model_path(),
            USERS.replace("    legacy_flag = Column(Boolean)\n", ""),
        )
        .unwrap();

        let outcome = project.guardian.run(&edit()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Blocked(_)));
        assert_eq!(stored_content(&project).as_deref(), Some(USERS));
    }

    #[tokio::test]
    async fn test_unchanged_file() {
        let mut project = project(GuardianConfig::default(), true);
        let outcome = project.guardian.run(&edit()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::NoChanges { .. }));
    }

    #[tokio::test]
    async fn test_skipped_event() {
        let mut project = project(GuardianConfig::default(), false);
        let outcome = project
            .guardian
            .run(&HookEvent::for_file("Read", "app/auth/models/user.py"))
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Skipped(Skip::Tool(_))));
    }

    #[tokio::test]
    async fn test_check_requires_module_outside_app() {
        let mut project = project(GuardianConfig::default(), false);
        let path = project.dir.path().join("elsewhere.py");
        let err = project.guardian.check(&path, None).await.unwrap_err();
        assert!(matches!(err, GuardianError::InvalidEvent(_)));
    }
}
