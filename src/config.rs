//! Guardian configuration module
//!
//! Loads the JSON configuration file layered with `SCHEMAGUARD_*` environment
//! variables. Anything missing falls back to built-in defaults, and a file
//! that cannot be read or fails validation is ignored with a warning.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use validator::{Validate, ValidationError};

/// Default location of the configuration file, relative to the project root
pub const DEFAULT_CONFIG_PATH: &str = "hooks/migration_guardian_config.json";

/// Prefix for environment overrides (`SCHEMAGUARD_BLOCK_DANGEROUS=true`)
pub const ENV_PREFIX: &str = "SCHEMAGUARD";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration value: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Row-count limits that drive backup, staging and review decisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_thresholds"))]
pub struct SafetyThresholds {
    #[validate(range(min = 1, message = "max_affected_rows_auto must be positive"))]
    pub max_affected_rows_auto: u64,
    #[validate(range(min = 1, message = "require_backup_above_rows must be positive"))]
    pub require_backup_above_rows: u64,
    #[validate(range(min = 1, message = "require_staged_migration_above must be positive"))]
    pub require_staged_migration_above: u64,
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            max_affected_rows_auto: 1_000,
            require_backup_above_rows: 10_000,
            require_staged_migration_above: 100_000,
        }
    }
}

/// A staged migration always needs a backup, so the backup limit can't exceed the staging one
fn validate_thresholds(t: &SafetyThresholds) -> Result<(), ValidationError> {
    if t.require_backup_above_rows > t.require_staged_migration_above {
        let mut err = ValidationError::new("threshold_order");
        err.message = Some(
            "require_backup_above_rows must not exceed require_staged_migration_above".into(),
        );
        return Err(err);
    }
    Ok(())
}

/// Migration file naming template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct NamingConvention {
    #[validate(length(min = 1, message = "naming format cannot be empty"))]
    pub format: String,
    /// chrono format string
    #[validate(length(min = 1, message = "timestamp format cannot be empty"))]
    pub timestamp: String,
    pub dangerous_suffix: String,
    pub staged_suffix: String,
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self {
            format: "{timestamp}_{module}_{description}".to_string(),
            timestamp: "%Y_%m_%d_%H%M".to_string(),
            dangerous_suffix: "_DANGEROUS".to_string(),
            staged_suffix: "_staged".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossModuleDetection {
    pub enabled: bool,
    pub warn_on_cross_dependencies: bool,
}

impl Default for CrossModuleDetection {
    fn default() -> Self {
        Self {
            enabled: true,
            warn_on_cross_dependencies: true,
        }
    }
}

/// External migration-revision tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MigrationToolConfig {
    #[validate(length(min = 1, message = "migration tool program cannot be empty"))]
    pub program: String,
    /// Arguments placed before the `-m <name>` pair
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Default for MigrationToolConfig {
    fn default() -> Self {
        Self {
            program: "alembic".to_string(),
            args: vec!["revision".to_string(), "--autogenerate".to_string()],
            working_dir: None,
        }
    }
}

/// Known size of a table, consumed by the static row estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub rows: u64,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// Complete guardian configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GuardianConfig {
    pub auto_generate: bool,
    pub require_review: bool,
    pub block_dangerous: bool,
    #[validate(length(min = 1, message = "at least one monitored path is required"))]
    pub monitored_paths: Vec<String>,
    pub app_root: PathBuf,
    pub trigger_tools: Vec<String>,
    #[validate(length(min = 1, message = "at least one model base class is required"))]
    pub model_base_classes: Vec<String>,
    pub dangerous_operations: Vec<String>,
    #[validate(nested)]
    pub safety_thresholds: SafetyThresholds,
    #[validate(nested)]
    pub naming_convention: NamingConvention,
    pub cross_module_detection: CrossModuleDetection,
    #[validate(nested)]
    pub migration_tool: MigrationToolConfig,
    pub table_stats: BTreeMap<String, TableStats>,
    pub snapshot_dir: PathBuf,
    pub report_dir: PathBuf,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            auto_generate: true,
            require_review: true,
            block_dangerous: false,
            monitored_paths: vec![
                "app/*/models/*.py".to_string(),
                "app/*/models/**/*.py".to_string(),
                "app/core/models/*.py".to_string(),
                "app/shared/models/*.py".to_string(),
            ],
            app_root: PathBuf::from("app"),
            trigger_tools: vec![
                "Write".to_string(),
                "Edit".to_string(),
                "MultiEdit".to_string(),
            ],
            model_base_classes: vec![
                "Base".to_string(),
                "DeclarativeBase".to_string(),
                "Model".to_string(),
            ],
            dangerous_operations: vec![
                "DROP TABLE".to_string(),
                "DROP COLUMN".to_string(),
                "DROP CONSTRAINT".to_string(),
                "ALTER COLUMN.*NOT NULL".to_string(),
                "DELETE FROM".to_string(),
                "TRUNCATE".to_string(),
            ],
            safety_thresholds: SafetyThresholds::default(),
            naming_convention: NamingConvention::default(),
            cross_module_detection: CrossModuleDetection::default(),
            migration_tool: MigrationToolConfig::default(),
            table_stats: BTreeMap::new(),
            snapshot_dir: PathBuf::from(".migration_guardian_cache"),
            report_dir: PathBuf::from("migration_guardian_reports"),
        }
    }
}

impl GuardianConfig {
    /// Load configuration, falling back to defaults on any failure
    pub fn load(path: &Path) -> Self {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        match Self::try_load(path) {
            Ok(config) => {
                debug!("📋 Configuration loaded from {}", path.display());
                config
            }
            Err(e) => {
                warn!("⚠️  Using default configuration: {}", e);
                Self::default()
            }
        }
    }

    /// Layer the JSON file (optional) and `SCHEMAGUARD_*` variables over the defaults
    pub fn try_load(path: &Path) -> Result<Self, ConfigError> {
        Self::build(path, env_source())
    }

    fn build(path: &Path, env: config::Environment) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(env)
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve relative directories against the project root
    pub fn rooted(mut self, root: &Path) -> Self {
        for dir in [
            &mut self.app_root,
            &mut self.snapshot_dir,
            &mut self.report_dir,
        ] {
            if dir.is_relative() {
                *dir = root.join(&*dir);
            }
        }
        if let Some(dir) = self.migration_tool.working_dir.as_mut() {
            if dir.is_relative() {
                *dir = root.join(&*dir);
            }
        } else {
            self.migration_tool.working_dir = Some(root.to_path_buf());
        }
        self
    }
}

fn env_source() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("monitored_paths")
        .with_list_parse_key("trigger_tools")
        .with_list_parse_key("model_base_classes")
        .with_list_parse_key("dangerous_operations")
        .with_list_parse_key("migration_tool.args")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn no_env() -> config::Environment {
        env_source().source(Some(config::Map::new()))
    }

    #[test]
    fn test_default_thresholds() {
        let config = GuardianConfig::default();
        assert_eq!(config.safety_thresholds.max_affected_rows_auto, 1_000);
        assert_eq!(config.safety_thresholds.require_backup_above_rows, 10_000);
        assert_eq!(config.safety_thresholds.require_staged_migration_above, 100_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            GuardianConfig::build(&dir.path().join("missing.json"), no_env()).unwrap();
        assert_eq!(config, GuardianConfig::default());
    }

    #[test]
    fn test_partial_file_merges_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"block_dangerous": true, "safety_thresholds": {{"max_affected_rows_auto": 50}}}}"#
        )
        .unwrap();

        let config = GuardianConfig::build(file.path(), no_env()).unwrap();
        assert!(config.block_dangerous);
        assert_eq!(config.safety_thresholds.max_affected_rows_auto, 50);
        assert_eq!(config.safety_thresholds.require_backup_above_rows, 10_000);
        assert_eq!(config.trigger_tools, GuardianConfig::default().trigger_tools);
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut vars = config::Map::new();
        vars.insert(
            "SCHEMAGUARD_SAFETY_THRESHOLDS__REQUIRE_BACKUP_ABOVE_ROWS".to_string(),
            "500".to_string(),
        );
        vars.insert("SCHEMAGUARD_AUTO_GENERATE".to_string(), "false".to_string());

        let dir = tempfile::tempdir().unwrap();
        let config = GuardianConfig::build(
            &dir.path().join("missing.json"),
            env_source().source(Some(vars)),
        )
        .unwrap();
        assert!(!config.auto_generate);
        assert_eq!(config.safety_thresholds.require_backup_above_rows, 500);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"safety_thresholds": {{"require_backup_above_rows": 200000}}}}"#
        )
        .unwrap();

        let err = GuardianConfig::build(file.path(), no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_invalid_json_falls_back_to_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{ not json").unwrap();

        assert!(GuardianConfig::try_load(file.path()).is_err());
        assert_eq!(GuardianConfig::load(file.path()), GuardianConfig::default());
    }

    #[test]
    fn test_rooted_resolves_relative_dirs() {
        let config = GuardianConfig::default().rooted(Path::new("/project"));
        assert_eq!(config.app_root, PathBuf::from("/project/app"));
        assert_eq!(
            config.report_dir,
            PathBuf::from("/project/migration_guardian_reports")
        );
        assert_eq!(
            config.migration_tool.working_dir,
            Some(PathBuf::from("/project"))
        );
    }
}
