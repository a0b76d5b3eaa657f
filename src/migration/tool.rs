//! Migration-revision tool seam
//!
//! Generation never writes migration bodies itself. It asks an external
//! revision tool (Alembic by default) to autogenerate a file and then
//! annotates whatever the tool produced.

use crate::config::MigrationToolConfig;
use crate::error::ToolError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

static GENERATED_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Generating\s+(.*\.py)").expect("valid regex"));

#[async_trait]
pub trait MigrationTool: Send + Sync {
    /// Create a new revision called `name` and return the path of the file written
    async fn revision(&self, name: &str) -> Result<PathBuf, ToolError>;
}

/// Runs `<program> <args...> -m <name>` and reads the generated path from its output
pub struct AlembicTool {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl AlembicTool {
    pub fn new(config: &MigrationToolConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
        }
    }

    fn resolve(&self, generated: &Path) -> PathBuf {
        match &self.working_dir {
            Some(dir) if generated.is_relative() => dir.join(generated),
            _ => generated.to_path_buf(),
        }
    }
}

#[async_trait]
impl MigrationTool for AlembicTool {
    async fn revision(&self, name: &str) -> Result<PathBuf, ToolError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).arg("-m").arg(name);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!("Running {} {} -m {}", self.program, self.args.join(" "), name);
        let output = command.output().await.map_err(|source| ToolError::Launch {
            program: self.program.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(ToolError::Failed {
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        // Alembic logs through stderr when a logging config routes it there
        generated_path(&stdout)
            .or_else(|| generated_path(&stderr))
            .map(|path| self.resolve(&path))
            .ok_or(ToolError::MissingArtifact)
    }
}

/// Path announced by a `Generating <path>.py` output line
pub fn generated_path(output: &str) -> Option<PathBuf> {
    GENERATED_FILE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| PathBuf::from(m.as_str().trim()))
}
