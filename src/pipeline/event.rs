//! Hook events and routing
//!
//! An editor hook reports every file write. Only writes made by a trigger
//! tool to a monitored model file inside `<app_root>/<module>/models/` reach
//! the rest of the pipeline.

use crate::config::GuardianConfig;
use crate::error::{invalid_event, GuardianResult};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// `{tool, file_path}` or `{tool, params: {file_path | path}}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookEvent {
    #[serde(default)]
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<HookParams>,
}

impl HookEvent {
    pub fn from_json(input: &str) -> GuardianResult<Self> {
        serde_json::from_str(input).map_err(|e| invalid_event(e.to_string()))
    }

    /// Event for a direct `check` of one file
    pub fn for_file(tool: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            file_path: Some(path.into()),
            params: None,
        }
    }

    pub fn file_path(&self) -> Option<&str> {
        self.file_path
            .as_deref()
            .or_else(|| {
                self.params
                    .as_ref()
                    .and_then(|p| p.file_path.as_deref().or(p.path.as_deref()))
            })
            .filter(|p| !p.is_empty())
    }
}

/// A model file the pipeline should analyse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub path: PathBuf,
    pub module: String,
}

/// Why an event was ignored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    Tool(String),
    NoPath,
    NotMonitored(String),
    NoModule(String),
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skip::Tool(tool) => write!(f, "tool '{}' does not trigger analysis", tool),
            Skip::NoPath => f.write_str("event carries no file path"),
            Skip::NotMonitored(path) => write!(f, "{} is not a monitored model file", path),
            Skip::NoModule(path) => write!(f, "no module found in {}", path),
        }
    }
}

pub struct EventRouter {
    root: PathBuf,
    app_root: PathBuf,
    trigger_tools: Vec<String>,
    patterns: GlobSet,
}

impl EventRouter {
    /// `root` is the project root the monitored globs are relative to
    pub fn new(config: &GuardianConfig, root: &Path) -> Self {
        let patterns = monitored_set(&config.monitored_paths);

        Self {
            root: root.to_path_buf(),
            app_root: relative_to(&config.app_root, root),
            trigger_tools: config.trigger_tools.clone(),
            patterns,
        }
    }

    pub fn route(&self, event: &HookEvent) -> Result<Target, Skip> {
        if !self.trigger_tools.iter().any(|t| *t == event.tool) {
            return Err(Skip::Tool(event.tool.clone()));
        }
        let raw = event.file_path().ok_or(Skip::NoPath)?;

        let relative = relative_to(Path::new(raw), &self.root);
        let normalized = slash_path(&relative);
        if !self.patterns.is_match(&normalized) {
            return Err(Skip::NotMonitored(normalized));
        }

        let module = self
            .module_of(&relative)
            .ok_or_else(|| Skip::NoModule(normalized.clone()))?;

        Ok(Target {
            path: self.root.join(&relative),
            module,
        })
    }

    /// `<app_root>/<module>/models/...` -> `module`
    pub fn module_of(&self, relative: &Path) -> Option<String> {
        let rest = relative.strip_prefix(&self.app_root).ok()?;
        let mut parts = rest.components().filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        });
        let module = parts.next()?;
        (parts.next()? == "models").then(|| module.to_string())
    }
}

fn relative_to(path: &Path, root: &Path) -> PathBuf {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Compile the monitored globs; `*` stays inside one path segment and an
/// invalid glob is logged and left out
pub fn monitored_set(globs: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for glob in globs {
        match GlobBuilder::new(glob).literal_separator(true).build() {
            Ok(compiled) => {
                builder.add(compiled);
            }
            Err(e) => warn!("⚠️  Ignoring monitored path '{}': {}", glob, e),
        }
    }
    builder.build().unwrap_or_else(|e| {
        warn!("⚠️  Monitored paths could not be compiled: {}", e);
        GlobSet::empty()
    })
}
