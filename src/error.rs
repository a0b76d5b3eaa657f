//! Error handling module
//!
//! Provides unified error types for the whole guardian pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum GuardianError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Cyclic module dependency detected among: {}", .modules.join(", "))]
    CyclicDependency { modules: Vec<String> },

    #[error("Invalid hook event: {0}")]
    InvalidEvent(String),

    #[error("Snapshot store error for {path}: {message}")]
    Snapshot { path: PathBuf, message: String },
}

/// Failure while parsing model declarations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Failure reported by the external migration-revision tool
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("could not find generated file in tool output")]
    MissingArtifact,
}

/// Result type alias for pipeline operations
pub type GuardianResult<T> = Result<T, GuardianError>;

/// Helper function to create an invalid event error
pub fn invalid_event(msg: impl Into<String>) -> GuardianError {
    GuardianError::InvalidEvent(msg.into())
}

/// Helper function to create a snapshot store error
pub fn snapshot_error(path: impl Into<PathBuf>, msg: impl Into<String>) -> GuardianError {
    GuardianError::Snapshot {
        path: path.into(),
        message: msg.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cyclic_error_lists_modules() {
        let err = GuardianError::CyclicDependency {
            modules: vec!["billing".to_string(), "orders".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Cyclic module dependency detected among: billing, orders"
        );
    }

    #[test]
    fn test_parse_error_display() {
        let err: GuardianError = ParseError::new(7, "unterminated string").into();
        assert_eq!(err.to_string(), "Parse error: line 7: unterminated string");
    }
}
