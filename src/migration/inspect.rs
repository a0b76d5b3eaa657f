//! Inspection of generated migration files
//!
//! Autogenerate output is not guaranteed to match what the model diff
//! predicted, and hand-edited revisions may carry raw SQL. The inspector
//! scans the `op.*` calls in a file and classifies every `op.execute(...)`
//! against the configured dangerous-operation patterns.

use crate::models::{Change, RiskLevel, SchemaOp};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use tracing::warn;

static OP_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bop\.(\w+)\s*\(\s*(?:["'](\w+)["'])?"#).expect("valid regex")
});

static EXECUTE_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)\bop\.execute\(\s*(?:(?:sa\.)?text\(\s*)?[rRuUbB]{0,2}(?:"""(.*?)"""|'''(.*?)'''|"([^"]*)"|'([^']*)')"#,
    )
    .expect("valid regex")
});

static SQL_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:FROM|TABLE|UPDATE|INTO)\s+"?(\w+)"#).expect("valid regex")
});

/// One `op.<name>(...)` call found in a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub name: String,
    pub line: usize,
    /// First string literal argument (the table for most operations)
    pub target: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inspection {
    pub operations: Vec<Operation>,
    /// `EXECUTE_RAW` changes with their line numbers
    pub raw_sql: Vec<(usize, Change)>,
}

impl Inspection {
    /// Highest risk among the raw SQL statements
    pub fn risk(&self) -> RiskLevel {
        self.raw_sql
            .iter()
            .map(|(_, c)| c.risk)
            .max()
            .unwrap_or_default()
    }

    /// Findings to attach to the artifact
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.operations.is_empty() {
            warnings.push(
                "Generated migration contains no operations; check that the model is imported by the migration environment"
                    .to_string(),
            );
        }
        for (line, change) in &self.raw_sql {
            if let Some(warning) = &change.warning {
                warnings.push(format!("Line {}: {}", line, warning));
            }
        }
        warnings
    }
}

pub struct ArtifactInspector {
    dangerous: Vec<(String, Regex)>,
}

impl ArtifactInspector {
    /// Patterns are matched case-insensitively. Invalid ones are skipped.
    pub fn new(patterns: &[String]) -> Self {
        let dangerous = patterns
            .iter()
            .filter_map(|pattern| {
                match RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(re) => Some((pattern.clone(), re)),
                    Err(e) => {
                        warn!("⚠️  Ignoring dangerous operation pattern '{}': {}", pattern, e);
                        None
                    }
                }
            })
            .collect();
        Self { dangerous }
    }

    pub fn inspect(&self, content: &str) -> Inspection {
        let line_of = |offset: usize| content[..offset].matches('\n').count() + 1;

        let operations = OP_CALL
            .captures_iter(content)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some(Operation {
                    name: caps.get(1)?.as_str().to_string(),
                    line: line_of(whole.start()),
                    target: caps.get(2).map(|m| m.as_str().to_string()),
                })
            })
            .collect();

        let raw_sql = EXECUTE_CALL
            .captures_iter(content)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let sql = (1..=4).find_map(|i| caps.get(i))?.as_str().trim();
                Some((line_of(whole.start()), self.classify(sql)))
            })
            .collect();

        Inspection {
            operations,
            raw_sql,
        }
    }

    /// Classify one raw SQL statement
    pub fn classify(&self, sql: &str) -> Change {
        let table = SQL_TABLE
            .captures(sql)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        let op = SchemaOp::ExecuteRaw {
            table,
            sql: sql.to_string(),
        };

        match self.dangerous.iter().find(|(_, re)| re.is_match(sql)) {
            Some((pattern, _)) => Change::new(op, RiskLevel::High).with_warning(format!(
                "Raw SQL matches dangerous operation '{}': {}",
                pattern,
                one_line(sql)
            )),
            None => Change::new(op, RiskLevel::Medium).with_warning(format!(
                "Raw SQL is not covered by the model analysis: {}",
                one_line(sql)
            )),
        }
    }
}

fn one_line(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
