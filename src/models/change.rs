//! Detected schema changes
//!
//! `Change` pairs a closed set of schema operations with the risk assigned
//! when the change was detected. A `ChangeSet` groups the changes observed
//! for exactly one module.

use crate::models::schema::{FieldDefinition, ModelDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Risk level classification (ordinal)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            RiskLevel::Low => "✅",
            RiskLevel::Medium => "⚠️",
            RiskLevel::High => "🚨",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Constraint removed by a `DropConstraint` operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
}

/// Schema operation detected between two observations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaOp {
    CreateTable {
        table: String,
        model: String,
        fields: Vec<FieldDefinition>,
    },
    DropTable {
        table: String,
        model: String,
    },
    AddColumn {
        table: String,
        field: FieldDefinition,
    },
    DropColumn {
        table: String,
        column: String,
        column_type: String,
    },
    AlterColumnType {
        table: String,
        column: String,
        old_type: String,
        new_type: String,
    },
    AlterColumnNullable {
        table: String,
        column: String,
        nullable: bool,
    },
    CreateIndex {
        table: String,
        column: String,
        unique: bool,
    },
    DropConstraint {
        table: String,
        column: String,
        constraint: ConstraintKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
    ExecuteRaw {
        #[serde(skip_serializing_if = "Option::is_none")]
        table: Option<String>,
        sql: String,
    },
}

/// Operation discriminant, used for counting and staging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    CreateTable,
    DropTable,
    AddColumn,
    DropColumn,
    AlterColumnType,
    AlterColumnNullable,
    CreateIndex,
    DropConstraint,
    ExecuteRaw,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::CreateTable => "CREATE_TABLE",
            ChangeKind::DropTable => "DROP_TABLE",
            ChangeKind::AddColumn => "ADD_COLUMN",
            ChangeKind::DropColumn => "DROP_COLUMN",
            ChangeKind::AlterColumnType => "ALTER_COLUMN_TYPE",
            ChangeKind::AlterColumnNullable => "ALTER_COLUMN_NULLABLE",
            ChangeKind::CreateIndex => "CREATE_INDEX",
            ChangeKind::DropConstraint => "DROP_CONSTRAINT",
            ChangeKind::ExecuteRaw => "EXECUTE_RAW",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified schema change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    #[serde(flatten)]
    pub op: SchemaOp,
    pub risk: RiskLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl Change {
    pub fn new(op: SchemaOp, risk: RiskLevel) -> Self {
        Self {
            op,
            risk,
            warning: None,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    /// `CREATE_TABLE` for a model seen for the first time
    pub fn create_table(model: &ModelDefinition) -> Self {
        Self::new(
            SchemaOp::CreateTable {
                table: model.table_name.clone(),
                model: model.class_name.clone(),
                fields: model.fields.clone(),
            },
            RiskLevel::Low,
        )
    }

    pub fn kind(&self) -> ChangeKind {
        match &self.op {
            SchemaOp::CreateTable { .. } => ChangeKind::CreateTable,
            SchemaOp::DropTable { .. } => ChangeKind::DropTable,
            SchemaOp::AddColumn { .. } => ChangeKind::AddColumn,
            SchemaOp::DropColumn { .. } => ChangeKind::DropColumn,
            SchemaOp::AlterColumnType { .. } => ChangeKind::AlterColumnType,
            SchemaOp::AlterColumnNullable { .. } => ChangeKind::AlterColumnNullable,
            SchemaOp::CreateIndex { .. } => ChangeKind::CreateIndex,
            SchemaOp::DropConstraint { .. } => ChangeKind::DropConstraint,
            SchemaOp::ExecuteRaw { .. } => ChangeKind::ExecuteRaw,
        }
    }

    /// Table targeted by the change (raw SQL may not name one)
    pub fn table(&self) -> Option<&str> {
        match &self.op {
            SchemaOp::CreateTable { table, .. }
            | SchemaOp::DropTable { table, .. }
            | SchemaOp::AddColumn { table, .. }
            | SchemaOp::DropColumn { table, .. }
            | SchemaOp::AlterColumnType { table, .. }
            | SchemaOp::AlterColumnNullable { table, .. }
            | SchemaOp::CreateIndex { table, .. }
            | SchemaOp::DropConstraint { table, .. } => Some(table),
            SchemaOp::ExecuteRaw { table, .. } => table.as_deref(),
        }
    }

    pub fn column(&self) -> Option<&str> {
        match &self.op {
            SchemaOp::AddColumn { field, .. } => Some(&field.name),
            SchemaOp::DropColumn { column, .. }
            | SchemaOp::AlterColumnType { column, .. }
            | SchemaOp::AlterColumnNullable { column, .. }
            | SchemaOp::CreateIndex { column, .. }
            | SchemaOp::DropConstraint { column, .. } => Some(column),
            _ => None,
        }
    }

    /// Foreign key references introduced by this change
    pub fn foreign_keys(&self) -> Vec<&str> {
        match &self.op {
            SchemaOp::CreateTable { fields, .. } => fields
                .iter()
                .filter_map(|f| f.foreign_key.as_deref())
                .collect(),
            SchemaOp::AddColumn { field, .. } => field.foreign_key.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Whether the change leaves the column nullable (only meaningful for
    /// column additions and nullability transitions)
    pub fn is_nullable(&self) -> bool {
        match &self.op {
            SchemaOp::AddColumn { field, .. } => field.nullable,
            SchemaOp::AlterColumnNullable { nullable, .. } => *nullable,
            _ => true,
        }
    }

    /// `table.column` or just `table`
    pub fn target(&self) -> String {
        match (self.table(), self.column()) {
            (Some(table), Some(column)) => format!("{}.{}", table, column),
            (Some(table), None) => table.to_string(),
            _ => "-".to_string(),
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.kind(), self.target(), self.risk)
    }
}

/// All changes detected for one module between two observations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub module: String,
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new(module: impl Into<String>, changes: Vec<Change>) -> Self {
        Self {
            module: module.into(),
            changes,
        }
    }

    pub fn empty(module: impl Into<String>) -> Self {
        Self::new(module, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Highest risk across the set, `LOW` when empty
    pub fn max_risk(&self) -> RiskLevel {
        self.changes
            .iter()
            .map(|c| c.risk)
            .max()
            .unwrap_or_default()
    }

    pub fn count_by_kind(&self) -> BTreeMap<ChangeKind, usize> {
        let mut counts = BTreeMap::new();
        for change in &self.changes {
            *counts.entry(change.kind()).or_insert(0) += 1;
        }
        counts
    }

    /// Distinct tables touched, in first-seen order
    pub fn tables(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for table in self.changes.iter().filter_map(Change::table) {
            if !seen.contains(&table) {
                seen.push(table);
            }
        }
        seen
    }

    /// Tables created by this set (they hold no data yet)
    pub fn created_tables(&self) -> Vec<&str> {
        self.changes
            .iter()
            .filter_map(|c| match &c.op {
                SchemaOp::CreateTable { table, .. } => Some(table.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert_eq!(
            [RiskLevel::Medium, RiskLevel::High, RiskLevel::Low].iter().max(),
            Some(&RiskLevel::High)
        );
    }

    #[test]
    fn test_change_serializes_with_type_tag() {
        let change = Change::new(
            SchemaOp::DropColumn {
                table: "users".to_string(),
                column: "legacy_flag".to_string(),
                column_type: "Boolean".to_string(),
            },
            RiskLevel::High,
        )
        .with_warning("Data will be permanently lost");

        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["type"], "DROP_COLUMN");
        assert_eq!(json["table"], "users");
        assert_eq!(json["risk"], "HIGH");
        assert_eq!(change.to_string(), "DROP_COLUMN users.legacy_flag [HIGH]");
    }

    #[test]
    fn test_change_set_max_risk_and_tables() {
        let set = ChangeSet::new(
            "auth",
            vec![
                Change::new(
                    SchemaOp::AddColumn {
                        table: "users".to_string(),
                        field: FieldDefinition::new("nickname", "String"),
                    },
                    RiskLevel::Low,
                ),
                Change::new(
                    SchemaOp::AlterColumnNullable {
                        table: "users".to_string(),
                        column: "email".to_string(),
                        nullable: false,
                    },
                    RiskLevel::Medium,
                ),
            ],
        );

        assert_eq!(set.max_risk(), RiskLevel::Medium);
        assert_eq!(set.tables(), vec!["users"]);
        assert_eq!(ChangeSet::empty("auth").max_risk(), RiskLevel::Low);
    }
}
