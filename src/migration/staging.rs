//! Staged migration planning
//!
//! Large migrations are split into a fixed sequence of stages so additive
//! work lands before data rewrites, constraints, and finally destructive
//! cleanup.

use crate::models::{Change, SchemaOp};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SafeAdditions,
    DataMigrations,
    AddConstraints,
    DangerousCleanup,
}

impl Stage {
    /// Application order
    pub const ALL: [Stage; 4] = [
        Stage::SafeAdditions,
        Stage::DataMigrations,
        Stage::AddConstraints,
        Stage::DangerousCleanup,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::SafeAdditions => "safe_additions",
            Stage::DataMigrations => "data_migrations",
            Stage::AddConstraints => "add_constraints",
            Stage::DangerousCleanup => "dangerous_cleanup",
        }
    }

    /// Stage a change belongs to
    pub fn of(change: &Change) -> Stage {
        match &change.op {
            SchemaOp::CreateTable { .. } => Stage::SafeAdditions,
            SchemaOp::AddColumn { field, .. } if field.nullable => Stage::SafeAdditions,
            SchemaOp::AddColumn { .. } => Stage::AddConstraints,
            SchemaOp::AlterColumnNullable { nullable: true, .. } => Stage::SafeAdditions,
            SchemaOp::AlterColumnNullable { nullable: false, .. } => Stage::AddConstraints,
            SchemaOp::CreateIndex { unique: false, .. } => Stage::SafeAdditions,
            SchemaOp::CreateIndex { unique: true, .. } => Stage::AddConstraints,
            SchemaOp::AlterColumnType { .. } | SchemaOp::ExecuteRaw { .. } => {
                Stage::DataMigrations
            }
            SchemaOp::DropTable { .. }
            | SchemaOp::DropColumn { .. }
            | SchemaOp::DropConstraint { .. } => Stage::DangerousCleanup,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Split changes into the non-empty stages, in application order. Each change
/// keeps its relative order inside its stage.
pub fn partition(changes: &[Change]) -> Vec<(Stage, Vec<Change>)> {
    Stage::ALL
        .iter()
        .filter_map(|stage| {
            let members: Vec<Change> = changes
                .iter()
                .filter(|c| Stage::of(c) == *stage)
                .cloned()
                .collect();
            (!members.is_empty()).then_some((*stage, members))
        })
        .collect()
}
