//! Model Diff Engine
//!
//! Compares two parses of the same model file and classifies every
//! difference as a risk-rated `Change`. Tables are matched by table name and
//! fields by column name. Output order is deterministic: created tables,
//! dropped tables, then per surviving table the added, removed and modified
//! fields.

use crate::models::{
    Change, ConstraintKind, FieldDefinition, ModelDefinition, RiskLevel, SchemaOp,
};
use std::collections::HashMap;

/// Narrowing conversions between normalized type families
const LOSSY_CONVERSIONS: &[(&str, &str)] = &[
    ("VARCHAR", "INTEGER"),
    ("TEXT", "INTEGER"),
    ("TEXT", "VARCHAR"),
    ("BIGINT", "INTEGER"),
    ("BIGINT", "SMALLINT"),
    ("INTEGER", "SMALLINT"),
    ("VARCHAR", "SMALLINT"),
    ("TEXT", "SMALLINT"),
    ("NUMERIC", "SMALLINT"),
    ("NUMERIC", "INTEGER"),
    ("TIMESTAMP", "DATE"),
    ("DOUBLE", "FLOAT"),
];

/// The diff engine that compares model declarations
pub struct DiffEngine;

impl DiffEngine {
    /// Changes for a file seen for the first time: every model is new
    pub fn initial(models: &[ModelDefinition]) -> Vec<Change> {
        models.iter().map(Change::create_table).collect()
    }

    /// Compare old and new declarations of one file
    pub fn diff(from: &[ModelDefinition], to: &[ModelDefinition]) -> Vec<Change> {
        let mut changes = Vec::new();

        let from_map: HashMap<&str, &ModelDefinition> =
            from.iter().map(|m| (m.table_name.as_str(), m)).collect();
        let to_map: HashMap<&str, &ModelDefinition> =
            to.iter().map(|m| (m.table_name.as_str(), m)).collect();

        // Created tables, in new declaration order
        for model in to.iter().filter(|m| !from_map.contains_key(m.table_name.as_str())) {
            changes.push(Change::create_table(model));
        }

        // Dropped tables, in old declaration order
        for model in from.iter().filter(|m| !to_map.contains_key(m.table_name.as_str())) {
            changes.push(
                Change::new(
                    SchemaOp::DropTable {
                        table: model.table_name.clone(),
                        model: model.class_name.clone(),
                    },
                    RiskLevel::High,
                )
                .with_warning(format!(
                    "Table '{}' and all its data will be permanently deleted",
                    model.table_name
                )),
            );
        }

        for to_model in to {
            if let Some(from_model) = from_map.get(to_model.table_name.as_str()) {
                Self::diff_fields(from_model, to_model, &mut changes);
            }
        }

        changes
    }

    fn diff_fields(from: &ModelDefinition, to: &ModelDefinition, changes: &mut Vec<Change>) {
        let table = &to.table_name;

        for field in to.fields.iter().filter(|f| from.field(&f.name).is_none()) {
            changes.push(Self::add_column(table, field));
        }

        for field in from.fields.iter().filter(|f| to.field(&f.name).is_none()) {
            changes.push(
                Change::new(
                    SchemaOp::DropColumn {
                        table: table.clone(),
                        column: field.name.clone(),
                        column_type: field.column_type.clone(),
                    },
                    RiskLevel::High,
                )
                .with_warning("Data will be permanently lost"),
            );
        }

        for to_field in &to.fields {
            if let Some(from_field) = from.field(&to_field.name) {
                Self::compare_fields(table, from_field, to_field, changes);
            }
        }
    }

    fn add_column(table: &str, field: &FieldDefinition) -> Change {
        let change = Change::new(
            SchemaOp::AddColumn {
                table: table.to_string(),
                field: field.clone(),
            },
            RiskLevel::Low,
        );

        if !field.nullable && field.default.is_none() {
            Change {
                risk: RiskLevel::Medium,
                ..change
            }
            .with_warning(format!(
                "missing default: adding NOT NULL column '{}' without a default value fails on tables with rows",
                field.name
            ))
        } else {
            change
        }
    }

    fn compare_fields(
        table: &str,
        from: &FieldDefinition,
        to: &FieldDefinition,
        changes: &mut Vec<Change>,
    ) {
        let column = || to.name.clone();

        // Type change
        if canonical_type(&from.column_type) != canonical_type(&to.column_type) {
            let op = SchemaOp::AlterColumnType {
                table: table.to_string(),
                column: column(),
                old_type: from.column_type.clone(),
                new_type: to.column_type.clone(),
            };
            let change = if is_lossy_conversion(&from.column_type, &to.column_type) {
                Change::new(op, RiskLevel::High).with_warning(format!(
                    "Lossy conversion from {} to {}: data may be truncated or lost",
                    from.column_type, to.column_type
                ))
            } else {
                Change::new(op, RiskLevel::Medium)
                    .with_warning("Type conversion may fail or lose precision")
            };
            changes.push(change);
        }

        // Nullable change
        if from.nullable != to.nullable {
            let op = SchemaOp::AlterColumnNullable {
                table: table.to_string(),
                column: column(),
                nullable: to.nullable,
            };
            changes.push(if to.nullable {
                Change::new(op, RiskLevel::Low)
            } else {
                Change::new(op, RiskLevel::Medium)
                    .with_warning("Setting NOT NULL fails if existing rows contain NULL values")
            });
        }

        // Index or unique constraint gained
        let gains_unique = to.unique && !from.unique;
        let gains_index = to.index && !from.index;
        if gains_unique {
            changes.push(
                Change::new(
                    SchemaOp::CreateIndex {
                        table: table.to_string(),
                        column: column(),
                        unique: true,
                    },
                    RiskLevel::Medium,
                )
                .with_warning("Adding a unique constraint fails if duplicate values exist"),
            );
        } else if gains_index {
            changes.push(Change::new(
                SchemaOp::CreateIndex {
                    table: table.to_string(),
                    column: column(),
                    unique: false,
                },
                RiskLevel::Low,
            ));
        }

        // Constraints lost
        if from.unique && !to.unique {
            changes.push(Self::drop_constraint(table, &to.name, ConstraintKind::Unique, None));
        }
        if let Some(reference) = &from.foreign_key {
            if to.foreign_key.as_ref() != Some(reference) {
                changes.push(Self::drop_constraint(
                    table,
                    &to.name,
                    ConstraintKind::ForeignKey,
                    Some(reference.clone()),
                ));
            }
        }
    }

    fn drop_constraint(
        table: &str,
        column: &str,
        constraint: ConstraintKind,
        reference: Option<String>,
    ) -> Change {
        let what = match constraint {
            ConstraintKind::Unique => "unique constraint",
            ConstraintKind::ForeignKey => "foreign key",
        };
        Change::new(
            SchemaOp::DropConstraint {
                table: table.to_string(),
                column: column.to_string(),
                constraint,
                reference,
            },
            RiskLevel::Medium,
        )
        .with_warning(format!(
            "Dropping the {} on {}.{} allows data that was previously rejected",
            what, table, column
        ))
    }
}

/// Type expression without module qualifiers (`sa.String(50)` -> `String(50)`)
pub fn canonical_type(column_type: &str) -> String {
    let (base, args) = match column_type.find('(') {
        Some(idx) => column_type.split_at(idx),
        None => (column_type, ""),
    };
    let base = base.rsplit('.').next().unwrap_or(base).trim();
    format!("{}{}", base, args.replace(' ', ""))
}

/// Normalized type family and optional length (`String(50)` -> `("VARCHAR", Some(50))`)
pub fn type_family(column_type: &str) -> (String, Option<u64>) {
    let canonical = canonical_type(column_type);
    let (base, args) = match canonical.find('(') {
        Some(idx) => canonical.split_at(idx),
        None => (canonical.as_str(), ""),
    };

    let length = args
        .trim_start_matches('(')
        .split([',', ')'])
        .next()
        .and_then(|first| first.trim().parse().ok());

    let family = match base.to_ascii_uppercase().as_str() {
        "STRING" | "VARCHAR" | "UNICODE" | "NVARCHAR" => "VARCHAR",
        "TEXT" | "UNICODETEXT" | "CLOB" => "TEXT",
        "INTEGER" | "INT" => "INTEGER",
        "SMALLINTEGER" | "SMALLINT" => "SMALLINT",
        "BIGINTEGER" | "BIGINT" => "BIGINT",
        "NUMERIC" | "DECIMAL" => "NUMERIC",
        "DATETIME" | "TIMESTAMP" => "TIMESTAMP",
        "DATE" => "DATE",
        "FLOAT" | "REAL" => "FLOAT",
        "DOUBLE" | "DOUBLE_PRECISION" => "DOUBLE",
        other => return (other.to_string(), length),
    };
    (family.to_string(), length)
}

/// Whether converting `from` to `to` can silently lose data
pub fn is_lossy_conversion(from: &str, to: &str) -> bool {
    let (from_family, from_len) = type_family(from);
    let (to_family, to_len) = type_family(to);

    if LOSSY_CONVERSIONS.contains(&(from_family.as_str(), to_family.as_str())) {
        return true;
    }

    // Shrinking a bounded string
    from_family == "VARCHAR"
        && to_family == "VARCHAR"
        && matches!((from_len, to_len), (Some(old), Some(new)) if new < old)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeKind;
    use pretty_assertions::assert_eq;

    fn users(fields: Vec<FieldDefinition>) -> ModelDefinition {
        ModelDefinition {
            class_name: "User".to_string(),
            table_name: "users".to_string(),
            fields,
            relationships: Vec::new(),
        }
    }

    fn base_fields() -> Vec<FieldDefinition> {
        vec![
            FieldDefinition::new("id", "Integer").primary_key(),
            FieldDefinition::new("email", "String(255)").not_null(),
        ]
    }

    #[test]
    fn test_initial_creates_every_table() {
        let changes = DiffEngine::initial(&[users(base_fields())]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind(), ChangeKind::CreateTable);
        assert_eq!(changes[0].risk, RiskLevel::Low);
    }

    #[test]
    fn test_identical_models_produce_nothing() {
        let model = users(base_fields());
        assert!(DiffEngine::diff(&[model.clone()], &[model]).is_empty());
    }

    #[test]
    fn test_nullable_column_added_is_low() {
        let mut fields = base_fields();
        fields.push(FieldDefinition::new("nickname", "String(50)"));

        let changes = DiffEngine::diff(&[users(base_fields())], &[users(fields)]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].to_string(), "ADD_COLUMN users.nickname [LOW]");
        assert_eq!(changes[0].warning, None);
    }

    #[test]
    fn test_not_null_without_default_is_medium() {
        let mut fields = base_fields();
        fields.push(FieldDefinition::new("ssn", "String(11)").not_null());

        let changes = DiffEngine::diff(&[users(base_fields())], &[users(fields)]);
        assert_eq!(changes[0].risk, RiskLevel::Medium);
        assert!(changes[0].warning.as_deref().unwrap().contains("missing default"));
    }

    #[test]
    fn test_not_null_with_default_is_low() {
        let mut fields = base_fields();
        fields.push(FieldDefinition::new("active", "Boolean").not_null().with_default("True"));

        let changes = DiffEngine::diff(&[users(base_fields())], &[users(fields)]);
        assert_eq!(changes[0].risk, RiskLevel::Low);
    }

    #[test]
    fn test_removed_column_is_high() {
        let mut old = base_fields();
        old.push(FieldDefinition::new("legacy_flag", "Boolean"));

        let changes = DiffEngine::diff(&[users(old)], &[users(base_fields())]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].to_string(), "DROP_COLUMN users.legacy_flag [HIGH]");
    }

    #[test]
    fn test_table_created_and_dropped() {
        let orders = ModelDefinition {
            class_name: "Order".to_string(),
            table_name: "orders".to_string(),
            fields: vec![FieldDefinition::new("id", "Integer").primary_key()],
            relationships: Vec::new(),
        };

        let changes = DiffEngine::diff(&[orders.clone()], &[users(base_fields())]);
        let kinds: Vec<ChangeKind> = changes.iter().map(Change::kind).collect();
        assert_eq!(kinds, vec![ChangeKind::CreateTable, ChangeKind::DropTable]);
        assert_eq!(changes[1].risk, RiskLevel::High);
    }

    #[test]
    fn test_type_changes() {
        let changes = DiffEngine::diff(
            &[users(vec![
                FieldDefinition::new("visits", "BigInteger"),
                FieldDefinition::new("score", "Integer"),
            ])],
            &[users(vec![
                FieldDefinition::new("visits", "Integer"),
                FieldDefinition::new("score", "BigInteger"),
            ])],
        );

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].risk, RiskLevel::High);
        assert_eq!(changes[1].risk, RiskLevel::Medium);
    }

    #[test]
    fn test_qualifier_only_change_is_ignored() {
        let changes = DiffEngine::diff(
            &[users(vec![FieldDefinition::new("name", "String(50)")])],
            &[users(vec![FieldDefinition::new("name", "sa.String(50)")])],
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn test_nullability_transitions() {
        let tighten = DiffEngine::diff(
            &[users(vec![FieldDefinition::new("email", "String")])],
            &[users(vec![FieldDefinition::new("email", "String").not_null()])],
        );
        assert_eq!(tighten[0].risk, RiskLevel::Medium);

        let relax = DiffEngine::diff(
            &[users(vec![FieldDefinition::new("email", "String").not_null()])],
            &[users(vec![FieldDefinition::new("email", "String")])],
        );
        assert_eq!(relax[0].risk, RiskLevel::Low);
        assert!(relax[0].is_nullable());
    }

    #[test]
    fn test_constraint_gained_and_lost() {
        let gained = DiffEngine::diff(
            &[users(vec![FieldDefinition::new("email", "String")])],
            &[users(vec![FieldDefinition::new("email", "String").unique()])],
        );
        assert_eq!(gained[0].kind(), ChangeKind::CreateIndex);
        assert_eq!(gained[0].risk, RiskLevel::Medium);

        let lost = DiffEngine::diff(
            &[users(vec![FieldDefinition::new("team_id", "Integer").references("teams.id")])],
            &[users(vec![FieldDefinition::new("team_id", "Integer")])],
        );
        assert_eq!(lost[0].kind(), ChangeKind::DropConstraint);
        assert_eq!(lost[0].risk, RiskLevel::Medium);
    }

    #[test]
    fn test_lossy_pairs() {
        assert!(is_lossy_conversion("String(255)", "Integer"));
        assert!(is_lossy_conversion("Text", "String(100)"));
        assert!(is_lossy_conversion("BigInteger", "Integer"));
        assert!(is_lossy_conversion("Numeric(10, 2)", "Integer"));
        assert!(is_lossy_conversion("DateTime", "Date"));
        assert!(is_lossy_conversion("Double", "Float"));
        assert!(is_lossy_conversion("String(255)", "String(50)"));
        assert!(!is_lossy_conversion("String(50)", "String(255)"));
        assert!(!is_lossy_conversion("Integer", "BigInteger"));
        assert!(!is_lossy_conversion("String", "Text"));
    }

    #[test]
    fn test_small_integer_narrowing_is_high() {
        let changes = DiffEngine::diff(
            &[users(vec![FieldDefinition::new("age", "Integer")])],
            &[users(vec![FieldDefinition::new("age", "sa.SmallInteger")])],
        );
        assert_eq!(changes[0].kind(), ChangeKind::AlterColumnType);
        assert_eq!(changes[0].risk, RiskLevel::High);

        assert!(is_lossy_conversion("BigInteger", "SmallInteger"));
        assert!(!is_lossy_conversion("SmallInteger", "Integer"));
    }

    #[test]
    fn test_type_family() {
        assert_eq!(type_family("sa.String(50)"), ("VARCHAR".to_string(), Some(50)));
        assert_eq!(type_family("Numeric(10, 2)"), ("NUMERIC".to_string(), Some(10)));
        assert_eq!(type_family("JSONB"), ("JSONB".to_string(), None));
        assert_eq!(type_family("sa.SmallInteger"), ("SMALLINT".to_string(), None));
    }
}
