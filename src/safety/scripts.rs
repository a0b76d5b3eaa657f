//! SQL snippets attached to a safety report: pre-flight checks and a
//! best-effort rollback script.

use crate::models::{Change, ChangeSet, ConstraintKind, SchemaOp};
use crate::snapshot::diff::{canonical_type, type_family};

/// Queries to run before applying the migration
pub fn safety_checks(change_set: &ChangeSet) -> Vec<String> {
    change_set.changes.iter().filter_map(safety_check).collect()
}

fn safety_check(change: &Change) -> Option<String> {
    match &change.op {
        SchemaOp::DropTable { table, .. } => Some(format!(
            "-- Check data in table to be dropped\nSELECT COUNT(*) FROM {};",
            table
        )),
        SchemaOp::DropColumn { table, column, .. } => Some(format!(
            "-- Check data in column to be dropped\nSELECT COUNT(*), COUNT({}) FROM {};",
            column, table
        )),
        SchemaOp::AlterColumnNullable {
            table,
            column,
            nullable: false,
        } => Some(format!(
            "-- Check for NULL values before adding NOT NULL\nSELECT COUNT(*) FROM {} WHERE {} IS NULL;",
            table, column
        )),
        SchemaOp::CreateIndex {
            table,
            column,
            unique: true,
        } => Some(duplicate_check(table, column)),
        SchemaOp::AddColumn { table, field } if field.unique => {
            Some(duplicate_check(table, &field.name))
        }
        _ => None,
    }
}

fn duplicate_check(table: &str, column: &str) -> String {
    format!(
        "-- Verify uniqueness before adding constraint\nSELECT {c}, COUNT(*) FROM {t} GROUP BY {c} HAVING COUNT(*) > 1;",
        c = column,
        t = table
    )
}

/// Statements undoing the changes, newest first. Dropped data cannot be
/// restored from the migration alone, so those steps are comments.
pub fn rollback_script(change_set: &ChangeSet) -> String {
    change_set
        .changes
        .iter()
        .rev()
        .map(rollback_statement)
        .collect::<Vec<_>>()
        .join("\n")
}

fn rollback_statement(change: &Change) -> String {
    match &change.op {
        SchemaOp::CreateTable { table, .. } => format!("DROP TABLE IF EXISTS {};", table),
        SchemaOp::DropTable { table, .. } => {
            format!("-- Cannot rollback DROP TABLE {} without backup", table)
        }
        SchemaOp::AddColumn { table, field } => format!(
            "ALTER TABLE {} DROP COLUMN IF EXISTS {};",
            table, field.name
        ),
        SchemaOp::DropColumn { table, column, .. } => format!(
            "-- Cannot rollback DROP COLUMN {}.{} without backup",
            table, column
        ),
        SchemaOp::AlterColumnType {
            table,
            column,
            old_type,
            ..
        } => format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {};",
            table,
            column,
            sql_type(old_type)
        ),
        SchemaOp::AlterColumnNullable {
            table,
            column,
            nullable,
        } => {
            let action = if *nullable { "SET NOT NULL" } else { "DROP NOT NULL" };
            format!("ALTER TABLE {} ALTER COLUMN {} {};", table, column, action)
        }
        SchemaOp::CreateIndex {
            table,
            column,
            unique: true,
        } => format!(
            "ALTER TABLE {} DROP CONSTRAINT IF EXISTS uq_{}_{};",
            table, table, column
        ),
        SchemaOp::CreateIndex { table, column, .. } => {
            format!("DROP INDEX IF EXISTS ix_{}_{};", table, column)
        }
        SchemaOp::DropConstraint {
            table,
            column,
            constraint: ConstraintKind::Unique,
            ..
        } => format!(
            "ALTER TABLE {t} ADD CONSTRAINT uq_{t}_{c} UNIQUE ({c});",
            t = table,
            c = column
        ),
        SchemaOp::DropConstraint {
            table,
            column,
            constraint: ConstraintKind::ForeignKey,
            reference,
        } => match reference.as_deref().and_then(|r| r.rsplit_once('.')) {
            Some((target, target_column)) => format!(
                "ALTER TABLE {t} ADD CONSTRAINT fk_{t}_{c} FOREIGN KEY ({c}) REFERENCES {} ({});",
                target,
                target_column,
                t = table,
                c = column
            ),
            None => format!(
                "-- Cannot restore foreign key on {}.{}: unknown target",
                table, column
            ),
        },
        SchemaOp::ExecuteRaw { sql, .. } => {
            format!("-- Review raw SQL manually: {}", sql.replace('\n', " "))
        }
    }
}

/// SQL spelling of a declared type (`String(50)` -> `VARCHAR(50)`,
/// `Numeric(10, 2)` -> `NUMERIC(10, 2)`, `DateTime(timezone=True)` -> `TIMESTAMPTZ`)
fn sql_type(column_type: &str) -> String {
    let (family, _) = type_family(column_type);
    let canonical = canonical_type(column_type);
    let args = canonical
        .find('(')
        .map(|idx| canonical[idx + 1..].trim_end_matches(')'))
        .unwrap_or("");

    let mut sizes = Vec::new();
    let mut timezone = false;
    for arg in args.split(',').filter(|a| !a.is_empty()) {
        match arg.split_once('=') {
            Some(("timezone", value)) => timezone = value == "True",
            Some(("length" | "precision" | "scale", value)) if value.parse::<u64>().is_ok() => {
                sizes.push(value)
            }
            Some(_) => {}
            None if arg.parse::<u64>().is_ok() => sizes.push(arg),
            None => {}
        }
    }

    let family = if family == "TIMESTAMP" && timezone {
        "TIMESTAMPTZ".to_string()
    } else {
        family
    };
    if sizes.is_empty() {
        family
    } else {
        format!("{}({})", family, sizes.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldDefinition, RiskLevel};
    use pretty_assertions::assert_eq;

    fn set(ops: Vec<SchemaOp>) -> ChangeSet {
        ChangeSet::new(
            "auth",
            ops.into_iter()
                .map(|op| Change::new(op, RiskLevel::Medium))
                .collect(),
        )
    }

    #[test]
    fn test_safety_checks() {
        let checks = safety_checks(&set(vec![
            SchemaOp::DropColumn {
                table: "users".to_string(),
                column: "legacy_flag".to_string(),
                column_type: "Boolean".to_string(),
            },
            SchemaOp::AlterColumnNullable {
                table: "users".to_string(),
                column: "email".to_string(),
                nullable: false,
            },
            SchemaOp::AlterColumnNullable {
                table: "users".to_string(),
                column: "bio".to_string(),
                nullable: true,
            },
            SchemaOp::CreateIndex {
                table: "users".to_string(),
                column: "email".to_string(),
                unique: true,
            },
        ]));

        assert_eq!(checks.len(), 3);
        assert!(checks[0].ends_with("SELECT COUNT(*), COUNT(legacy_flag) FROM users;"));
        assert!(checks[1].ends_with("SELECT COUNT(*) FROM users WHERE email IS NULL;"));
        assert!(checks[2].contains("HAVING COUNT(*) > 1"));
    }

    #[test]
    fn test_rollback_is_reversed() {
        let script = rollback_script(&set(vec![
            SchemaOp::AddColumn {
                table: "users".to_string(),
                field: FieldDefinition::new("nickname", "String(50)"),
            },
            SchemaOp::DropColumn {
                table: "users".to_string(),
                column: "legacy_flag".to_string(),
                column_type: "Boolean".to_string(),
            },
            SchemaOp::AlterColumnType {
                table: "users".to_string(),
                column: "visits".to_string(),
                old_type: "BigInteger".to_string(),
                new_type: "Integer".to_string(),
            },
        ]));

        assert_eq!(
            script,
            "ALTER TABLE users ALTER COLUMN visits TYPE BIGINT;\n\
             -- Cannot rollback DROP COLUMN users.legacy_flag without backup\n\
             ALTER TABLE users DROP COLUMN IF EXISTS nickname;"
        );
    }

    #[test]
    fn test_rollback_keeps_scale_and_timezone() {
        let script = rollback_script(&set(vec![
            SchemaOp::AlterColumnType {
                table: "invoices".to_string(),
                column: "amount".to_string(),
                old_type: "Numeric(10, 2)".to_string(),
                new_type: "Integer".to_string(),
            },
            SchemaOp::AlterColumnType {
                table: "events".to_string(),
                column: "at".to_string(),
                old_type: "DateTime(timezone=True)".to_string(),
                new_type: "Date".to_string(),
            },
            SchemaOp::AlterColumnType {
                table: "users".to_string(),
                column: "age".to_string(),
                old_type: "sa.SmallInteger".to_string(),
                new_type: "Integer".to_string(),
            },
        ]));

        assert_eq!(
            script,
            "ALTER TABLE users ALTER COLUMN age TYPE SMALLINT;\n\
             ALTER TABLE events ALTER COLUMN at TYPE TIMESTAMPTZ;\n\
             ALTER TABLE invoices ALTER COLUMN amount TYPE NUMERIC(10, 2);"
        );
        assert_eq!(sql_type("String(length=50)"), "VARCHAR(50)");
        assert_eq!(sql_type("Numeric(precision=12, scale=4)"), "NUMERIC(12, 4)");
    }

    #[test]
    fn test_rollback_restores_foreign_key() {
        let script = rollback_script(&set(vec![SchemaOp::DropConstraint {
            table: "orders".to_string(),
            column: "customer_id".to_string(),
            constraint: ConstraintKind::ForeignKey,
            reference: Some("customers.id".to_string()),
        }]));
        assert_eq!(
            script,
            "ALTER TABLE orders ADD CONSTRAINT fk_orders_customer_id FOREIGN KEY (customer_id) REFERENCES customers (id);"
        );
    }
}
