//! Migration naming

use crate::config::NamingConvention;
use crate::models::{ChangeKind, ChangeSet, RiskLevel};
use chrono::NaiveDateTime;

/// Summary of the change-type counts (`create_2_tables_add_1_columns`)
pub fn describe(change_set: &ChangeSet) -> String {
    let counts = change_set.count_by_kind();
    let count = |kind| counts.get(&kind).copied().unwrap_or(0);

    let mut parts = Vec::new();
    for (kind, verb, noun) in [
        (ChangeKind::CreateTable, "create", "tables"),
        (ChangeKind::AddColumn, "add", "columns"),
        (ChangeKind::DropTable, "drop", "tables"),
        (ChangeKind::DropColumn, "drop", "columns"),
    ] {
        let n = count(kind);
        if n > 0 {
            parts.push(format!("{}_{}_{}", verb, n, noun));
        }
    }
    if count(ChangeKind::AlterColumnType) > 0 {
        parts.push("alter_column_types".to_string());
    }

    if parts.is_empty() {
        "schema_changes".to_string()
    } else {
        parts.join("_")
    }
}

/// Description of one stage of a staged migration
pub fn stage_description(stage_name: &str, step: usize) -> String {
    format!("{}_step{}", stage_name, step)
}

/// Render the naming template, then append the staged and dangerous suffixes
pub fn migration_name(
    convention: &NamingConvention,
    module: &str,
    description: &str,
    risk: RiskLevel,
    staged: bool,
    now: &NaiveDateTime,
) -> String {
    let timestamp = now.format(&convention.timestamp).to_string();
    let mut name = convention
        .format
        .replace("{timestamp}", &timestamp)
        .replace("{module}", module)
        .replace("{description}", description);

    if staged {
        name.push_str(&convention.staged_suffix);
    }
    if risk == RiskLevel::High {
        name.push_str(&convention.dangerous_suffix);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Change, FieldDefinition, ModelDefinition, SchemaOp};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(14, 5, 0))
            .unwrap()
    }

    fn table(name: &str) -> Change {
        Change::create_table(&ModelDefinition {
            class_name: name.to_string(),
            table_name: name.to_string(),
            fields: vec![FieldDefinition::new("id", "Integer").primary_key()],
            relationships: Vec::new(),
        })
    }

    #[test]
    fn test_describe_counts() {
        let set = ChangeSet::new(
            "billing",
            vec![
                table("invoices"),
                table("payments"),
                Change::new(
                    SchemaOp::AddColumn {
                        table: "customers".to_string(),
                        field: FieldDefinition::new("vat_id", "String"),
                    },
                    RiskLevel::Low,
                ),
                Change::new(
                    SchemaOp::AlterColumnType {
                        table: "customers".to_string(),
                        column: "balance".to_string(),
                        old_type: "Numeric".to_string(),
                        new_type: "Integer".to_string(),
                    },
                    RiskLevel::High,
                ),
            ],
        );
        assert_eq!(
            describe(&set),
            "create_2_tables_add_1_columns_alter_column_types"
        );
    }

    #[test]
    fn test_describe_fallback() {
        let set = ChangeSet::new(
            "billing",
            vec![Change::new(
                SchemaOp::CreateIndex {
                    table: "customers".to_string(),
                    column: "email".to_string(),
                    unique: false,
                },
                RiskLevel::Low,
            )],
        );
        assert_eq!(describe(&set), "schema_changes");
    }

    #[test]
    fn test_migration_name_suffixes() {
        let convention = NamingConvention::default();
        assert_eq!(
            migration_name(&convention, "auth", "add_1_columns", RiskLevel::Low, false, &now()),
            "2024_03_09_1405_auth_add_1_columns"
        );
        assert_eq!(
            migration_name(
                &convention,
                "auth",
                &stage_description("dangerous_cleanup", 2),
                RiskLevel::High,
                true,
                &now()
            ),
            "2024_03_09_1405_auth_dangerous_cleanup_step2_staged_DANGEROUS"
        );
    }
}
