//! Table ownership map
//!
//! Records which module declares each table, built once by scanning
//! `<app_root>/<module>/models/`, nested packages included.

use crate::models::ModelDefinition;
use crate::snapshot::ModelParser;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default)]
pub struct OwnershipMap {
    /// table -> owning module
    tables: BTreeMap<String, String>,
    /// model class -> owning module, for `ForeignKey(User.id)` style references
    classes: BTreeMap<String, String>,
    /// module -> tables it declares
    module_tables: BTreeMap<String, BTreeSet<String>>,
    /// module -> foreign key references declared anywhere in the module
    references: BTreeMap<String, BTreeSet<String>>,
}

impl OwnershipMap {
    /// Scan every module under `app_root`; unreadable files are logged and skipped
    pub fn scan(app_root: &Path, parser: &ModelParser) -> Self {
        let mut map = Self::default();

        let entries = match std::fs::read_dir(app_root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("⚠️  Cannot scan {}: {}", app_root.display(), e);
                return map;
            }
        };

        let mut modules: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.join("models").is_dir())
            .collect();
        modules.sort();

        for module_dir in modules {
            let Some(module) = module_dir.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                continue;
            };
            map.module_tables.entry(module.clone()).or_default();

            let mut files: Vec<_> = WalkDir::new(module_dir.join("models"))
                .into_iter()
                .filter_entry(|entry| !is_private(entry.path()))
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!("⚠️  Cannot list models of '{}': {}", module, e);
                        None
                    }
                })
                .filter(|entry| {
                    entry.file_type().is_file()
                        && entry.path().extension().is_some_and(|ext| ext == "py")
                })
                .map(|entry| entry.into_path())
                .collect();
            files.sort();

            for file in files {
                let parsed = std::fs::read_to_string(&file)
                    .map_err(|e| e.to_string())
                    .and_then(|content| parser.parse(&content).map_err(|e| e.to_string()));
                match parsed {
                    Ok(models) => map.register(&module, &models),
                    Err(e) => error!("❌ Skipping {} during ownership scan: {}", file.display(), e),
                }
            }
        }

        debug!(
            "Ownership map: {} tables across {} modules",
            map.tables.len(),
            map.module_tables.len()
        );
        map
    }

    /// Build from already parsed models
    pub fn from_models<'a>(
        modules: impl IntoIterator<Item = (&'a str, &'a [ModelDefinition])>,
    ) -> Self {
        let mut map = Self::default();
        for (module, models) in modules {
            map.register(module, models);
        }
        map
    }

    fn register(&mut self, module: &str, models: &[ModelDefinition]) {
        let module_tables = self.module_tables.entry(module.to_string()).or_default();
        for model in models {
            module_tables.insert(model.table_name.clone());
            match self.tables.get(&model.table_name) {
                Some(owner) if owner != module => warn!(
                    "⚠️  Table '{}' declared by both '{}' and '{}', keeping '{}'",
                    model.table_name, owner, module, owner
                ),
                Some(_) => {}
                None => {
                    self.tables
                        .insert(model.table_name.clone(), module.to_string());
                }
            }
            self.classes
                .entry(model.class_name.clone())
                .or_insert_with(|| module.to_string());

            let references = self.references.entry(module.to_string()).or_default();
            references.extend(model.foreign_keys().map(str::to_string));
        }
    }

    pub fn owner_of_table(&self, table: &str) -> Option<&str> {
        self.tables.get(table).map(String::as_str)
    }

    /// Resolve a foreign key reference (`table.column`, `schema.table.column`,
    /// or `Class.attr`) to `(owning module, table)`
    pub fn resolve_reference(&self, reference: &str) -> Option<(&str, String)> {
        let parts: Vec<&str> = reference.split('.').collect();
        if parts.len() < 2 {
            return None;
        }
        let target = parts[parts.len() - 2];

        if let Some(owner) = self.tables.get(target) {
            return Some((owner.as_str(), target.to_string()));
        }
        let owner = self.classes.get(target)?;
        let table = self
            .module_tables
            .get(owner)
            .into_iter()
            .flatten()
            .find(|t| crate::models::default_table_name(target) == **t)
            .cloned()
            .unwrap_or_else(|| target.to_string());
        Some((owner.as_str(), table))
    }

    pub fn modules(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.module_tables.iter().map(|(m, t)| (m.as_str(), t))
    }

    pub fn references_of(&self, module: &str) -> impl Iterator<Item = &str> {
        self.references.get(module).into_iter().flatten().map(String::as_str)
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

/// `__init__.py`, `__pycache__` and friends
fn is_private(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with("__"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldDefinition;

    fn model(class: &str, table: &str, fields: Vec<FieldDefinition>) -> ModelDefinition {
        ModelDefinition {
            class_name: class.to_string(),
            table_name: table.to_string(),
            fields,
            relationships: Vec::new(),
        }
    }

    #[test]
    fn test_scan_module_layout() {
        let dir = tempfile::tempdir().unwrap();
        let models = dir.path().join("customers").join("models");
        std::fs::create_dir_all(&models).unwrap();
        std::fs::write(
            models.join("customer.py"),
            "class Customer(Base):\n    id = Column(Integer, primary_key=True)\n",
        )
        .unwrap();
        std::fs::write(models.join("__init__.py"), "class Ignored(Base):\n    id = Column(Integer)\n")
            .unwrap();
        std::fs::write(models.join("broken.py"), "class Broken(Base):\n    id = Column(\n").unwrap();
        std::fs::create_dir_all(dir.path().join("utils")).unwrap();

        let map = OwnershipMap::scan(dir.path(), &ModelParser::default());
        assert_eq!(map.owner_of_table("customers"), Some("customers"));
        assert_eq!(map.owner_of_table("ignoreds"), None);
        assert_eq!(map.table_count(), 1);
        assert_eq!(map.modules().count(), 1);
    }

    #[test]
    fn test_scan_nested_model_packages() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("customers").join("models").join("billing");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            nested.join("account.py"),
            "class Account(Base):\n    __tablename__ = 'accounts'\n    id = Column(Integer, primary_key=True)\n",
        )
        .unwrap();
        std::fs::write(nested.join("__init__.py"), "").unwrap();

        let map = OwnershipMap::scan(dir.path(), &ModelParser::default());
        assert_eq!(map.owner_of_table("accounts"), Some("customers"));
        assert_eq!(
            map.resolve_reference("accounts.id"),
            Some(("customers", "accounts".to_string()))
        );
    }

    #[test]
    fn test_missing_app_root_is_empty() {
        let map = OwnershipMap::scan(Path::new("/nonexistent/app"), &ModelParser::default());
        assert_eq!(map.table_count(), 0);
    }

    #[test]
    fn test_resolve_reference_forms() {
        let customers = vec![model(
            "Customer",
            "customers",
            vec![FieldDefinition::new("id", "Integer")],
        )];
        let map = OwnershipMap::from_models([("crm", customers.as_slice())]);

        assert_eq!(
            map.resolve_reference("customers.id"),
            Some(("crm", "customers".to_string()))
        );
        assert_eq!(
            map.resolve_reference("public.customers.id"),
            Some(("crm", "customers".to_string()))
        );
        assert_eq!(
            map.resolve_reference("Customer.id"),
            Some(("crm", "customers".to_string()))
        );
        assert_eq!(map.resolve_reference("customers"), None);
        assert_eq!(map.resolve_reference("vendors.id"), None);
    }

    #[test]
    fn test_first_owner_wins() {
        let a = vec![model("Tag", "tags", vec![FieldDefinition::new("id", "Integer")])];
        let b = a.clone();
        let map = OwnershipMap::from_models([("blog", a.as_slice()), ("shop", b.as_slice())]);
        assert_eq!(map.owner_of_table("tags"), Some("blog"));
    }
}
