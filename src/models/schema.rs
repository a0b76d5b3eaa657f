//! Parsed model declarations

use serde::{Deserialize, Serialize};

/// A declarative model class and the table it maps to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub class_name: String,
    pub table_name: String,
    pub fields: Vec<FieldDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<RelationshipDefinition>,
}

impl ModelDefinition {
    /// Look up a field by column name
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Foreign key references declared by this model, in field order
    pub fn foreign_keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().filter_map(|f| f.foreign_key.as_deref())
    }
}

/// A single mapped column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    #[serde(default)]
    pub index: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl FieldDefinition {
    /// A nullable column of the given type with every flag off
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            nullable: true,
            primary_key: false,
            unique: false,
            index: false,
            foreign_key: None,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn references(mut self, target: impl Into<String>) -> Self {
        self.foreign_key = Some(target.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// `relationship("Target", ...)` declared on a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDefinition {
    pub name: String,
    pub target: String,
}

/// Convert a class name to its default table name: snake_case, then pluralized
pub fn default_table_name(class_name: &str) -> String {
    let snake = camel_to_snake(class_name);
    if snake.ends_with('s') {
        snake
    } else if let Some(stem) = snake.strip_suffix('y') {
        if stem.ends_with(|c: char| "aeiou".contains(c)) {
            format!("{}s", snake)
        } else {
            format!("{}ies", stem)
        }
    } else {
        format!("{}s", snake)
    }
}

/// `UserProfile` -> `user_profile`, `HTTPRequest` -> `http_request`
pub fn camel_to_snake(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_to_snake() {
        assert_eq!(camel_to_snake("User"), "user");
        assert_eq!(camel_to_snake("UserProfile"), "user_profile");
        assert_eq!(camel_to_snake("HTTPRequest"), "http_request");
        assert_eq!(camel_to_snake("OAuth2Token"), "o_auth2_token");
    }

    #[test]
    fn test_default_table_name_pluralizes() {
        assert_eq!(default_table_name("User"), "users");
        assert_eq!(default_table_name("Category"), "categories");
        assert_eq!(default_table_name("Survey"), "surveys");
        assert_eq!(default_table_name("Address"), "address");
        assert_eq!(default_table_name("OrderItem"), "order_items");
    }
}
