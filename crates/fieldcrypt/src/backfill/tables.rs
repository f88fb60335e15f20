//! The list of tables and fields processed by the bulk jobs.
//!
//! ```yaml
//! tables:
//!   - schema: main
//!     table_name: users
//!     id_column: id
//!     fields: [first_name, last_name, email]
//!     defaults:
//!       first_name: Default
//! ```
//!
//! YAML is tried first, then JSON.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::annotations::{shadow_column, FieldAnnotationRegistry};

#[derive(Debug, Error)]
pub enum TablesError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tables config is not valid YAML or JSON: {0}")]
    Parse(String),

    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),

    #[error("table {0} lists no fields")]
    NoFields(String),

    #[error("default given for {table}.{field}, which is not a listed field")]
    StrayDefault { table: String, field: String },
}

/// One table and its protected fields.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TableSpec {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub table_name: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    pub fields: Vec<String>,
    /// Plaintext written by the reset job. Unlisted fields reset to `""`.
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
}

impl TableSpec {
    pub fn new(table_name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            schema: default_schema(),
            table_name: table_name.into(),
            id_column: default_id_column(),
            fields: fields.iter().map(|f| (*f).to_owned()).collect(),
            defaults: BTreeMap::new(),
        }
    }

    pub fn with_default(mut self, field: &str, value: &str) -> Self {
        self.defaults.insert(field.to_owned(), value.to_owned());
        self
    }

    pub fn default_for(&self, field: &str) -> &str {
        self.defaults.get(field).map(String::as_str).unwrap_or("")
    }

    /// Shadow column for `field`, as declared in the annotation registry when the
    /// table is annotated there, otherwise the conventional name.
    pub fn shadow_for(&self, field: &str, annotations: Option<&FieldAnnotationRegistry>) -> String {
        annotations
            .and_then(|reg| {
                reg.fields_for(&self.table_name)
                    .iter()
                    .find(|f| f.field() == field)
                    .map(|f| f.shadow().to_owned())
            })
            .unwrap_or_else(|| shadow_column(field))
    }

    fn validate(&self) -> Result<(), TablesError> {
        for ident in [&self.schema, &self.table_name, &self.id_column] {
            ensure_identifier(ident)?;
        }
        if self.fields.is_empty() {
            return Err(TablesError::NoFields(self.table_name.clone()));
        }
        for field in &self.fields {
            ensure_identifier(field)?;
        }
        if let Some(stray) = self.defaults.keys().find(|k| !self.fields.contains(k)) {
            return Err(TablesError::StrayDefault {
                table: self.table_name.clone(),
                field: stray.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TablesConfig {
    pub tables: Vec<TableSpec>,
}

impl TablesConfig {
    pub fn new(tables: Vec<TableSpec>) -> Result<Self, TablesError> {
        let cfg = Self { tables };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TablesError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TablesError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, TablesError> {
        let cfg: TablesConfig = match serde_yaml::from_str(text) {
            Ok(parsed) => parsed,
            Err(yaml_err) => serde_json::from_str(text)
                .map_err(|_| TablesError::Parse(yaml_err.to_string()))?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), TablesError> {
        self.tables.iter().try_for_each(TableSpec::validate)
    }
}

fn default_schema() -> String {
    "main".to_owned()
}

fn default_id_column() -> String {
    "id".to_owned()
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn ensure_identifier(ident: &str) -> Result<(), TablesError> {
    let mut chars = ident.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(TablesError::InvalidIdentifier(ident.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::EncryptableField;

    #[test]
    fn parses_yaml_with_defaults() {
        let cfg = TablesConfig::parse(
            r#"
tables:
  - table_name: users
    fields: [first_name, email]
    defaults:
      first_name: Default
"#,
        )
        .unwrap();
        let users = &cfg.tables[0];
        assert_eq!(users.schema, "main");
        assert_eq!(users.id_column, "id");
        assert_eq!(users.default_for("first_name"), "Default");
        assert_eq!(users.default_for("email"), "");
    }

    #[test]
    fn falls_back_to_json() {
        let cfg = TablesConfig::parse(
            r#"{"tables":[{"schema":"main","table_name":"payments","fields":["card_number","cvv"]}]}"#,
        )
        .unwrap();
        assert_eq!(cfg.tables[0].fields, ["card_number", "cvv"]);
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        let err = TablesConfig::parse(
            r#"
tables:
  - table_name: "users; DROP TABLE users"
    fields: [email]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, TablesError::InvalidIdentifier(_)));
    }

    #[test]
    fn rejects_stray_default_and_empty_fields() {
        let stray = TableSpec::new("users", &["email"]).with_default("ssn", "0");
        assert!(matches!(
            TablesConfig::new(vec![stray]),
            Err(TablesError::StrayDefault { .. })
        ));
        assert!(matches!(
            TablesConfig::new(vec![TableSpec::new("users", &[])]),
            Err(TablesError::NoFields(_))
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(TablesConfig::parse("tables: 12"), Err(TablesError::Parse(_))));
    }

    #[test]
    fn shadow_follows_annotations() {
        let reg = FieldAnnotationRegistry::builder()
            .field(EncryptableField::with_shadow("payments", "pan", "pan_kid"))
            .build()
            .unwrap();
        let spec = TableSpec::new("payments", &["pan", "cvv"]);
        assert_eq!(spec.shadow_for("pan", Some(&reg)), "pan_kid");
        assert_eq!(spec.shadow_for("cvv", Some(&reg)), "cvv_key_version");
        assert_eq!(spec.shadow_for("pan", None), "pan_key_version");
    }
}
