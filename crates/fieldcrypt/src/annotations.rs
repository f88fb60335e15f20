//! Static registry of encryptable fields, keyed by entity kind.
//!
//! Entity types declare their protected fields once through [`Annotated`]; the
//! binary collects them into a [`FieldAnnotationRegistry`] at startup. The
//! registry is immutable afterwards and shared read-only.
//!
//! # Module invariants
//!
//! - **No crypto dependencies.** This module must not import anything from
//!   `crate::codec`, `crate::engine` or `crate::keys`.

use std::collections::HashMap;

use thiserror::Error;

/// Suffix of the shadow column that records which key encrypted a field.
pub const SHADOW_SUFFIX: &str = "_key_version";

/// Errors from building the registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnnotationError {
    /// The same field was registered twice for one kind.
    #[error("field {field} registered twice for {kind}")]
    DuplicateField { kind: String, field: String },
}

/// One protected column and its shadow version column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncryptableField {
    entity_kind: String,
    field: String,
    shadow: String,
}

impl EncryptableField {
    /// Descriptor with the conventional `<field>_key_version` shadow column.
    pub fn new(entity_kind: impl Into<String>, field: impl Into<String>) -> Self {
        let field = field.into();
        let shadow = shadow_column(&field);
        Self {
            entity_kind: entity_kind.into(),
            field,
            shadow,
        }
    }

    /// Descriptor with an explicitly named shadow column.
    pub fn with_shadow(
        entity_kind: impl Into<String>,
        field: impl Into<String>,
        shadow: impl Into<String>,
    ) -> Self {
        Self {
            entity_kind: entity_kind.into(),
            field: field.into(),
            shadow: shadow.into(),
        }
    }

    pub fn entity_kind(&self) -> &str {
        &self.entity_kind
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn shadow(&self) -> &str {
        &self.shadow
    }
}

/// Conventional shadow column name for `field`.
pub fn shadow_column(field: &str) -> String {
    format!("{field}{SHADOW_SUFFIX}")
}

/// Implemented by entity types that carry encryptable fields.
pub trait Annotated {
    /// Entity kind, matching [`crate::Entity::kind`].
    const KIND: &'static str;

    /// Names of the protected fields, in write order.
    const ENCRYPTED_FIELDS: &'static [&'static str];

    /// Descriptors for every protected field.
    fn encryptable_fields() -> Vec<EncryptableField> {
        Self::ENCRYPTED_FIELDS
            .iter()
            .map(|f| EncryptableField::new(Self::KIND, *f))
            .collect()
    }
}

/// Immutable kind → ordered field descriptors table.
#[derive(Debug, Clone, Default)]
pub struct FieldAnnotationRegistry {
    by_kind: HashMap<String, Vec<EncryptableField>>,
}

impl FieldAnnotationRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Protected fields for `kind`, in registration order. Empty for unknown kinds.
    pub fn fields_for(&self, kind: &str) -> &[EncryptableField] {
        self.by_kind.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of kinds with at least one protected field.
    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

/// Collects descriptors before freezing them into a [`FieldAnnotationRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    fields: Vec<EncryptableField>,
}

impl RegistryBuilder {
    /// Register every protected field of `E`.
    pub fn entity<E: Annotated>(mut self) -> Self {
        self.fields.extend(E::encryptable_fields());
        self
    }

    /// Register a single descriptor.
    pub fn field(mut self, field: EncryptableField) -> Self {
        self.fields.push(field);
        self
    }

    /// Freeze the registry.
    ///
    /// # Errors
    ///
    /// Returns [`AnnotationError::DuplicateField`] if a (kind, field) pair was
    /// registered more than once.
    pub fn build(self) -> Result<FieldAnnotationRegistry, AnnotationError> {
        let mut by_kind: HashMap<String, Vec<EncryptableField>> = HashMap::new();
        for field in self.fields {
            let list = by_kind.entry(field.entity_kind.clone()).or_default();
            if list.iter().any(|f| f.field == field.field) {
                return Err(AnnotationError::DuplicateField {
                    kind: field.entity_kind,
                    field: field.field,
                });
            }
            list.push(field);
        }
        Ok(FieldAnnotationRegistry { by_kind })
    }
}
