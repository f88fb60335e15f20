//! Pre-write interceptor that encrypts annotated fields before a row is persisted.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::annotations::FieldAnnotationRegistry;
use crate::codec::{FieldCodec, FieldOutcome};
use crate::entity::Entity;

/// Which write triggered the hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Insert,
    Update,
}

impl WriteOp {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteOp::Insert => "insert",
            WriteOp::Update => "update",
        }
    }
}

/// Per-write field tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookReport {
    /// Fields replaced by an envelope during this call.
    pub encrypted: usize,
    /// Fields skipped because their shadow column was already set.
    pub already_encrypted: usize,
    /// Fields skipped because the value was null.
    pub null: usize,
    /// Fields left as plaintext (empty value or fail-open codec failure).
    pub left_plaintext: usize,
    /// Fields the entity refused to update.
    pub failed: usize,
}

/// Encrypts every annotated field of an entity about to be inserted or updated.
#[derive(Debug, Clone)]
pub struct PersistenceHook {
    annotations: Arc<FieldAnnotationRegistry>,
    codec: Arc<FieldCodec>,
}

impl PersistenceHook {
    pub fn new(annotations: Arc<FieldAnnotationRegistry>, codec: Arc<FieldCodec>) -> Self {
        Self { annotations, codec }
    }

    pub fn codec(&self) -> &FieldCodec {
        &self.codec
    }

    pub fn before_insert(&self, entity: &mut dyn Entity) -> HookReport {
        self.before_write(entity, WriteOp::Insert)
    }

    pub fn before_update(&self, entity: &mut dyn Entity) -> HookReport {
        self.before_write(entity, WriteOp::Update)
    }

    pub fn before_write(&self, entity: &mut dyn Entity, op: WriteOp) -> HookReport {
        let report = self.encrypt_entity(entity);
        if report.encrypted > 0 || report.failed > 0 {
            debug!(
                op = op.as_str(),
                kind = entity.kind(),
                encrypted = report.encrypted,
                skipped = report.already_encrypted,
                failed = report.failed,
                "pre-write encryption"
            );
        }
        report
    }

    /// Encrypt each annotated field in registration order.
    ///
    /// A field whose shadow column is already set is left alone, which makes the
    /// hook idempotent across repeated saves of the same entity. A failure on one
    /// field never prevents the others from being processed, and never aborts the
    /// write.
    pub fn encrypt_entity(&self, entity: &mut dyn Entity) -> HookReport {
        let mut report = HookReport::default();
        if !self.codec.is_enabled() {
            return report;
        }

        let kind = entity.kind().to_owned();
        for field in self.annotations.fields_for(&kind) {
            if entity.get(field.shadow()).is_some_and(|v| !v.is_empty()) {
                report.already_encrypted += 1;
                continue;
            }
            match self.codec.encrypt_field(entity, field) {
                Ok(FieldOutcome::Encrypted) => report.encrypted += 1,
                Ok(FieldOutcome::Null) => report.null += 1,
                Ok(FieldOutcome::Plaintext) => report.left_plaintext += 1,
                Err(e) => {
                    warn!(kind = %kind, field = field.field(), error = %e, "field left unencrypted");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{Annotated, EncryptableField};
    use crate::engine::AesGcmSivEngine;
    use crate::entity::{EntityError, Record};
    use crate::keys::{KeyRecord, KeyRegistry, KeyStatus};

    struct Customer;

    impl Annotated for Customer {
        const KIND: &'static str = "customers";
        const ENCRYPTED_FIELDS: &'static [&'static str] = &["first_name", "email"];
    }

    /// Entity that rejects writes to one column.
    struct Stubborn {
        inner: Record,
        locked: &'static str,
    }

    impl Entity for Stubborn {
        fn kind(&self) -> &str {
            self.inner.kind()
        }

        fn get(&self, column: &str) -> Option<&str> {
            self.inner.get(column)
        }

        fn set(&mut self, column: &str, value: Option<String>) -> Result<(), EntityError> {
            if column == self.locked {
                return Err(EntityError::UnknownColumn {
                    kind: "customers".into(),
                    column: column.into(),
                });
            }
            self.inner.set(column, value)
        }
    }

    fn hook(enabled: bool) -> PersistenceHook {
        let keys = KeyRegistry::load(vec![KeyRecord::new("k1", 1, vec![3u8; 32], KeyStatus::Active)]).unwrap();
        let codec = FieldCodec::new(enabled, Arc::new(keys), Arc::new(AesGcmSivEngine::new()));
        let annotations = FieldAnnotationRegistry::builder().entity::<Customer>().build().unwrap();
        PersistenceHook::new(Arc::new(annotations), Arc::new(codec))
    }

    fn customer() -> Record {
        Record::new("customers")
            .with("first_name", Some("Alice"))
            .with("email", Some("alice@example.com"))
            .with("nickname", Some("al"))
    }

    #[test]
    fn insert_encrypts_all_annotated_fields() {
        let hook = hook(true);
        let mut c = customer();
        let report = hook.before_insert(&mut c);

        assert_eq!(report.encrypted, 2);
        assert_eq!(c.get("first_name_key_version"), Some("k1"));
        assert_eq!(c.get("email_key_version"), Some("k1"));
        assert_eq!(c.get("nickname"), Some("al"));
        assert_eq!(hook.codec().decrypt(c.get("email").unwrap(), Some("k1")), "alice@example.com");
    }

    #[test]
    fn second_save_does_not_double_encrypt() {
        let hook = hook(true);
        let mut c = customer();
        hook.before_insert(&mut c);
        let first = c.clone();

        let report = hook.before_update(&mut c);
        assert_eq!(report.encrypted, 0);
        assert_eq!(report.already_encrypted, 2);
        assert_eq!(c, first);
    }

    #[test]
    fn null_fields_are_skipped() {
        let hook = hook(true);
        let mut c = Record::new("customers").with("first_name", None).with("email", Some("a@b.c"));
        let report = hook.before_insert(&mut c);

        assert_eq!(report.null, 1);
        assert_eq!(report.encrypted, 1);
        assert_eq!(c.get("first_name"), None);
        assert_eq!(c.get("first_name_key_version"), None);
    }

    #[test]
    fn failing_field_does_not_block_others() {
        let hook = hook(true);
        let mut c = Stubborn {
            inner: customer(),
            locked: "first_name_key_version",
        };
        let report = hook.before_insert(&mut c);

        assert_eq!(report.failed, 1);
        assert_eq!(report.encrypted, 1);
        assert_eq!(c.get("first_name"), Some("Alice"));
        assert_eq!(c.get("email_key_version"), Some("k1"));
    }

    #[test]
    fn rejected_value_write_rolls_back_stamp() {
        let hook = hook(true);
        let mut c = Stubborn {
            inner: customer(),
            locked: "email",
        };
        let report = hook.before_insert(&mut c);

        assert_eq!(report.failed, 1);
        assert_eq!(c.get("email"), Some("alice@example.com"));
        assert_eq!(c.get("email_key_version"), None);
    }

    #[test]
    fn disabled_codec_is_noop() {
        let hook = hook(false);
        let mut c = customer();
        let report = hook.before_insert(&mut c);

        assert_eq!(report, HookReport::default());
        assert_eq!(c, customer());
    }

    #[test]
    fn unannotated_kind_untouched() {
        let hook = hook(true);
        let mut r = Record::new("orders").with("email", Some("x@y.z"));
        let report = hook.before_write(&mut r, WriteOp::Insert);
        assert_eq!(report, HookReport::default());
        assert_eq!(r.get("email"), Some("x@y.z"));
    }

    #[test]
    fn explicit_descriptor_is_honoured() {
        let keys = KeyRegistry::load(vec![KeyRecord::new("k1", 1, vec![3u8; 32], KeyStatus::Active)]).unwrap();
        let codec = FieldCodec::new(true, Arc::new(keys), Arc::new(AesGcmSivEngine::new()));
        let annotations = FieldAnnotationRegistry::builder()
            .field(EncryptableField::with_shadow("payments", "pan", "pan_kid"))
            .build()
            .unwrap();
        let hook = PersistenceHook::new(Arc::new(annotations), Arc::new(codec));

        let mut p = Record::new("payments").with("pan", Some("4111111111111111"));
        hook.before_insert(&mut p);
        assert_eq!(p.get("pan_kid"), Some("k1"));
    }
}
