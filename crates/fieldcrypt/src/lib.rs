//! Versioned, field-level encryption for relational rows.
//!
//! # Components
//!
//! - [`keys`]: [`KeyRegistry`], every known key record, exactly one active.
//! - [`engine`]: [`CipherEngine`], the cipher boundary (owned byte buffers in and out).
//! - [`codec`]: [`FieldCodec`], plaintext ⇄ base64url ciphertext envelope, fail-open.
//! - [`annotations`]: [`FieldAnnotationRegistry`], which fields of which entity kinds
//!   are encryptable, declared once at startup.
//! - [`hook`]: [`PersistenceHook`], pre-insert / pre-update interceptor.
//! - [`backfill`]: [`BackfillCoordinator`], bulk encryption of legacy rows and key rotation.
//! - [`store`]: shared SQLite handle and the row-level SQL used by the coordinator.
//!
//! # Invariants
//!
//! - A protected value is ciphertext **iff** its shadow `<field>_key_version` column is
//!   non-null. The codec and hook only ever write the pair together.
//! - Decryption always uses the key id stored next to the value, never the active key.
//! - Plaintext and key material are never logged.

pub mod annotations;
pub mod backfill;
pub mod codec;
pub mod engine;
pub mod entity;
pub mod hook;
pub mod keys;
pub mod store;

pub use annotations::{Annotated, EncryptableField, FieldAnnotationRegistry};
pub use backfill::{
    BackfillCoordinator, BackfillError, BackfillOptions, BackfillReport, ResetConfirmation, ResetReport, TableSpec,
    TablesConfig, TablesError,
};
pub use codec::{CodecError, FieldCodec, FieldOutcome, Sealed};
pub use engine::{AesGcmSivEngine, CipherEngine, EngineError};
pub use entity::{Entity, EntityError, Record};
pub use hook::{HookReport, PersistenceHook, WriteOp};
pub use keys::{KeyConfig, KeyError, KeyRecord, KeyRegistry, KeyStatus};
pub use store::{Database, StoreError};
