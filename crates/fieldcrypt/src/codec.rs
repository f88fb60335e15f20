//! [`FieldCodec`]: converts protected values between plaintext and the stored
//! cipher envelope.
//!
//! # Envelope format
//!
//! ```text
//! base64url-no-pad(engine output)
//! ```
//!
//! The key id travels separately, in the shadow column next to the value.
//!
//! # Failure policy
//!
//! [`FieldCodec::encrypt`] and [`FieldCodec::decrypt`] are fail-open: any key,
//! engine or decoding failure is logged and the input is returned unchanged.
//! The strict variants [`FieldCodec::try_encrypt`] and [`FieldCodec::try_decrypt`]
//! report the failure instead; bulk jobs use them so that a failed decrypt is never
//! mistaken for plaintext.
//!
//! # Envelope recognition
//!
//! A stored value is treated as an envelope only if every character is in the
//! base64url alphabet and it is at least as long as the encoding of the engine's
//! smallest possible ciphertext. Anything else is returned as plaintext.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use thiserror::Error;
use tracing::{debug, warn};

use crate::annotations::EncryptableField;
use crate::engine::{CipherEngine, EngineError};
use crate::entity::{Entity, EntityError};
use crate::keys::{KeyError, KeyRecord, KeyRegistry};

/// Why a value could not be encrypted or decrypted.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Encryption is switched off in configuration.
    #[error("encryption is disabled")]
    Disabled,

    /// Nothing to encrypt or decrypt.
    #[error("value is empty")]
    Empty,

    /// The stored value does not have the shape of an envelope.
    #[error("value is not a cipher envelope")]
    NotAnEnvelope,

    /// An envelope was supplied without the key id that produced it.
    #[error("missing key version for encrypted value")]
    MissingKeyVersion,

    /// The key id is not in the registry.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The key material does not fit the engine.
    #[error("key {key_id} has invalid length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        key_id: String,
        expected: usize,
        actual: usize,
    },

    /// The cipher engine rejected the call.
    #[error("cipher engine failure: {0}")]
    Engine(#[from] EngineError),

    /// The envelope is not valid base64url.
    #[error("malformed cipher envelope")]
    MalformedEnvelope,

    /// The decrypted bytes are not UTF-8 text.
    #[error("decrypted value is not valid UTF-8")]
    NotUtf8,
}

impl CodecError {
    /// `true` when the value is passed through by policy rather than by failure.
    pub fn is_passthrough(&self) -> bool {
        matches!(self, CodecError::Disabled | CodecError::Empty | CodecError::NotAnEnvelope)
    }
}

/// Result of encrypting a value: the string to store and, if it is ciphertext,
/// the key id for the shadow column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    value: String,
    key_id: Option<String>,
}

impl Sealed {
    fn encrypted(value: String, key_id: &str) -> Self {
        Self {
            value,
            key_id: Some(key_id.to_owned()),
        }
    }

    fn plain(value: &str) -> Self {
        Self {
            value: value.to_owned(),
            key_id: None,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    pub fn is_encrypted(&self) -> bool {
        self.key_id.is_some()
    }

    pub fn into_parts(self) -> (String, Option<String>) {
        (self.value, self.key_id)
    }
}

/// What [`FieldCodec::encrypt_field`] did to an entity column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOutcome {
    /// Value replaced by an envelope and the shadow column stamped.
    Encrypted,
    /// The column was null; nothing written.
    Null,
    /// The value was left as plaintext (disabled, empty, or a fail-open failure).
    Plaintext,
}

/// Encrypts and decrypts protected values with the registry's keys.
///
/// Holds no mutable state; share it behind an `Arc` across request handlers.
pub struct FieldCodec {
    enabled: bool,
    keys: Arc<KeyRegistry>,
    engine: Arc<dyn CipherEngine>,
}

impl FieldCodec {
    pub fn new(enabled: bool, keys: Arc<KeyRegistry>, engine: Arc<dyn CipherEngine>) -> Self {
        Self {
            enabled,
            keys,
            engine,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn keys(&self) -> &KeyRegistry {
        &self.keys
    }

    /// Id of the key used for new encryptions.
    pub fn active_key_id(&self) -> &str {
        self.keys.active().key_id()
    }

    /// Encrypt `plaintext` under the active key.
    ///
    /// # Errors
    ///
    /// [`CodecError::Disabled`] / [`CodecError::Empty`] for values that are passed
    /// through by policy, otherwise the key-length or engine failure.
    pub fn try_encrypt(&self, plaintext: &str) -> Result<Sealed, CodecError> {
        if !self.enabled {
            return Err(CodecError::Disabled);
        }
        if plaintext.is_empty() {
            return Err(CodecError::Empty);
        }

        let record = self.keys.active();
        let key = self.checked_key(record)?;
        let ciphertext = self.engine.encrypt(record.version(), key, plaintext.as_bytes())?;
        let envelope = URL_SAFE_NO_PAD.encode(ciphertext);

        debug!(key_id = record.key_id(), len = envelope.len(), "value encrypted");
        Ok(Sealed::encrypted(envelope, record.key_id()))
    }

    /// Fail-open encryption: on any failure the plaintext is returned unsealed.
    pub fn encrypt(&self, plaintext: &str) -> Sealed {
        match self.try_encrypt(plaintext) {
            Ok(sealed) => sealed,
            Err(e) => {
                if !e.is_passthrough() {
                    warn!(
                        key_id = self.active_key_id(),
                        error = %e,
                        "encryption failed; keeping plaintext"
                    );
                }
                Sealed::plain(plaintext)
            }
        }
    }

    /// Encrypt `field` of `entity` in place, stamping its shadow column.
    ///
    /// The shadow column is only written when the value is actually replaced by an
    /// envelope, so `(value encrypted) ⇔ (shadow non-null)` holds afterwards.
    ///
    /// # Errors
    ///
    /// Returns the [`EntityError`] of the first rejected column write. The entity is
    /// left as it was unless restoring the shadow column also fails, which is logged.
    pub fn encrypt_field(
        &self,
        entity: &mut dyn Entity,
        field: &EncryptableField,
    ) -> Result<FieldOutcome, EntityError> {
        let sealed = match entity.get(field.field()) {
            None => return Ok(FieldOutcome::Null),
            Some(value) => self.encrypt(value),
        };
        let (value, key_id) = sealed.into_parts();
        let Some(key_id) = key_id else {
            return Ok(FieldOutcome::Plaintext);
        };

        let previous_shadow = entity.get(field.shadow()).map(str::to_owned);
        entity.set(field.shadow(), Some(key_id))?;
        if let Err(e) = entity.set(field.field(), Some(value)) {
            // Undo the stamp so the pair stays consistent.
            if let Err(undo) = entity.set(field.shadow(), previous_shadow) {
                warn!(
                    kind = entity.kind(),
                    field = field.field(),
                    error = %undo,
                    "shadow column could not be restored; value and key version disagree"
                );
            }
            return Err(e);
        }
        Ok(FieldOutcome::Encrypted)
    }

    /// Decrypt `stored` with the key named by `key_id`.
    ///
    /// # Errors
    ///
    /// [`CodecError::Disabled`], [`CodecError::Empty`] or
    /// [`CodecError::NotAnEnvelope`] when the value is plaintext by policy,
    /// otherwise the lookup, key-length, decoding or engine failure.
    pub fn try_decrypt(&self, stored: &str, key_id: Option<&str>) -> Result<String, CodecError> {
        if !self.enabled {
            return Err(CodecError::Disabled);
        }
        if stored.is_empty() {
            return Err(CodecError::Empty);
        }
        if !self.looks_like_envelope(stored) {
            return Err(CodecError::NotAnEnvelope);
        }
        let key_id = key_id
            .filter(|k| !k.is_empty())
            .ok_or(CodecError::MissingKeyVersion)?;

        let record = self.keys.lookup(key_id)?;
        let key = self.checked_key(record)?;
        let ciphertext = URL_SAFE_NO_PAD
            .decode(stored)
            .map_err(|_| CodecError::MalformedEnvelope)?;
        let plaintext = self.engine.decrypt(key, &ciphertext)?;

        // Engines may pad their output with zero bytes; the plaintext domain is NUL-free.
        let end = plaintext.iter().position(|&b| b == 0).unwrap_or(plaintext.len());
        String::from_utf8(plaintext[..end].to_vec()).map_err(|_| CodecError::NotUtf8)
    }

    /// Fail-open decryption: on any failure the stored value is returned unchanged.
    pub fn decrypt(&self, stored: &str, key_id: Option<&str>) -> String {
        match self.try_decrypt(stored, key_id) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                if !e.is_passthrough() {
                    warn!(key_id = ?key_id, error = %e, "decryption failed; returning stored value");
                }
                stored.to_owned()
            }
        }
    }

    /// Whether `stored` has the shape of a cipher envelope.
    pub fn looks_like_envelope(&self, stored: &str) -> bool {
        stored.len() >= encoded_len(self.engine.min_ciphertext_len())
            && stored
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }

    fn checked_key<'a>(&self, record: &'a KeyRecord) -> Result<&'a [u8], CodecError> {
        let expected = self.engine.key_len();
        let material = record.material();
        if material.len() != expected {
            return Err(CodecError::InvalidKeyLength {
                key_id: record.key_id().to_owned(),
                expected,
                actual: material.len(),
            });
        }
        Ok(material.as_bytes())
    }
}

impl std::fmt::Debug for FieldCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCodec")
            .field("enabled", &self.enabled)
            .field("active_key_id", &self.active_key_id())
            .finish()
    }
}

/// Length of the unpadded base64 encoding of `n` bytes.
fn encoded_len(n: usize) -> usize {
    (n * 4 + 2) / 3
}
