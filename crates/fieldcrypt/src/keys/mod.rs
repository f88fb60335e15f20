//! Key records, key configuration parsing, and the [`KeyRegistry`].
//!
//! # Lifecycle
//!
//! 1. At startup the binary reads `ENCRYPTION_KEYS` (a JSON array of [`KeyConfig`]).
//! 2. [`parse_key_configs`] decodes the base64 key material into [`KeyRecord`]s.
//! 3. [`KeyRegistry::load`] checks that exactly one record is active and indexes by id.
//! 4. The registry is immutable afterwards; a new active key needs a restart.
//!
//! Retired keys stay loaded so rows stamped with them can still be decrypted and
//! rotated.

pub mod registry;

pub use registry::{KeyError, KeyMaterial, KeyRecord, KeyRegistry};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Whether a key may be used for new encryptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    /// The single key used for every new encryption.
    Active,
    /// Kept for decrypting rows that still reference it.
    Retired,
}

/// One entry of the `ENCRYPTION_KEYS` configuration array.
///
/// ```json
/// {"keyId": "k1", "version": 1, "key": "<base64>", "status": "active"}
/// ```
#[derive(Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyConfig {
    pub key_id: String,
    pub version: u32,
    /// Standard (padded) base64 of the raw key bytes.
    pub key: String,
    pub status: KeyStatus,
}

impl std::fmt::Debug for KeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyConfig")
            .field("key_id", &self.key_id)
            .field("version", &self.version)
            .field("key", &"[REDACTED]")
            .field("status", &self.status)
            .finish()
    }
}

/// Parse a JSON array of [`KeyConfig`] entries and decode their key material.
///
/// Key length is deliberately not checked here; the codec refuses to use a key
/// whose length does not match the engine.
///
/// # Errors
///
/// Returns [`KeyError::InvalidConfig`] if the JSON is malformed or a key is not
/// valid base64.
pub fn parse_key_configs(json: &str) -> Result<Vec<KeyRecord>, KeyError> {
    let configs: Vec<KeyConfig> = serde_json::from_str(json)
        .map_err(|e| KeyError::InvalidConfig(format!("ENCRYPTION_KEYS is not a valid key list: {e}")))?;

    configs
        .into_iter()
        .map(|c| {
            let material = STANDARD.decode(c.key.trim()).map_err(|_| {
                KeyError::InvalidConfig(format!("key {} is not valid base64", c.key_id))
            })?;
            Ok(KeyRecord::new(c.key_id, c.version, material, c.status))
        })
        .collect()
}

/// Parse `ENCRYPTION_KEYS` and load the registry in one step.
///
/// # Errors
///
/// Any [`parse_key_configs`] or [`KeyRegistry::load`] error.
pub fn registry_from_json(json: &str) -> Result<KeyRegistry, KeyError> {
    KeyRegistry::load(parse_key_configs(json)?)
}
