//! [`KeyRegistry`]: immutable index of every configured key record.

use std::collections::HashMap;

use thiserror::Error;

use super::KeyStatus;

/// Errors produced by the key layer.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The key configuration did not contain exactly one active key.
    #[error("expected exactly one active key, found {0}")]
    ActiveKeyCount(usize),

    /// Two records share the same key id.
    #[error("duplicate key id: {0}")]
    DuplicateKeyId(String),

    /// The key configuration could not be parsed.
    #[error("invalid key configuration: {0}")]
    InvalidConfig(String),

    /// No record has the requested key id.
    #[error("key not found: {0}")]
    KeyNotFound(String),
}

/// Raw key bytes.
///
/// The length is not constrained here; the codec checks it against the engine's
/// key size before every use. Dropping the value overwrites the bytes with zeroes.
#[derive(Clone)]
pub struct KeyMaterial(Box<[u8]>);

impl KeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes.into_boxed_slice())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial([REDACTED])")
    }
}

/// A single configured key.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    key_id: String,
    version: u32,
    material: KeyMaterial,
    status: KeyStatus,
}

impl KeyRecord {
    pub fn new(key_id: impl Into<String>, version: u32, material: Vec<u8>, status: KeyStatus) -> Self {
        Self {
            key_id: key_id.into(),
            version,
            material: KeyMaterial::new(material),
            status,
        }
    }

    /// Identifier written to shadow columns.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Version number handed to the cipher engine.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    pub fn status(&self) -> KeyStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }
}

/// Every known key record, indexed by id, with exactly one active record.
///
/// Built once at startup and shared read-only (usually behind an `Arc`) by the
/// codec, so concurrent readers never contend.
#[derive(Debug)]
pub struct KeyRegistry {
    records: Vec<KeyRecord>,
    by_id: HashMap<String, usize>,
    active: usize,
}

impl KeyRegistry {
    /// Validate and index `records`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::ActiveKeyCount`] unless exactly one record is active and
    /// [`KeyError::DuplicateKeyId`] if two records share an id.
    pub fn load(records: Vec<KeyRecord>) -> Result<Self, KeyError> {
        let active: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_active())
            .map(|(i, _)| i)
            .collect();
        if active.len() != 1 {
            return Err(KeyError::ActiveKeyCount(active.len()));
        }

        let mut by_id = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            if by_id.insert(record.key_id.clone(), i).is_some() {
                return Err(KeyError::DuplicateKeyId(record.key_id.clone()));
            }
        }

        Ok(Self {
            records,
            by_id,
            active: active[0],
        })
    }

    /// The record used for all new encryptions.
    pub fn active(&self) -> &KeyRecord {
        &self.records[self.active]
    }

    /// Look up a record by the id stored in a shadow column.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::KeyNotFound`] if no record has `key_id`.
    pub fn lookup(&self, key_id: &str) -> Result<&KeyRecord, KeyError> {
        self.by_id
            .get(key_id)
            .map(|&i| &self.records[i])
            .ok_or_else(|| KeyError::KeyNotFound(key_id.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &KeyRecord> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, version: u32, status: KeyStatus) -> KeyRecord {
        KeyRecord::new(id, version, vec![version as u8; 32], status)
    }

    #[test]
    fn load_single_active() {
        let reg = KeyRegistry::load(vec![record("k1", 1, KeyStatus::Active)]).unwrap();
        assert_eq!(reg.active().key_id(), "k1");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn active_is_found_among_retired() {
        let reg = KeyRegistry::load(vec![
            record("k1", 1, KeyStatus::Retired),
            record("k2", 2, KeyStatus::Active),
            record("k0", 0, KeyStatus::Retired),
        ])
        .unwrap();
        assert_eq!(reg.active().key_id(), "k2");
        assert_eq!(reg.active().version(), 2);
        assert_eq!(reg.lookup("k1").unwrap().version(), 1);
    }

    #[test]
    fn rejects_no_active_key() {
        let err = KeyRegistry::load(vec![record("k1", 1, KeyStatus::Retired)]).unwrap_err();
        assert!(matches!(err, KeyError::ActiveKeyCount(0)));
    }

    #[test]
    fn rejects_two_active_keys() {
        let err = KeyRegistry::load(vec![
            record("k1", 1, KeyStatus::Active),
            record("k2", 2, KeyStatus::Active),
        ])
        .unwrap_err();
        assert!(matches!(err, KeyError::ActiveKeyCount(2)));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = KeyRegistry::load(vec![
            record("k1", 1, KeyStatus::Active),
            record("k1", 2, KeyStatus::Retired),
        ])
        .unwrap_err();
        assert!(matches!(err, KeyError::DuplicateKeyId(ref id) if id == "k1"));
    }

    #[test]
    fn lookup_unknown_id() {
        let reg = KeyRegistry::load(vec![record("k1", 1, KeyStatus::Active)]).unwrap();
        let err = reg.lookup("nope").unwrap_err();
        assert!(matches!(err, KeyError::KeyNotFound(_)));
    }

    #[test]
    fn key_material_redacted_in_debug() {
        let rec = KeyRecord::new("k1", 1, vec![0xAB; 32], KeyStatus::Active);
        let dbg = format!("{rec:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("171"));
    }
}
