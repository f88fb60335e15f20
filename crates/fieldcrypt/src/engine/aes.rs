//! AES-256-GCM-SIV implementation of [`CipherEngine`].
//!
//! **Algorithm choice:** AES-256-GCM-SIV (RFC 8452) is nonce-misuse-resistant.
//! A fresh random 96-bit nonce is still drawn for every call.
//!
//! **Do NOT substitute plain AES-256-GCM with a fixed nonce.** GCM nonce reuse
//! breaks both confidentiality and authentication.
//!
//! # Output framing
//!
//! ```text
//! key_version (u32, big endian) || nonce (12 bytes) || ciphertext + tag (16 bytes)
//! ```

use aes_gcm_siv::{
    aead::{Aead, KeyInit, OsRng},
    Aes256GcmSiv, Nonce,
};

use super::{CipherEngine, EngineError};

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the authentication tag.
pub const TAG_LEN: usize = 16;

/// Byte length of the key-version header.
pub const VERSION_LEN: usize = 4;

const HEADER_LEN: usize = VERSION_LEN + NONCE_LEN;

/// Native, reentrant AES-256-GCM-SIV engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmSivEngine;

impl AesGcmSivEngine {
    pub fn new() -> Self {
        Self
    }

    /// Read the key version recorded in a framed ciphertext.
    pub fn key_version(ciphertext: &[u8]) -> Option<u32> {
        let header: [u8; VERSION_LEN] = ciphertext.get(..VERSION_LEN)?.try_into().ok()?;
        Some(u32::from_be_bytes(header))
    }
}

impl CipherEngine for AesGcmSivEngine {
    fn key_len(&self) -> usize {
        KEY_LEN
    }

    fn min_ciphertext_len(&self) -> usize {
        HEADER_LEN + TAG_LEN
    }

    fn encrypt(&self, key_version: u32, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, EngineError> {
        let cipher = build_cipher(key)?;

        use aes_gcm_siv::aead::rand_core::RngCore;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| EngineError::AeadFailure)?;

        let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
        out.extend_from_slice(&key_version.to_be_bytes());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, EngineError> {
        let cipher = build_cipher(key)?;
        if ciphertext.len() < self.min_ciphertext_len() {
            return Err(EngineError::Truncated(ciphertext.len()));
        }
        let nonce = Nonce::from_slice(&ciphertext[VERSION_LEN..HEADER_LEN]);
        cipher
            .decrypt(nonce, &ciphertext[HEADER_LEN..])
            .map_err(|_| EngineError::AeadFailure)
    }
}

fn build_cipher(key: &[u8]) -> Result<Aes256GcmSiv, EngineError> {
    let invalid = EngineError::InvalidKeyLength {
        expected: KEY_LEN,
        actual: key.len(),
    };
    if key.len() != KEY_LEN {
        return Err(invalid);
    }
    Aes256GcmSiv::new_from_slice(key).map_err(|_| invalid)
}
