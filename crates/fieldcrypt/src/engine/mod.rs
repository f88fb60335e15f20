//! The cipher engine boundary.
//!
//! This module is intentionally free of key-registry and storage dependencies.
//! It only turns `(key, plaintext)` into ciphertext bytes and back.
//!
//! Two shapes are supported:
//!
//! - [`CipherEngine`]: a safe trait over owned byte buffers. [`AesGcmSivEngine`]
//!   implements it natively and is reentrant.
//! - [`module::EngineModule`]: the handle-based protocol of an externally loaded
//!   engine (`allocate`, `encrypt`/`decrypt` returning a result handle, and a
//!   module-global last-result length). [`module::ModuleEngine`] adapts it to
//!   [`CipherEngine`] and serialises calls, since the last-result length is shared.

pub mod aes;
pub mod module;

pub use aes::AesGcmSivEngine;
pub use module::{ArenaModule, EngineModule, Handle, ModuleEngine};

use thiserror::Error;

/// Errors produced by a cipher engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The key does not have the length the engine requires.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// AEAD encryption or decryption failed (wrong key or tampered data).
    #[error("aead operation failed")]
    AeadFailure,

    /// The ciphertext is shorter than the engine's framing.
    #[error("ciphertext truncated: {0} bytes")]
    Truncated(usize),

    /// The engine returned no result.
    #[error("engine returned no result")]
    NoResult,
}

/// A symmetric cipher over owned byte buffers.
///
/// Implementations must be shareable across request handlers.
#[cfg_attr(test, mockall::automock)]
pub trait CipherEngine: Send + Sync {
    /// Exact key length in bytes.
    fn key_len(&self) -> usize;

    /// Smallest ciphertext the engine can produce (framing + tag, empty message).
    fn min_ciphertext_len(&self) -> usize;

    /// Encrypt `plaintext` under `key`, recording `key_version` in the output.
    fn encrypt(&self, key_version: u32, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, EngineError>;

    /// Decrypt bytes previously produced by [`CipherEngine::encrypt`].
    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, EngineError>;
}
