//! Handle-based engine modules and their safe adapter.
//!
//! An externally loaded engine (e.g. a sandboxed module with its own linear memory)
//! exposes a small protocol:
//!
//! 1. `allocate(size)` reserves a buffer inside the module and returns a handle.
//! 2. The host copies key and input bytes into those buffers.
//! 3. `encrypt` / `decrypt` return a result handle, or none on failure.
//! 4. `last_result_length()` gives the size of the most recent result, which the
//!    host reads back together with the result handle.
//!
//! [`ModuleEngine`] drives that protocol behind the [`CipherEngine`] trait. Handles
//! are opaque and never leave this module; every buffer allocated for a call is
//! released before the call returns. Because the last-result length is
//! module-global state, calls are serialised through a mutex.

use std::collections::HashMap;
use std::num::NonZeroU32;

use parking_lot::Mutex;

use super::{CipherEngine, EngineError};

/// Opaque reference to a buffer owned by an [`EngineModule`]. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(NonZeroU32);

impl Handle {
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// The raw protocol of a handle-based cipher module.
pub trait EngineModule: Send {
    /// Exact key length the module expects.
    fn key_len(&self) -> usize;

    /// Smallest ciphertext the module can produce.
    fn min_ciphertext_len(&self) -> usize;

    /// Reserve a zeroed buffer of `size` bytes.
    fn allocate(&mut self, size: usize) -> Handle;

    /// Copy `bytes` into the buffer behind `handle`. Returns `false` if the handle
    /// is unknown or the buffer is too small.
    fn write(&mut self, handle: Handle, bytes: &[u8]) -> bool;

    /// Encrypt the plaintext buffer with the key buffer. `None` on failure.
    fn encrypt(&mut self, key_version: u32, key: Handle, plaintext: Handle) -> Option<Handle>;

    /// Decrypt the ciphertext buffer with the key buffer. `None` on failure.
    fn decrypt(&mut self, key: Handle, ciphertext: Handle) -> Option<Handle>;

    /// Length of the result returned by the most recent successful call.
    fn last_result_length(&self) -> usize;

    /// Copy `len` bytes out of the buffer behind `handle`.
    fn read(&self, handle: Handle, len: usize) -> Option<Vec<u8>>;

    /// Free a buffer. Unknown handles are ignored.
    fn release(&mut self, handle: Handle);
}

/// Safe [`CipherEngine`] over any [`EngineModule`].
pub struct ModuleEngine<M> {
    module: Mutex<M>,
}

impl<M: EngineModule> ModuleEngine<M> {
    pub fn new(module: M) -> Self {
        Self {
            module: Mutex::new(module),
        }
    }

    /// Run one module call with `key` and `input` staged in module buffers.
    fn call<F>(&self, key: &[u8], input: &[u8], op: F) -> Result<Vec<u8>, EngineError>
    where
        F: FnOnce(&mut M, Handle, Handle) -> Option<Handle>,
    {
        let mut module = self.module.lock();

        let key_handle = module.allocate(key.len());
        let input_handle = module.allocate(input.len());
        let staged = module.write(key_handle, key) && module.write(input_handle, input);

        let result = if staged {
            match op(&mut *module, key_handle, input_handle) {
                Some(out) => {
                    let len = module.last_result_length();
                    let bytes = module.read(out, len);
                    module.release(out);
                    bytes.ok_or(EngineError::NoResult)
                }
                None => Err(EngineError::NoResult),
            }
        } else {
            Err(EngineError::NoResult)
        };

        module.release(key_handle);
        module.release(input_handle);
        result
    }
}

impl<M: EngineModule> CipherEngine for ModuleEngine<M> {
    fn key_len(&self) -> usize {
        self.module.lock().key_len()
    }

    fn min_ciphertext_len(&self) -> usize {
        self.module.lock().min_ciphertext_len()
    }

    fn encrypt(&self, key_version: u32, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, EngineError> {
        self.call(key, plaintext, |m, k, p| m.encrypt(key_version, k, p))
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, EngineError> {
        self.call(key, ciphertext, |m, k, c| m.decrypt(k, c))
    }
}

impl<M> std::fmt::Debug for ModuleEngine<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ModuleEngine")
    }
}

/// In-process [`EngineModule`] that keeps buffers in an arena and delegates the
/// cryptography to a native [`CipherEngine`].
///
/// Useful for hosting a native engine behind the module protocol and for
/// exercising [`ModuleEngine`] without a foreign runtime.
pub struct ArenaModule<E> {
    inner: E,
    buffers: HashMap<u32, Vec<u8>>,
    next: u32,
    last_len: usize,
}

impl<E: CipherEngine> ArenaModule<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            buffers: HashMap::new(),
            next: 0,
            last_len: 0,
        }
    }

    /// Number of buffers currently allocated.
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    fn store(&mut self, bytes: Vec<u8>) -> Handle {
        let handle = self.next_handle();
        self.last_len = bytes.len();
        self.buffers.insert(handle.get(), bytes);
        handle
    }

    fn next_handle(&mut self) -> Handle {
        loop {
            self.next = self.next.wrapping_add(1);
            if let Some(id) = NonZeroU32::new(self.next) {
                if !self.buffers.contains_key(&id.get()) {
                    return Handle(id);
                }
            }
        }
    }

    fn buffer(&self, handle: Handle) -> Option<&[u8]> {
        self.buffers.get(&handle.get()).map(Vec::as_slice)
    }
}

impl<E: CipherEngine> EngineModule for ArenaModule<E> {
    fn key_len(&self) -> usize {
        self.inner.key_len()
    }

    fn min_ciphertext_len(&self) -> usize {
        self.inner.min_ciphertext_len()
    }

    fn allocate(&mut self, size: usize) -> Handle {
        let handle = self.next_handle();
        self.buffers.insert(handle.get(), vec![0u8; size]);
        handle
    }

    fn write(&mut self, handle: Handle, bytes: &[u8]) -> bool {
        match self.buffers.get_mut(&handle.get()) {
            Some(buf) if buf.len() >= bytes.len() => {
                buf[..bytes.len()].copy_from_slice(bytes);
                true
            }
            _ => false,
        }
    }

    fn encrypt(&mut self, key_version: u32, key: Handle, plaintext: Handle) -> Option<Handle> {
        let out = self
            .inner
            .encrypt(key_version, self.buffer(key)?, self.buffer(plaintext)?)
            .ok()?;
        Some(self.store(out))
    }

    fn decrypt(&mut self, key: Handle, ciphertext: Handle) -> Option<Handle> {
        let out = self
            .inner
            .decrypt(self.buffer(key)?, self.buffer(ciphertext)?)
            .ok()?;
        Some(self.store(out))
    }

    fn last_result_length(&self) -> usize {
        self.last_len
    }

    fn read(&self, handle: Handle, len: usize) -> Option<Vec<u8>> {
        self.buffer(handle)?.get(..len).map(<[u8]>::to_vec)
    }

    fn release(&mut self, handle: Handle) {
        if let Some(mut buf) = self.buffers.remove(&handle.get()) {
            buf.iter_mut().for_each(|b| *b = 0);
        }
    }
}
