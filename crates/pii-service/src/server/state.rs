//! Shared application state injected into every Axum handler.

use fieldcrypt::FieldCodec;

use crate::repo::Repository;

/// Application state shared across all request handlers.
///
/// Cheap to clone: the repository holds `Arc`-backed handles.
#[derive(Clone)]
pub struct AppState {
    /// Row access; writes pass through the persistence hook.
    pub repo: Repository,
}

impl AppState {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Codec used for explicit decryption on the read path.
    pub fn codec(&self) -> &FieldCodec {
        self.repo.hook().codec()
    }
}

#[cfg(test)]
impl AppState {
    /// State over a fresh in-memory database with one active key `k1`.
    pub fn for_tests(encryption_enabled: bool) -> Self {
        Self::new(crate::repo::tests::repository(encryption_enabled))
    }
}
