//! Credential Stores
//!
//! `EnvCredentialStore` serves credentials read from the environment at
//! boot. `MemoryCredentialStore` keeps credentials supplied at runtime
//! (through `POST /gateway/start`) and falls back to another store.
//! Neither ever writes credentials to disk.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::application::ports::{CredentialStore, Credentials, CredentialsError};

/// Credentials taken from `GATEWAY_USERNAME` / `GATEWAY_PASSWORD` / `GATEWAY_ACCOUNT`.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialStore {
    credentials: Option<Credentials>,
}

impl EnvCredentialStore {
    /// Create a store from already-loaded credentials.
    #[must_use]
    pub const fn new(credentials: Option<Credentials>) -> Self {
        Self { credentials }
    }
}

impl CredentialStore for EnvCredentialStore {
    fn get_credentials(&self) -> Result<Credentials, CredentialsError> {
        self.credentials.clone().ok_or(CredentialsError::Missing)
    }
}

/// In-memory credentials with an optional fallback store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    current: RwLock<Option<Credentials>>,
    fallback: Option<Arc<dyn CredentialStore>>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that consults `fallback` until credentials are remembered.
    #[must_use]
    pub fn with_fallback(fallback: Arc<dyn CredentialStore>) -> Self {
        Self {
            current: RwLock::new(None),
            fallback: Some(fallback),
        }
    }

    /// Forget remembered credentials.
    pub fn clear(&self) {
        *self.current.write() = None;
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get_credentials(&self) -> Result<Credentials, CredentialsError> {
        if let Some(credentials) = self.current.read().clone() {
            return Ok(credentials);
        }
        self.fallback
            .as_ref()
            .map_or(Err(CredentialsError::Missing), |store| {
                store.get_credentials()
            })
    }

    fn remember(&self, credentials: Credentials) {
        tracing::info!(account = credentials.account().unwrap_or("-"), "Gateway credentials updated");
        *self.current.write() = Some(credentials);
    }
}
