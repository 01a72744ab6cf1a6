//! Secret lookup for backend credentials.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::SecretRef;
use thiserror::Error;

/// Errors raised while fetching secrets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    /// The secret does not exist.
    #[error("secret {0} not found")]
    NotFound(String),

    /// The secret store could not be reached.
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

/// Fetches secret data by reference.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Returns the key/value data of `secret`.
    async fn secret_data(&self, secret: &SecretRef) -> Result<HashMap<String, String>, SecretError>;
}

#[derive(Debug, Default)]
struct SecretState {
    secrets: HashMap<SecretRef, HashMap<String, String>>,
    fetches: usize,
    fail_on_fetch: bool,
}

/// In-memory secret store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemorySecretProvider {
    state: Arc<RwLock<SecretState>>,
}

impl InMemorySecretProvider {
    /// Creates an empty secret store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a secret.
    pub fn insert(&self, secret: SecretRef, data: HashMap<String, String>) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .secrets
            .insert(secret, data);
    }

    /// Configures the store to fail every fetch.
    pub fn set_fail_on_fetch(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_fetch = fail;
    }

    /// Returns the number of fetches attempted.
    pub fn fetch_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .fetches
    }
}

#[async_trait]
impl SecretProvider for InMemorySecretProvider {
    async fn secret_data(&self, secret: &SecretRef) -> Result<HashMap<String, String>, SecretError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.fetches += 1;
        if state.fail_on_fetch {
            return Err(SecretError::Unavailable("injected failure".to_string()));
        }
        state
            .secrets
            .get(secret)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(secret.to_string()))
    }
}
