//! Backend credentials and secret references.

use std::collections::HashMap;

use thiserror::Error;

/// Secret data key holding the backend user name.
pub const USER_ID_KEY: &str = "userID";

/// Secret data key holding the backend user key.
pub const USER_KEY_KEY: &str = "userKey";

/// Errors raised when building credentials from secret data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialsError {
    /// A required key is missing or empty in the secret data.
    #[error("missing {0} in secret data")]
    MissingKey(&'static str),
}

/// Credentials used to connect to the storage cluster.
///
/// The values are wiped when the credentials go out of scope, so callers
/// hold them only for the duration of one operation.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    id: String,
    key: String,
}

impl Credentials {
    /// Creates credentials from a user ID and key.
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
        }
    }

    /// Builds credentials from secret data.
    ///
    /// Both `userID` and `userKey` must be present and non-empty.
    pub fn from_secret_data(data: &HashMap<String, String>) -> Result<Self, CredentialsError> {
        let id = data
            .get(USER_ID_KEY)
            .filter(|v| !v.is_empty())
            .ok_or(CredentialsError::MissingKey(USER_ID_KEY))?;
        let key = data
            .get(USER_KEY_KEY)
            .filter(|v| !v.is_empty())
            .ok_or(CredentialsError::MissingKey(USER_KEY_KEY))?;
        Ok(Self::new(id.clone(), key.clone()))
    }

    /// Returns the user ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the user key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("id", &self.id)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        // Overwrite the key bytes before the allocation is released.
        let mut key = std::mem::take(&mut self.key).into_bytes();
        key.fill(0);
        self.id.clear();
    }
}

/// Reference to the secret holding credentials for an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretRef {
    /// Secret name.
    pub name: String,
    /// Namespace the secret lives in.
    pub namespace: String,
}

impl SecretRef {
    /// Creates a secret reference when both parts are present.
    ///
    /// An empty name or namespace means "not configured" and yields `None`.
    pub fn from_parts(name: Option<&str>, namespace: Option<&str>) -> Option<Self> {
        match (name, namespace) {
            (Some(name), Some(namespace)) if !name.is_empty() && !namespace.is_empty() => {
                Some(Self {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                })
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for SecretRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
