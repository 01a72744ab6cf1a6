//! Provisioner error types.

use common::CredentialsError;
use identity::CodecError;
use journal::JournalError;
use thiserror::Error;

use crate::backend::BackendError;
use crate::resolver::ResolveError;

/// Errors that can occur while recovering identities or creating objects.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The handle could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Cluster or pool lookup failed.
    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Another operation holds the lock for this key; retry later.
    #[error("an operation on {key} is already in progress")]
    Busy { key: String },

    /// Credentials could not be obtained.
    #[error("credentials unavailable: {0}")]
    CredentialsUnavailable(String),

    /// Reservation journal error.
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    /// Storage backend error.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// An external call did not finish within its bounded wait.
    #[error("{operation} did not complete in time")]
    DeadlineExceeded { operation: &'static str },
}

impl ProvisionError {
    /// Returns true if the operation should simply be retried later.
    pub fn is_busy(&self) -> bool {
        matches!(self, ProvisionError::Busy { .. })
    }

    /// Returns true if the error reports an absent object or reservation.
    pub fn is_not_found(&self) -> bool {
        match self {
            ProvisionError::Journal(e) => e.is_not_found(),
            ProvisionError::Backend(e) => e.is_not_found(),
            _ => false,
        }
    }
}

impl From<CredentialsError> for ProvisionError {
    fn from(err: CredentialsError) -> Self {
        ProvisionError::CredentialsUnavailable(err.to_string())
    }
}

/// Convenience type alias for provisioner results.
pub type Result<T> = std::result::Result<T, ProvisionError>;
