//! Shared value types used across the identity, journal and provisioner crates.

pub mod credentials;
pub mod types;

pub use credentials::{Credentials, CredentialsError, SecretRef};
pub use types::{EncryptionType, ObjectUuid, ParseEncryptionTypeError};
