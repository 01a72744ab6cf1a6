//! Codec error types.

use thiserror::Error;

/// Errors raised while encoding or decoding a handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A field passed to the encoder violates its length or charset constraint.
    #[error("malformed {field}: {reason}")]
    MalformedInput { field: &'static str, reason: String },

    /// The handle is not structurally valid.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    /// The handle carries a well-formed but unknown version.
    #[error("unsupported handle version {0}")]
    UnsupportedVersion(u16),
}

impl CodecError {
    pub(crate) fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        CodecError::MalformedInput {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        CodecError::InvalidHandle(reason.into())
    }
}
