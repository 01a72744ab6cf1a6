use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier reserved for a backend object in the journal.
///
/// Freshly reserved identifiers are random v4 UUIDs. Identifiers decoded from
/// existing handles are kept verbatim, so the type wraps a string rather than
/// a parsed [`Uuid`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectUuid(String);

impl ObjectUuid {
    /// Generates a new random object UUID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the wrapper and returns the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ObjectUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ObjectUuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

impl From<&str> for ObjectUuid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ObjectUuid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ObjectUuid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Encryption applied to a backend image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionType {
    /// The image is not encrypted.
    #[default]
    None,
    /// Block-level encryption of the whole image.
    Block,
    /// File-level encryption inside the filesystem.
    File,
}

impl EncryptionType {
    /// Returns the stable name stored alongside reservations.
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionType::None => "none",
            EncryptionType::Block => "block",
            EncryptionType::File => "file",
        }
    }

    /// Returns true if any kind of encryption is configured.
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, EncryptionType::None)
    }
}

impl std::fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown encryption type name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown encryption type: {0}")]
pub struct ParseEncryptionTypeError(pub String);

impl FromStr for EncryptionType {
    type Err = ParseEncryptionTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "" => Ok(EncryptionType::None),
            "block" => Ok(EncryptionType::Block),
            "file" => Ok(EncryptionType::File),
            other => Err(ParseEncryptionTypeError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_uuid_generate_creates_unique_ids() {
        let id1 = ObjectUuid::generate();
        let id2 = ObjectUuid::generate();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), 36);
    }

    #[test]
    fn object_uuid_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = ObjectUuid::from(uuid);
        assert_eq!(id.as_str(), uuid.to_string());
    }

    #[test]
    fn object_uuid_serializes_as_plain_string() {
        let id = ObjectUuid::new("u1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"u1\"");
    }

    #[test]
    fn encryption_type_parses_stored_names() {
        assert_eq!("none".parse::<EncryptionType>().unwrap(), EncryptionType::None);
        assert_eq!("".parse::<EncryptionType>().unwrap(), EncryptionType::None);
        assert_eq!("block".parse::<EncryptionType>().unwrap(), EncryptionType::Block);
        assert_eq!("file".parse::<EncryptionType>().unwrap(), EncryptionType::File);
        assert!("luks2".parse::<EncryptionType>().is_err());
    }

    #[test]
    fn encryption_type_display_matches_as_str() {
        for ty in [EncryptionType::None, EncryptionType::Block, EncryptionType::File] {
            assert_eq!(ty.to_string(), ty.as_str());
            assert_eq!(ty.as_str().parse::<EncryptionType>().unwrap(), ty);
        }
        assert!(!EncryptionType::None.is_encrypted());
        assert!(EncryptionType::Block.is_encrypted());
    }
}
