//! Opaque handle codec.
//!
//! A handle packs the encoding version, the cluster ID, the location (pool) ID
//! and the object UUID into a single printable string:
//!
//! ```text
//! VVVV-LLLL-<cluster id>-PPPPPPPPPPPPPPPP-<object uuid>
//! ```
//!
//! `VVVV` is the version and `LLLL` the byte length of the cluster ID, both as
//! four hex digits. `P…` is the location ID as a 64-bit two's complement value
//! in sixteen hex digits. The object UUID takes the remainder of the string.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Handle layout version produced by [`VolumeIdentifier::encode`].
pub const CURRENT_VERSION: u8 = 1;

/// Maximum length of the cluster ID field.
pub const MAX_CLUSTER_ID_LEN: usize = 64;

/// Maximum length of the object UUID field.
pub const MAX_OBJECT_UUID_LEN: usize = 36;

const VERSION_HEX_LEN: usize = 4;
const CLUSTER_LEN_HEX_LEN: usize = 4;
const LOCATION_HEX_LEN: usize = 16;
const SEPARATOR: u8 = b'-';

/// Version, cluster length and location fields plus the four separators.
const FIXED_FIELDS_LEN: usize = VERSION_HEX_LEN + CLUSTER_LEN_HEX_LEN + LOCATION_HEX_LEN + 4;

/// Maximum length of an encoded handle.
pub const MAX_HANDLE_LEN: usize = FIXED_FIELDS_LEN + MAX_CLUSTER_ID_LEN + MAX_OBJECT_UUID_LEN;

const MIN_HANDLE_LEN: usize = FIXED_FIELDS_LEN + 2;

/// Decoded view of a volume or snapshot handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeIdentifier {
    /// Layout version of the handle.
    pub version: u8,
    /// Cluster the object lives in.
    pub cluster_id: String,
    /// Storage pool within the cluster.
    pub location_id: i64,
    /// Reserved object identifier.
    pub object_uuid: String,
}

impl VolumeIdentifier {
    /// Creates an identifier using the current layout version.
    pub fn new(
        cluster_id: impl Into<String>,
        location_id: i64,
        object_uuid: impl Into<String>,
    ) -> Self {
        Self {
            version: CURRENT_VERSION,
            cluster_id: cluster_id.into(),
            location_id,
            object_uuid: object_uuid.into(),
        }
    }

    /// Encodes the identifier into a handle string.
    ///
    /// Fails with [`CodecError::UnsupportedVersion`] for versions this codec
    /// cannot decode, and with [`CodecError::MalformedInput`] when a field
    /// violates its length or charset constraint.
    pub fn encode(&self) -> Result<String, CodecError> {
        if !is_supported(u16::from(self.version)) {
            return Err(CodecError::UnsupportedVersion(u16::from(self.version)));
        }
        validate_cluster_id(&self.cluster_id)
            .map_err(|r| CodecError::malformed("cluster_id", r))?;
        validate_object_uuid(&self.object_uuid)
            .map_err(|r| CodecError::malformed("object_uuid", r))?;

        Ok(format!(
            "{:04x}-{:04x}-{}-{:016x}-{}",
            self.version,
            self.cluster_id.len(),
            self.cluster_id,
            self.location_id as u64,
            self.object_uuid
        ))
    }

    /// Decodes a handle string.
    ///
    /// The version field is checked before the rest of the layout, so a
    /// handle from a newer encoder is reported as
    /// [`CodecError::UnsupportedVersion`] rather than as corruption.
    pub fn decode(handle: &str) -> Result<Self, CodecError> {
        // Four hex digits always fit in u16.
        let version = parse_hex(field(handle, 0, VERSION_HEX_LEN)?, "version")? as u16;
        expect_separator(handle, VERSION_HEX_LEN)?;
        if !is_supported(version) {
            return Err(CodecError::UnsupportedVersion(version));
        }

        if handle.len() < MIN_HANDLE_LEN {
            return Err(CodecError::invalid("string underflow"));
        }
        if handle.len() > MAX_HANDLE_LEN {
            return Err(CodecError::invalid("string overflow"));
        }
        if !handle.is_ascii() {
            return Err(CodecError::invalid("non-ASCII characters"));
        }

        let len_start = VERSION_HEX_LEN + 1;
        let cluster_len =
            parse_hex(field(handle, len_start, CLUSTER_LEN_HEX_LEN)?, "cluster ID length")? as usize;
        expect_separator(handle, len_start + CLUSTER_LEN_HEX_LEN)?;
        if cluster_len == 0 || cluster_len > MAX_CLUSTER_ID_LEN {
            return Err(CodecError::invalid(format!(
                "cluster ID length {cluster_len} out of range"
            )));
        }

        let cluster_start = len_start + CLUSTER_LEN_HEX_LEN + 1;
        let cluster_id = field(handle, cluster_start, cluster_len)?;
        validate_cluster_id(cluster_id).map_err(CodecError::invalid)?;
        expect_separator(handle, cluster_start + cluster_len)?;

        let location_start = cluster_start + cluster_len + 1;
        let location = parse_hex(field(handle, location_start, LOCATION_HEX_LEN)?, "location ID")?;
        expect_separator(handle, location_start + LOCATION_HEX_LEN)?;

        let uuid_start = location_start + LOCATION_HEX_LEN + 1;
        let object_uuid = handle
            .get(uuid_start..)
            .ok_or_else(|| CodecError::invalid("string underflow"))?;
        validate_object_uuid(object_uuid).map_err(CodecError::invalid)?;

        Ok(Self {
            version: version as u8,
            cluster_id: cluster_id.to_string(),
            location_id: location as i64,
            object_uuid: object_uuid.to_string(),
        })
    }
}

impl FromStr for VolumeIdentifier {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// Encodes the given fields into a handle string.
pub fn encode_handle(
    version: u8,
    cluster_id: &str,
    location_id: i64,
    object_uuid: &str,
) -> Result<String, CodecError> {
    VolumeIdentifier {
        version,
        cluster_id: cluster_id.to_string(),
        location_id,
        object_uuid: object_uuid.to_string(),
    }
    .encode()
}

/// Decodes a handle string into its fields.
pub fn decode_handle(handle: &str) -> Result<VolumeIdentifier, CodecError> {
    VolumeIdentifier::decode(handle)
}

fn is_supported(version: u16) -> bool {
    version == u16::from(CURRENT_VERSION)
}

fn field(handle: &str, start: usize, len: usize) -> Result<&str, CodecError> {
    handle
        .get(start..start + len)
        .ok_or_else(|| CodecError::invalid("string underflow"))
}

fn expect_separator(handle: &str, at: usize) -> Result<(), CodecError> {
    match handle.as_bytes().get(at) {
        Some(&SEPARATOR) => Ok(()),
        _ => Err(CodecError::invalid(format!("missing separator at offset {at}"))),
    }
}

/// Parses a fixed-width hex field; `from_str_radix` alone would accept a sign.
fn parse_hex(digits: &str, what: &str) -> Result<u64, CodecError> {
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CodecError::invalid(format!("{what} is not hex encoded")));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| CodecError::invalid(format!("{what} is not hex encoded: {e}")))
}

fn validate_cluster_id(cluster_id: &str) -> Result<(), String> {
    if cluster_id.is_empty() {
        return Err("must not be empty".to_string());
    }
    if cluster_id.len() > MAX_CLUSTER_ID_LEN {
        return Err(format!(
            "length {} exceeds {MAX_CLUSTER_ID_LEN}",
            cluster_id.len()
        ));
    }
    if !cluster_id.bytes().all(|b| b.is_ascii_graphic()) {
        return Err("must be printable ASCII without whitespace".to_string());
    }
    Ok(())
}

fn validate_object_uuid(object_uuid: &str) -> Result<(), String> {
    if object_uuid.is_empty() {
        return Err("must not be empty".to_string());
    }
    if object_uuid.len() > MAX_OBJECT_UUID_LEN {
        return Err(format!(
            "length {} exceeds {MAX_OBJECT_UUID_LEN}",
            object_uuid.len()
        ));
    }
    if !object_uuid
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == SEPARATOR)
    {
        return Err("must contain only ASCII letters, digits and '-'".to_string());
    }
    Ok(())
}
