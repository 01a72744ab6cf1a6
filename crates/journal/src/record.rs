//! Reservation records and requests.

use chrono::{DateTime, Utc};
use common::{EncryptionType, ObjectUuid};
use serde::{Deserialize, Serialize};

/// A persisted reservation giving a request name its claim on an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    /// Caller-supplied idempotency key; unique per journal pool.
    pub request_name: String,
    /// Pool holding the journal entry.
    pub journal_pool: String,
    /// Pool holding the backend object.
    pub pool: String,
    /// Numeric ID of `pool` at reservation time.
    pub pool_id: i64,
    /// Assigned once at reservation, never changed afterwards.
    pub image_uuid: ObjectUuid,
    pub image_name: String,
    /// Backfilled after the backend object exists.
    pub image_id: Option<String>,
    pub owner: Option<String>,
    pub parent_name: Option<String>,
    pub encryption: EncryptionType,
    pub reserved_at: DateTime<Utc>,
}

impl ReservationRecord {
    /// Returns true if `owner` matches the recorded owner.
    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner.as_deref() == Some(owner)
    }

    /// Returns true if the backend image ID has not been stored yet.
    pub fn needs_image_id(&self) -> bool {
        self.image_id.as_deref().is_none_or(str::is_empty)
    }
}

/// Parameters for reserving a new name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveRequest {
    pub journal_pool: String,
    pub journal_pool_id: i64,
    pub pool: String,
    pub pool_id: i64,
    pub request_name: String,
    /// Prefix of the generated image name, e.g. `csi-snap-`.
    pub name_prefix: String,
    pub parent_name: Option<String>,
    pub owner: Option<String>,
    pub encryption: EncryptionType,
}

impl ReserveRequest {
    /// Creates a request with the journal in the data pool.
    pub fn new(
        pool: impl Into<String>,
        pool_id: i64,
        request_name: impl Into<String>,
        name_prefix: impl Into<String>,
    ) -> Self {
        let pool = pool.into();
        Self {
            journal_pool: pool.clone(),
            journal_pool_id: pool_id,
            pool,
            pool_id,
            request_name: request_name.into(),
            name_prefix: name_prefix.into(),
            parent_name: None,
            owner: None,
            encryption: EncryptionType::None,
        }
    }

    /// Places the journal entry in a different pool than the object.
    pub fn with_journal_pool(mut self, journal_pool: impl Into<String>, journal_pool_id: i64) -> Self {
        self.journal_pool = journal_pool.into();
        self.journal_pool_id = journal_pool_id;
        self
    }

    /// Sets the recorded owner.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Sets the parent image name.
    pub fn with_parent_name(mut self, parent_name: impl Into<String>) -> Self {
        self.parent_name = Some(parent_name.into());
        self
    }

    /// Sets the encryption type.
    pub fn with_encryption(mut self, encryption: EncryptionType) -> Self {
        self.encryption = encryption;
        self
    }

    /// Returns the image name generated for `uuid`.
    pub fn image_name_for(&self, uuid: &ObjectUuid) -> String {
        format!("{}{}", self.name_prefix, uuid)
    }

    /// Builds the record stored for a successful reservation.
    pub fn to_record(&self, image_uuid: ObjectUuid) -> ReservationRecord {
        ReservationRecord {
            request_name: self.request_name.clone(),
            journal_pool: self.journal_pool.clone(),
            pool: self.pool.clone(),
            pool_id: self.pool_id,
            image_name: self.image_name_for(&image_uuid),
            image_uuid,
            image_id: None,
            owner: self.owner.clone(),
            parent_name: self.parent_name.clone(),
            encryption: self.encryption,
            reserved_at: Utc::now(),
        }
    }
}

/// Identity handed out by a successful reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub image_uuid: ObjectUuid,
    pub image_name: String,
}

impl From<&ReservationRecord> for Reservation {
    fn from(record: &ReservationRecord) -> Self {
        Self {
            image_uuid: record.image_uuid.clone(),
            image_name: record.image_name.clone(),
        }
    }
}
