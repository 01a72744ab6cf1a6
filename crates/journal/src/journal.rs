use async_trait::async_trait;
use common::{Credentials, ObjectUuid};

use crate::{Reservation, ReservationRecord, ReserveRequest, Result};

/// Where a journal session connects to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalTarget {
    /// Monitor endpoints of the cluster holding the journal.
    pub monitors: Vec<String>,
    /// Namespace inside the journal pool; `None` is the default namespace.
    pub namespace: Option<String>,
}

impl JournalTarget {
    /// Creates a target in the default namespace.
    pub fn new(monitors: Vec<String>) -> Self {
        Self {
            monitors,
            namespace: None,
        }
    }

    /// Sets the namespace.
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace.filter(|ns| !ns.is_empty());
        self
    }
}

/// Operations on the reservation journal.
///
/// All implementations must be thread-safe (Send + Sync). Every method is
/// scoped to a connected session.
#[async_trait]
pub trait ReservationJournal: Send + Sync {
    /// Looks up the reservation held by `request_name`.
    ///
    /// Returns None if the request has no reservation. Safe to call repeatedly.
    async fn check_reservation(
        &self,
        journal_pool: &str,
        request_name: &str,
    ) -> Result<Option<ReservationRecord>>;

    /// Reserves a brand-new UUID and image name for the request.
    ///
    /// Either the full record becomes visible or nothing does. Fails with
    /// `ReservationConflict` if the request already holds a reservation.
    async fn reserve_name(&self, request: &ReserveRequest) -> Result<Reservation>;

    /// Removes a reservation created by [`reserve_name`](Self::reserve_name).
    ///
    /// Succeeds if the reservation is already gone.
    async fn undo_reservation(
        &self,
        journal_pool: &str,
        image_name: &str,
        request_name: &str,
    ) -> Result<()>;

    /// Stores the backend image ID without touching other fields.
    async fn store_image_id(
        &self,
        journal_pool: &str,
        image_uuid: &ObjectUuid,
        image_id: &str,
    ) -> Result<()>;

    /// Replaces the recorded owner.
    async fn reset_owner(&self, journal_pool: &str, image_uuid: &ObjectUuid, owner: &str)
    -> Result<()>;
}

/// Opens journal sessions.
///
/// A session is released when it is dropped, whatever path the caller exits by.
#[async_trait]
pub trait JournalConnector: Send + Sync {
    /// The session type handed out by this connector.
    type Session: ReservationJournal;

    /// Connects to the journal described by `target`.
    async fn connect(&self, target: &JournalTarget, credentials: &Credentials)
    -> Result<Self::Session>;
}
