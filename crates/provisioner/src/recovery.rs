//! Identity recovery from a surviving backend handle.
//!
//! After a disaster-recovery failover the backend objects survive but the
//! journal entries behind their handles may not. Given the old handle and a
//! stable request name, [`IdentityRecovery::regenerate_identity`] recreates
//! the reservation (or reuses one from an earlier attempt) and returns the
//! handle the object is known by locally. Repeated calls with the same
//! request name return the same handle and create nothing new.

use std::time::Duration;

use common::{Credentials, ObjectUuid};
use identity::{BackendObjectDescriptor, VolumeIdentifier, decode_handle};
use journal::{
    JournalConnector, JournalTarget, ReservationJournal, ReservationRecord, ReserveRequest,
};

use crate::backend::{BackendConnector, BackendSession};
use crate::deadline::bounded;
use crate::error::Result;
use crate::locks::ResourceLocks;
use crate::resolver::ClusterResolver;
use crate::saga::{Compensation, Saga};

/// Default prefix of regenerated snapshot image names.
pub const DEFAULT_SNAPSHOT_NAME_PREFIX: &str = "csi-snap-";

/// Default bounded wait for each external call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables for identity recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverySettings {
    /// Prefix of newly reserved image names.
    pub name_prefix: String,
    /// Pool holding journal entries; `None` keeps them in the data pool.
    pub journal_pool: Option<String>,
    /// Bounded wait for each external call.
    pub call_timeout: Duration,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            name_prefix: DEFAULT_SNAPSHOT_NAME_PREFIX.to_string(),
            journal_pool: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Input of one recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegenerateRequest {
    /// Handle of the surviving object.
    pub input_handle: String,
    /// Cluster name recorded on the object; overrides the cluster map's.
    pub cluster_name: Option<String>,
    /// Owner recorded on the reservation, usually the platform namespace.
    pub owner: String,
    /// Stable idempotency key for this object.
    pub request_name: String,
}

impl RegenerateRequest {
    /// Creates a request without a cluster name.
    pub fn new(
        input_handle: impl Into<String>,
        owner: impl Into<String>,
        request_name: impl Into<String>,
    ) -> Self {
        Self {
            input_handle: input_handle.into(),
            cluster_name: None,
            owner: owner.into(),
            request_name: request_name.into(),
        }
    }

    /// Sets the cluster name; an empty name means none.
    pub fn with_cluster_name(mut self, cluster_name: Option<String>) -> Self {
        self.cluster_name = cluster_name.filter(|name| !name.is_empty());
        self
    }
}

/// Regenerates journal state for objects known only by their handle.
pub struct IdentityRecovery<R, B, J>
where
    R: ClusterResolver,
    B: BackendConnector,
    J: JournalConnector,
{
    resolver: R,
    backend: B,
    journal: J,
    locks: ResourceLocks,
    settings: RecoverySettings,
}

impl<R, B, J> IdentityRecovery<R, B, J>
where
    R: ClusterResolver,
    B: BackendConnector,
    J: JournalConnector,
{
    /// Creates a new recovery service.
    pub fn new(resolver: R, backend: B, journal: J, locks: ResourceLocks, settings: RecoverySettings) -> Self {
        Self {
            resolver,
            backend,
            journal,
            locks,
            settings,
        }
    }

    /// Returns the settings in use.
    pub fn settings(&self) -> &RecoverySettings {
        &self.settings
    }

    /// Returns the handle the object behind `request.input_handle` is known
    /// by locally, reserving a journal entry for it if none exists yet.
    ///
    /// Fails with `Busy` without waiting when another operation holds the
    /// input handle.
    #[tracing::instrument(
        skip(self, request, credentials),
        fields(handle = %request.input_handle, request_name = %request.request_name)
    )]
    pub async fn regenerate_identity(
        &self,
        request: &RegenerateRequest,
        credentials: &Credentials,
    ) -> Result<String> {
        let limit = self.settings.call_timeout;
        let identifier = decode_handle(&request.input_handle)?;

        let cluster = bounded(
            limit,
            "resolve cluster",
            self.resolver.resolve_cluster(&identifier.cluster_id),
        )
        .await?;
        let pool = bounded(
            limit,
            "resolve pool name",
            self.resolver
                .resolve_pool_name(&identifier.cluster_id, identifier.location_id),
        )
        .await?;
        let journal_pool = self
            .settings
            .journal_pool
            .clone()
            .unwrap_or_else(|| pool.clone());
        tracing::debug!(
            cluster_id = %cluster.cluster_id,
            %pool,
            %journal_pool,
            "location resolved"
        );

        let _guard = self.locks.try_lock(&request.input_handle)?;

        let backend = bounded(
            limit,
            "connect backend",
            self.backend.connect(&cluster.monitors, credentials),
        )
        .await?;
        let journal = bounded(
            limit,
            "connect journal",
            self.journal
                .connect(&JournalTarget::new(cluster.monitors.clone()), credentials),
        )
        .await?;

        let (journal_pool_id, pool_id) = bounded(
            limit,
            "resolve pool IDs",
            self.resolver
                .resolve_pool_ids(&cluster.monitors, &journal_pool, &pool, credentials),
        )
        .await?;

        let mut object = BackendObjectDescriptor::volume(&cluster.cluster_id, &pool, "")
            .with_monitors(cluster.monitors.clone())
            .with_request_name(&request.request_name);
        object.journal_pool = journal_pool.clone();
        object.cluster_name = request.cluster_name.clone().or(cluster.cluster_name);
        object.name_prefix = Some(self.settings.name_prefix.clone());

        let existing = bounded(
            limit,
            "check reservation",
            journal.check_reservation(&journal_pool, &request.request_name),
        )
        .await?;

        if let Some(record) = existing {
            let handle = self
                .reuse_reservation(&backend, &journal, object, &record, request, pool_id)
                .await?;
            metrics::counter!("identity_recoveries_total", "outcome" => "reused").increment(1);
            tracing::info!(%handle, "reused existing reservation");
            return Ok(handle);
        }

        let reserve = ReserveRequest::new(&pool, pool_id, &request.request_name, &self.settings.name_prefix)
            .with_journal_pool(&journal_pool, journal_pool_id)
            .with_owner(&request.owner);
        let reservation = bounded(limit, "reserve name", journal.reserve_name(&reserve)).await?;

        let mut saga = Saga::start();
        saga.record(Compensation::UndoReservation {
            journal_pool: journal_pool.clone(),
            image_name: reservation.image_name.clone(),
            request_name: request.request_name.clone(),
        });

        object.image_name = reservation.image_name.clone();
        object.owner = Some(request.owner.clone());
        object.reserved_id = Some(reservation.image_uuid.clone());

        match self
            .complete_reservation(&backend, &journal, &mut object, &reservation.image_uuid, pool_id)
            .await
        {
            Ok(handle) => {
                saga.complete();
                metrics::counter!("identity_recoveries_total", "outcome" => "reserved").increment(1);
                tracing::info!(%handle, image_name = %object.image_name, "reserved new identity");
                Ok(handle)
            }
            Err(err) => {
                metrics::counter!("identity_recovery_rollbacks_total").increment(1);
                tracing::warn!(error = %err, "recovery failed after reservation, undoing");
                let failed = saga.unwind(&backend, Some(&journal), limit).await;
                if failed > 0 {
                    tracing::error!(failed, "reservation could not be undone");
                }
                Err(err)
            }
        }
    }

    async fn reuse_reservation(
        &self,
        backend: &B::Session,
        journal: &J::Session,
        mut object: BackendObjectDescriptor,
        record: &ReservationRecord,
        request: &RegenerateRequest,
        pool_id: i64,
    ) -> Result<String> {
        object.image_name = record.image_name.clone();
        object.image_id = record.image_id.clone().filter(|id| !id.is_empty());
        object.owner = record.owner.clone();

        if record.needs_image_id() {
            self.backfill_image_id(backend, journal, &mut object, &record.image_uuid)
                .await?;
        }

        if !record.is_owned_by(&request.owner) {
            bounded(
                self.settings.call_timeout,
                "reset owner",
                journal.reset_owner(&object.journal_pool, &record.image_uuid, &request.owner),
            )
            .await?;
            tracing::info!(
                from = ?record.owner,
                to = %request.owner,
                "reservation owner corrected"
            );
            object.owner = Some(request.owner.clone());
        }

        let handle =
            VolumeIdentifier::new(&object.cluster_id, pool_id, record.image_uuid.as_str()).encode()?;
        Ok(handle)
    }

    async fn complete_reservation(
        &self,
        backend: &B::Session,
        journal: &J::Session,
        object: &mut BackendObjectDescriptor,
        image_uuid: &ObjectUuid,
        pool_id: i64,
    ) -> Result<String> {
        let handle = VolumeIdentifier::new(&object.cluster_id, pool_id, image_uuid.as_str()).encode()?;
        object.volume_id = Some(handle.clone());

        self.backfill_image_id(backend, journal, object, image_uuid)
            .await?;
        Ok(handle)
    }

    /// Stores the backend image ID on the reservation if the image exists.
    ///
    /// A missing image leaves the ID absent to be filled in by a later pass.
    async fn backfill_image_id(
        &self,
        backend: &B::Session,
        journal: &J::Session,
        object: &mut BackendObjectDescriptor,
        image_uuid: &ObjectUuid,
    ) -> Result<()> {
        let limit = self.settings.call_timeout;
        let image_id = match bounded(limit, "get image ID", backend.image_id(object)).await {
            Ok(image_id) => image_id,
            Err(e) if e.is_not_found() => {
                tracing::debug!(image = %object, "image not found, image ID left unset");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        bounded(
            limit,
            "store image ID",
            journal.store_image_id(&object.journal_pool, image_uuid, &image_id),
        )
        .await?;
        tracing::debug!(%image_id, "image ID backfilled");
        object.image_id = Some(image_id);
        Ok(())
    }
}
