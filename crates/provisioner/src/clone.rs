//! Derived object creation through a transient snapshot.
//!
//! A clone is made by snapshotting the source, cloning the snapshot into the
//! target and deleting the snapshot again. When any step fails every step
//! that completed is undone, so a failed workflow leaves no objects behind.

use std::time::Duration;

use common::Credentials;
use identity::BackendObjectDescriptor;
use journal::{JournalConnector, JournalTarget};

use crate::backend::{BackendConnector, BackendSession};
use crate::deadline::bounded;
use crate::error::Result;
use crate::locks::ResourceLocks;
use crate::saga::{Compensation, Saga};

/// Creates derived objects with full rollback on failure.
pub struct CloneWorkflow<B, J>
where
    B: BackendConnector,
    J: JournalConnector,
{
    backend: B,
    journal: J,
    locks: ResourceLocks,
    call_timeout: Duration,
}

impl<B, J> CloneWorkflow<B, J>
where
    B: BackendConnector,
    J: JournalConnector,
{
    /// Creates a new workflow.
    pub fn new(backend: B, journal: J, locks: ResourceLocks, call_timeout: Duration) -> Self {
        Self {
            backend,
            journal,
            locks,
            call_timeout,
        }
    }

    /// Creates `target` as a clone of `source`.
    ///
    /// Returns the target descriptor with its backend image ID. If `target`
    /// carries a fresh reservation (`reserved_id`), that reservation is undone
    /// as well when the workflow fails.
    #[tracing::instrument(
        skip(self, source, target, credentials),
        fields(source = %source, target = %target)
    )]
    pub async fn create_derived_object(
        &self,
        source: &BackendObjectDescriptor,
        target: &BackendObjectDescriptor,
        credentials: &Credentials,
    ) -> Result<BackendObjectDescriptor> {
        let _guard = self.locks.try_lock(&target.lock_key())?;
        let limit = self.call_timeout;

        let backend = bounded(
            limit,
            "connect backend",
            self.backend.connect(&source.monitors, credentials),
        )
        .await?;

        let journal = match target.reserved_id {
            Some(_) => {
                let journal_target = JournalTarget::new(target.monitors.clone())
                    .with_namespace(target.namespace.clone());
                Some(
                    bounded(
                        limit,
                        "connect journal",
                        self.journal.connect(&journal_target, credentials),
                    )
                    .await?,
                )
            }
            None => None,
        };

        let mut saga = Saga::start();
        if target.reserved_id.is_some() {
            match &target.request_name {
                Some(request_name) => saga.record(Compensation::UndoReservation {
                    journal_pool: target.journal_pool.clone(),
                    image_name: target.image_name.clone(),
                    request_name: request_name.clone(),
                }),
                None => tracing::warn!("target has a reservation but no request name"),
            }
        }

        match self.run_steps(&backend, &mut saga, source, target).await {
            Ok(created) => {
                saga.complete();
                tracing::info!(image_id = ?created.image_id, "derived object created");
                Ok(created)
            }
            Err(err) => {
                metrics::counter!("derived_object_rollbacks_total").increment(1);
                tracing::warn!(error = %err, pending = saga.pending().len(), "rolling back");
                let failed = saga.unwind(&backend, journal.as_ref(), limit).await;
                if failed > 0 {
                    tracing::error!(failed, "rollback left objects behind");
                }
                Err(err)
            }
        }
    }

    async fn run_steps(
        &self,
        backend: &B::Session,
        saga: &mut Saga,
        source: &BackendObjectDescriptor,
        target: &BackendObjectDescriptor,
    ) -> Result<BackendObjectDescriptor> {
        let limit = self.call_timeout;
        let snapshot = source.snapshot_named(target.image_name.clone());

        // A call that times out may still complete on the backend.
        saga.record(Compensation::DeleteObject(snapshot.clone()));
        bounded(limit, "create snapshot", backend.create_snapshot(&snapshot)).await?;
        tracing::debug!(step = "create_snapshot", snapshot = %snapshot, "step completed");

        let mut created = target.clone().cloned_from(&snapshot);
        saga.record(Compensation::DeleteObject(created.clone()));
        let image_id = bounded(limit, "clone", backend.clone_from(&snapshot, target)).await?;
        created.image_id = Some(image_id);
        tracing::debug!(step = "clone", "step completed");

        match bounded(limit, "delete snapshot", backend.delete_object(&snapshot)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(snapshot = %snapshot, "snapshot already gone");
            }
            Err(e) => return Err(e),
        }

        Ok(created)
    }
}
