//! Snapshot content reconciliation.
//!
//! Each event describes one snapshot content object seen by the platform.
//! For objects of this driver that carry a snapshot handle, the reconciler
//! fetches credentials and runs identity recovery once, so journal state
//! lost in a failover is recreated before the snapshot is used.

use std::collections::HashMap;

use common::{Credentials, SecretRef};
use journal::JournalConnector;
use provisioner::{
    BackendConnector, ClusterResolver, IdentityRecovery, ProvisionError, RegenerateRequest,
};
use thiserror::Error;

use crate::config::Config;
use crate::secrets::SecretProvider;

/// Annotation naming the secret used for snapshot deletion.
pub const DELETION_SECRET_NAME_ANNOTATION: &str =
    "snapshot.storage.kubernetes.io/deletion-secret-name";

/// Annotation naming the namespace of the deletion secret.
pub const DELETION_SECRET_NAMESPACE_ANNOTATION: &str =
    "snapshot.storage.kubernetes.io/deletion-secret-namespace";

/// A snapshot content object as delivered by the platform watch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotContentEvent {
    /// Object name; used as the request name.
    pub name: String,
    /// Object namespace; used as the reservation owner.
    pub namespace: String,
    pub driver: String,
    pub snapshot_handle: Option<String>,
    pub annotations: HashMap<String, String>,
    /// The object is marked for deletion.
    pub deleting: bool,
}

impl SnapshotContentEvent {
    /// Returns the deletion secret named by the annotations, if both parts are set.
    pub fn deletion_secret(&self) -> Option<SecretRef> {
        SecretRef::from_parts(
            self.annotations
                .get(DELETION_SECRET_NAME_ANNOTATION)
                .map(String::as_str),
            self.annotations
                .get(DELETION_SECRET_NAMESPACE_ANNOTATION)
                .map(String::as_str),
        )
    }
}

/// Why an event was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OtherDriver,
    NoSnapshotHandle,
    Deleting,
}

/// Result of a successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The event needed no work.
    Ignored(IgnoreReason),
    /// Recovery ran and returned `handle`.
    Regenerated { handle: String, changed: bool },
}

/// How the platform should retry a failed reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeuePolicy {
    /// Another operation is in progress; retry soon.
    Requeue,
    /// Retry on the normal failure backoff.
    Backoff,
}

/// Errors that can occur during reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Credentials could not be obtained for the object.
    #[error("credentials unavailable for {content}: {reason}")]
    CredentialsUnavailable { content: String, reason: String },

    /// Identity recovery failed.
    #[error("identity recovery failed: {0}")]
    Provision(#[from] ProvisionError),
}

impl ReconcileError {
    /// Returns the retry policy for this error.
    pub fn requeue_policy(&self) -> RequeuePolicy {
        match self {
            ReconcileError::Provision(e) if e.is_busy() => RequeuePolicy::Requeue,
            _ => RequeuePolicy::Backoff,
        }
    }
}

/// Reconciles snapshot content events into journal state.
pub struct SnapshotContentReconciler<R, B, J, S>
where
    R: ClusterResolver,
    B: BackendConnector,
    J: JournalConnector,
    S: SecretProvider,
{
    driver_name: String,
    cluster_name: Option<String>,
    recovery: IdentityRecovery<R, B, J>,
    secrets: S,
}

impl<R, B, J, S> SnapshotContentReconciler<R, B, J, S>
where
    R: ClusterResolver,
    B: BackendConnector,
    J: JournalConnector,
    S: SecretProvider,
{
    /// Creates a new reconciler.
    pub fn new(config: &Config, recovery: IdentityRecovery<R, B, J>, secrets: S) -> Self {
        Self {
            driver_name: config.driver_name.clone(),
            cluster_name: config.cluster_name.clone(),
            recovery,
            secrets,
        }
    }

    /// Handles one event.
    #[tracing::instrument(skip(self, event), fields(content = %event.name, namespace = %event.namespace))]
    pub async fn reconcile(
        &self,
        event: &SnapshotContentEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if event.driver != self.driver_name {
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::OtherDriver));
        }
        if event.deleting {
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::Deleting));
        }
        let Some(handle) = event.snapshot_handle.as_deref().filter(|h| !h.is_empty()) else {
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::NoSnapshotHandle));
        };

        let credentials = self.credentials(event).await?;
        let request = RegenerateRequest::new(handle, &event.namespace, &event.name)
            .with_cluster_name(self.cluster_name.clone());

        let regenerated = match self.recovery.regenerate_identity(&request, &credentials).await {
            Ok(regenerated) => regenerated,
            Err(e) => {
                metrics::counter!("reconcile_failures_total").increment(1);
                if e.is_busy() {
                    tracing::debug!("recovery already in progress, requeueing");
                } else {
                    tracing::error!(error = %e, "failed to regenerate journal");
                }
                return Err(e.into());
            }
        };

        let changed = regenerated != handle;
        if changed {
            tracing::info!(from = handle, to = %regenerated, "snapshot handle changed");
        }
        Ok(ReconcileOutcome::Regenerated {
            handle: regenerated,
            changed,
        })
    }

    async fn credentials(&self, event: &SnapshotContentEvent) -> Result<Credentials, ReconcileError> {
        let unavailable = |reason: String| ReconcileError::CredentialsUnavailable {
            content: event.name.clone(),
            reason,
        };

        let secret = event
            .deletion_secret()
            .ok_or_else(|| unavailable("no deletion secret annotations".to_string()))?;
        let data = self
            .secrets
            .secret_data(&secret)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        Credentials::from_secret_data(&data).map_err(|e| unavailable(e.to_string()))
    }
}
