//! Snapshot content reconciler.
//!
//! After a disaster-recovery failover the surviving cluster holds images
//! whose journal entries were lost. The reconciler consumes snapshot content
//! events, fetches the deletion secret named by each object's annotations
//! and runs identity recovery so the journal is rebuilt before the handle is
//! used again.
//!
//! Watching the platform API is left to the caller; this crate only handles
//! one event at a time and reports how a failure should be retried.

pub mod config;
pub mod reconciler;
pub mod secrets;
pub mod telemetry;

pub use config::{Config, DEFAULT_DRIVER_NAME, LogFormat};
pub use reconciler::{
    DELETION_SECRET_NAME_ANNOTATION, DELETION_SECRET_NAMESPACE_ANNOTATION, IgnoreReason,
    ReconcileError, ReconcileOutcome, RequeuePolicy, SnapshotContentEvent,
    SnapshotContentReconciler,
};
pub use secrets::{InMemorySecretProvider, SecretError, SecretProvider};
pub use telemetry::{env_filter, init_tracing};
