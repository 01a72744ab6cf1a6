//! Identity recovery and compensating workflows for RBD-style volumes.
//!
//! This crate provides:
//! - A non-blocking lock table serializing operations per object identity
//! - Identity recovery, which rebuilds journal state from a surviving handle
//! - Clone creation through a transient snapshot with full rollback on failure
//! - The resolver and backend interfaces both depend on, with in-memory
//!   implementations for testing
//!
//! If any step of a workflow fails, previously completed steps are
//! compensated in reverse order.

pub mod backend;
pub mod clone;
mod deadline;
pub mod error;
pub mod locks;
pub mod recovery;
pub mod resolver;
pub mod saga;

pub use backend::{
    BackendConnector, BackendError, BackendSession, InMemoryBackend, InMemoryBackendSession,
};
pub use clone::CloneWorkflow;
pub use error::{ProvisionError, Result};
pub use locks::{LockGuard, ResourceLocks};
pub use recovery::{
    DEFAULT_CALL_TIMEOUT, DEFAULT_SNAPSHOT_NAME_PREFIX, IdentityRecovery, RecoverySettings,
    RegenerateRequest,
};
pub use resolver::{
    ClusterConfig, ClusterEntry, ClusterInfo, ClusterMapping, ClusterResolver, PoolEntry,
    ResolveError, StaticClusterResolver,
};
pub use saga::{Compensation, Saga, SagaState};
