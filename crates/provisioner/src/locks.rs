//! Non-blocking lock table keyed by object identity.
//!
//! Acquisition either succeeds immediately or fails; callers that lose the
//! race get [`ProvisionError::Busy`] and are expected to retry on their own
//! schedule. The table is an explicit value, so independent tables never
//! interfere with each other.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{ProvisionError, Result};

/// Set of keys currently held by in-flight operations.
///
/// Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct ResourceLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl ResourceLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked mid-operation.
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `key` as held. Returns false if it already is.
    pub fn try_acquire(&self, key: &str) -> bool {
        self.held().insert(key.to_string())
    }

    /// Releases `key`. Releasing a key that is not held is a no-op.
    pub fn release(&self, key: &str) {
        self.held().remove(key);
    }

    /// Acquires `key` for the lifetime of the returned guard.
    pub fn try_lock(&self, key: &str) -> Result<LockGuard> {
        if !self.try_acquire(key) {
            metrics::counter!("resource_lock_contention_total").increment(1);
            tracing::debug!(key, "lock already held");
            return Err(ProvisionError::Busy {
                key: key.to_string(),
            });
        }
        Ok(LockGuard {
            locks: self.clone(),
            key: key.to_string(),
        })
    }

    /// Returns true if `key` is currently held.
    pub fn is_held(&self, key: &str) -> bool {
        self.held().contains(key)
    }

    /// Returns the number of keys currently held.
    pub fn len(&self) -> usize {
        self.held().len()
    }

    /// Returns true if no key is held.
    pub fn is_empty(&self) -> bool {
        self.held().is_empty()
    }
}

/// Releases its key when dropped, including during unwinding.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard {
    locks: ResourceLocks,
    key: String,
}

impl LockGuard {
    /// Returns the locked key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.locks.release(&self.key);
    }
}
