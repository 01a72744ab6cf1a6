//! Storage backend interface and in-memory implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use common::Credentials;
use identity::BackendObjectDescriptor;
use thiserror::Error;

/// Errors reported by the storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The object does not exist.
    #[error("object not found: {object}")]
    NotFound { object: String },

    /// A backend call failed.
    #[error("{operation} failed on {object}: {message}")]
    Operation {
        operation: &'static str,
        object: String,
        message: String,
    },
}

impl BackendError {
    /// Returns true if the error reports an absent object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }

    fn operation(operation: &'static str, object: &BackendObjectDescriptor, message: &str) -> Self {
        BackendError::Operation {
            operation,
            object: object.object_path(),
            message: message.to_string(),
        }
    }

    fn not_found(object: &BackendObjectDescriptor) -> Self {
        BackendError::NotFound {
            object: object.object_path(),
        }
    }
}

/// Operations on a connected backend.
#[async_trait]
pub trait BackendSession: Send + Sync {
    /// Creates the snapshot described by `snapshot` on its source image.
    async fn create_snapshot(&self, snapshot: &BackendObjectDescriptor) -> Result<(), BackendError>;

    /// Clones `target` from `snapshot` and returns the new image ID.
    async fn clone_from(
        &self,
        snapshot: &BackendObjectDescriptor,
        target: &BackendObjectDescriptor,
    ) -> Result<String, BackendError>;

    /// Deletes an image or snapshot.
    async fn delete_object(&self, object: &BackendObjectDescriptor) -> Result<(), BackendError>;

    /// Looks up the backend image ID of `object`.
    async fn image_id(&self, object: &BackendObjectDescriptor) -> Result<String, BackendError>;
}

/// Opens backend sessions.
///
/// A session is closed when it is dropped.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// The session type handed out by this connector.
    type Session: BackendSession;

    /// Connects to the cluster reachable at `monitors`.
    async fn connect(
        &self,
        monitors: &[String],
        credentials: &Credentials,
    ) -> Result<Self::Session, BackendError>;
}

#[derive(Debug, Default)]
struct BackendState {
    /// Object path to image ID.
    objects: HashMap<String, String>,
    next_id: u32,
    connect_delay: Option<Duration>,
    reply_delay: Option<Duration>,
    fail_on_connect: bool,
    fail_on_create_snapshot: bool,
    fail_on_clone: bool,
    fail_on_delete_snapshot: bool,
    fail_on_delete_image: bool,
    fail_on_image_id: bool,
}

/// In-memory backend for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<RwLock<BackendState>>,
    open_sessions: Arc<AtomicUsize>,
}

impl InMemoryBackend {
    /// Creates a new empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BackendState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BackendState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an existing object and returns its image ID.
    pub fn add_object(&self, object: &BackendObjectDescriptor) -> String {
        let mut state = self.write();
        state.next_id += 1;
        let image_id = format!("{:x}", 0x10a2b0 + state.next_id);
        state.objects.insert(object.object_path(), image_id.clone());
        image_id
    }

    /// Returns true if the object exists.
    pub fn exists(&self, object: &BackendObjectDescriptor) -> bool {
        self.read().objects.contains_key(&object.object_path())
    }

    /// Returns the number of objects, snapshots included.
    pub fn object_count(&self) -> usize {
        self.read().objects.len()
    }

    /// Returns the number of sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Makes every connection attempt take `delay`.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        self.write().connect_delay = delay;
    }

    /// Makes snapshot and clone calls take effect, then take `delay` to reply.
    pub fn set_reply_delay(&self, delay: Option<Duration>) {
        self.write().reply_delay = delay;
    }

    /// Configures the backend to refuse connections.
    pub fn set_fail_on_connect(&self, fail: bool) {
        self.write().fail_on_connect = fail;
    }

    /// Configures the backend to fail snapshot creation.
    pub fn set_fail_on_create_snapshot(&self, fail: bool) {
        self.write().fail_on_create_snapshot = fail;
    }

    /// Configures the backend to fail clones.
    pub fn set_fail_on_clone(&self, fail: bool) {
        self.write().fail_on_clone = fail;
    }

    /// Configures the backend to fail snapshot deletion.
    pub fn set_fail_on_delete_snapshot(&self, fail: bool) {
        self.write().fail_on_delete_snapshot = fail;
    }

    /// Configures the backend to fail image deletion.
    pub fn set_fail_on_delete_image(&self, fail: bool) {
        self.write().fail_on_delete_image = fail;
    }

    /// Configures the backend to fail image ID lookups.
    pub fn set_fail_on_image_id(&self, fail: bool) {
        self.write().fail_on_image_id = fail;
    }
}

#[async_trait]
impl BackendConnector for InMemoryBackend {
    type Session = InMemoryBackendSession;

    async fn connect(
        &self,
        monitors: &[String],
        _credentials: &Credentials,
    ) -> Result<Self::Session, BackendError> {
        let (delay, fail) = {
            let state = self.read();
            (state.connect_delay, state.fail_on_connect)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(BackendError::Operation {
                operation: "connect",
                object: monitors.join(","),
                message: "connection refused".to_string(),
            });
        }
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryBackendSession {
            backend: self.clone(),
        })
    }
}

/// Session on an [`InMemoryBackend`]; closes on drop.
#[derive(Debug)]
pub struct InMemoryBackendSession {
    backend: InMemoryBackend,
}

impl Drop for InMemoryBackendSession {
    fn drop(&mut self) {
        self.backend.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryBackendSession {
    fn insert_snapshot(
        &self,
        snapshot: &BackendObjectDescriptor,
    ) -> Result<Option<Duration>, BackendError> {
        let source = snapshot.source_image().ok_or_else(|| {
            BackendError::operation("create snapshot", snapshot, "not a snapshot descriptor")
        })?;
        let mut state = self.backend.write();
        if state.fail_on_create_snapshot {
            return Err(BackendError::operation("create snapshot", snapshot, "injected failure"));
        }

        let source = BackendObjectDescriptor {
            image_name: source.to_string(),
            ..snapshot.to_volume()
        };
        if !state.objects.contains_key(&source.object_path()) {
            return Err(BackendError::not_found(&source));
        }
        let path = snapshot.object_path();
        if state.objects.contains_key(&path) {
            return Err(BackendError::operation("create snapshot", snapshot, "already exists"));
        }

        state.next_id += 1;
        let snap_id = state.next_id.to_string();
        state.objects.insert(path, snap_id);
        Ok(state.reply_delay)
    }

    fn insert_clone(
        &self,
        snapshot: &BackendObjectDescriptor,
        target: &BackendObjectDescriptor,
    ) -> Result<(String, Option<Duration>), BackendError> {
        let mut state = self.backend.write();
        if state.fail_on_clone {
            return Err(BackendError::operation("clone", target, "injected failure"));
        }
        if !state.objects.contains_key(&snapshot.object_path()) {
            return Err(BackendError::not_found(snapshot));
        }
        let path = target.object_path();
        if state.objects.contains_key(&path) {
            return Err(BackendError::operation("clone", target, "already exists"));
        }

        state.next_id += 1;
        let image_id = format!("{:x}", 0x10a2b0 + state.next_id);
        state.objects.insert(path, image_id.clone());
        Ok((image_id, state.reply_delay))
    }
}

#[async_trait]
impl BackendSession for InMemoryBackendSession {
    async fn create_snapshot(&self, snapshot: &BackendObjectDescriptor) -> Result<(), BackendError> {
        let delay = self.insert_snapshot(snapshot)?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn clone_from(
        &self,
        snapshot: &BackendObjectDescriptor,
        target: &BackendObjectDescriptor,
    ) -> Result<String, BackendError> {
        let (image_id, delay) = self.insert_clone(snapshot, target)?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(image_id)
    }

    async fn delete_object(&self, object: &BackendObjectDescriptor) -> Result<(), BackendError> {
        let mut state = self.backend.write();
        let injected = if object.is_snapshot() {
            state.fail_on_delete_snapshot
        } else {
            state.fail_on_delete_image
        };
        if injected {
            return Err(BackendError::operation("delete", object, "injected failure"));
        }
        state
            .objects
            .remove(&object.object_path())
            .map(|_| ())
            .ok_or_else(|| BackendError::not_found(object))
    }

    async fn image_id(&self, object: &BackendObjectDescriptor) -> Result<String, BackendError> {
        let state = self.backend.read();
        if state.fail_on_image_id {
            return Err(BackendError::operation("get image ID", object, "injected failure"));
        }
        state
            .objects
            .get(&object.object_path())
            .cloned()
            .ok_or_else(|| BackendError::not_found(object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new("admin", "key")
    }

    fn source() -> BackendObjectDescriptor {
        BackendObjectDescriptor::volume("c1", "replicapool", "csi-vol-1")
    }

    #[tokio::test]
    async fn test_snapshot_clone_delete() {
        let backend = InMemoryBackend::new();
        backend.add_object(&source());
        let session = backend.connect(&[], &creds()).await.unwrap();

        let snap = source().snapshot_named("csi-vol-2");
        session.create_snapshot(&snap).await.unwrap();
        assert!(backend.exists(&snap));

        let target = BackendObjectDescriptor::volume("c1", "replicapool", "csi-vol-2");
        let image_id = session.clone_from(&snap, &target).await.unwrap();
        assert_eq!(session.image_id(&target).await.unwrap(), image_id);

        session.delete_object(&snap).await.unwrap();
        assert!(!backend.exists(&snap));
        assert_eq!(backend.object_count(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_of_missing_source_is_not_found() {
        let backend = InMemoryBackend::new();
        let session = backend.connect(&[], &creds()).await.unwrap();
        let err = session
            .create_snapshot(&source().snapshot_named("s"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let backend = InMemoryBackend::new();
        let session = backend.connect(&[], &creds()).await.unwrap();
        assert!(session.delete_object(&source()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failures_are_operation_errors() {
        let backend = InMemoryBackend::new();
        backend.add_object(&source());
        backend.set_fail_on_create_snapshot(true);
        let session = backend.connect(&[], &creds()).await.unwrap();

        let err = session
            .create_snapshot(&source().snapshot_named("s"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::Operation {
                operation: "create snapshot",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_sessions_close_on_drop() {
        let backend = InMemoryBackend::new();
        let session = backend.connect(&[], &creds()).await.unwrap();
        assert_eq!(backend.open_sessions(), 1);
        drop(session);
        assert_eq!(backend.open_sessions(), 0);
    }
}
