//! Backend object descriptors.
//!
//! A descriptor is assembled fresh for each operation from a reservation
//! record and/or caller input. Volumes, snapshots and clones share one shape
//! and differ only in their [`ObjectKind`].

use common::{EncryptionType, ObjectUuid};
use serde::{Deserialize, Serialize};

/// The kind of backend object a descriptor refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectKind {
    /// A standalone image.
    Volume,
    /// A snapshot taken on `source_image`; the descriptor's image name is the
    /// snapshot name.
    Snapshot { source_image: String },
    /// An image cloned from the snapshot `source_snapshot`.
    Clone { source_snapshot: String },
}

/// Identity and location of one backend object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendObjectDescriptor {
    pub kind: ObjectKind,
    pub monitors: Vec<String>,
    pub cluster_id: String,
    pub cluster_name: Option<String>,
    pub pool: String,
    pub journal_pool: String,
    /// Namespace inside the pool; `None` is the pool's default namespace.
    pub namespace: Option<String>,
    pub image_name: String,
    /// Backend image ID; absent until looked up and stored.
    pub image_id: Option<String>,
    /// Encoded handle of the object, once one has been issued.
    pub volume_id: Option<String>,
    pub request_name: Option<String>,
    pub name_prefix: Option<String>,
    /// Journal UUID reserved for this object by the current operation.
    pub reserved_id: Option<ObjectUuid>,
    pub owner: Option<String>,
    pub parent_name: Option<String>,
    pub encryption: EncryptionType,
}

impl BackendObjectDescriptor {
    /// Creates a volume descriptor whose journal lives in the data pool.
    pub fn volume(
        cluster_id: impl Into<String>,
        pool: impl Into<String>,
        image_name: impl Into<String>,
    ) -> Self {
        let pool = pool.into();
        Self {
            kind: ObjectKind::Volume,
            monitors: Vec::new(),
            cluster_id: cluster_id.into(),
            cluster_name: None,
            journal_pool: pool.clone(),
            pool,
            namespace: None,
            image_name: image_name.into(),
            image_id: None,
            volume_id: None,
            request_name: None,
            name_prefix: None,
            reserved_id: None,
            owner: None,
            parent_name: None,
            encryption: EncryptionType::None,
        }
    }

    /// Sets the monitor endpoints.
    pub fn with_monitors(mut self, monitors: Vec<String>) -> Self {
        self.monitors = monitors;
        self
    }

    /// Sets the namespace inside the pool.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sets the request name used as the idempotency key.
    pub fn with_request_name(mut self, request_name: impl Into<String>) -> Self {
        self.request_name = Some(request_name.into());
        self
    }

    /// Sets the encoded handle.
    pub fn with_volume_id(mut self, volume_id: impl Into<String>) -> Self {
        self.volume_id = Some(volume_id.into());
        self
    }

    /// Marks the descriptor as holding a fresh journal reservation.
    pub fn with_reserved_id(mut self, reserved_id: ObjectUuid) -> Self {
        self.reserved_id = Some(reserved_id);
        self
    }

    /// Sets the encryption type.
    pub fn with_encryption(mut self, encryption: EncryptionType) -> Self {
        self.encryption = encryption;
        self
    }

    /// Turns this descriptor into a clone of `snapshot`.
    pub fn cloned_from(mut self, snapshot: &BackendObjectDescriptor) -> Self {
        self.kind = ObjectKind::Clone {
            source_snapshot: snapshot.image_name.clone(),
        };
        self.parent_name = snapshot.source_image().map(str::to_string);
        self
    }

    /// Derives a descriptor for the snapshot `snap_name` taken on this image.
    pub fn snapshot_named(&self, snap_name: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::Snapshot {
                source_image: self.image_name.clone(),
            },
            monitors: self.monitors.clone(),
            cluster_id: self.cluster_id.clone(),
            cluster_name: self.cluster_name.clone(),
            pool: self.pool.clone(),
            journal_pool: self.journal_pool.clone(),
            namespace: self.namespace.clone(),
            image_name: snap_name.into(),
            image_id: None,
            volume_id: None,
            request_name: None,
            name_prefix: None,
            reserved_id: None,
            owner: self.owner.clone(),
            parent_name: Some(self.image_name.clone()),
            encryption: self.encryption,
        }
    }

    /// Returns the volume view of a snapshot.
    ///
    /// Identity, location and encryption fields are shared; the image name is
    /// the snapshot name.
    pub fn to_volume(&self) -> Self {
        Self {
            kind: ObjectKind::Volume,
            monitors: self.monitors.clone(),
            cluster_id: self.cluster_id.clone(),
            cluster_name: self.cluster_name.clone(),
            pool: self.pool.clone(),
            journal_pool: self.journal_pool.clone(),
            namespace: self.namespace.clone(),
            image_name: self.image_name.clone(),
            image_id: self.image_id.clone(),
            volume_id: self.volume_id.clone(),
            request_name: None,
            name_prefix: None,
            reserved_id: None,
            owner: None,
            parent_name: None,
            encryption: self.encryption,
        }
    }

    /// Returns the image a snapshot was taken on.
    pub fn source_image(&self) -> Option<&str> {
        match &self.kind {
            ObjectKind::Snapshot { source_image } => Some(source_image),
            _ => None,
        }
    }

    /// Returns true if the descriptor refers to a snapshot.
    pub fn is_snapshot(&self) -> bool {
        matches!(self.kind, ObjectKind::Snapshot { .. })
    }

    /// Returns `pool[/namespace]/image[@snapshot]`.
    pub fn object_path(&self) -> String {
        let mut path = self.pool.clone();
        if let Some(ns) = self.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            path.push('/');
            path.push_str(ns);
        }
        path.push('/');
        match &self.kind {
            ObjectKind::Snapshot { source_image } => {
                path.push_str(source_image);
                path.push('@');
                path.push_str(&self.image_name);
            }
            ObjectKind::Volume | ObjectKind::Clone { .. } => path.push_str(&self.image_name),
        }
        path
    }

    /// Key used to serialize operations on this object.
    ///
    /// Prefers the issued handle, then the request name, then the object path.
    pub fn lock_key(&self) -> String {
        self.volume_id
            .clone()
            .or_else(|| self.request_name.clone())
            .unwrap_or_else(|| self.object_path())
    }
}

impl std::fmt::Display for BackendObjectDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.object_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent() -> BackendObjectDescriptor {
        BackendObjectDescriptor::volume("c1", "replicapool", "csi-vol-1")
            .with_monitors(vec!["10.0.0.1:6789".to_string()])
            .with_encryption(EncryptionType::Block)
    }

    #[test]
    fn test_volume_defaults_journal_pool_to_data_pool() {
        let vol = parent();
        assert_eq!(vol.journal_pool, "replicapool");
        assert_eq!(vol.kind, ObjectKind::Volume);
        assert!(vol.image_id.is_none());
    }

    #[test]
    fn test_snapshot_named_shares_location() {
        let vol = parent().with_namespace("tenant-a");
        let snap = vol.snapshot_named("csi-snap-1");

        assert!(snap.is_snapshot());
        assert_eq!(snap.source_image(), Some("csi-vol-1"));
        assert_eq!(snap.pool, vol.pool);
        assert_eq!(snap.namespace.as_deref(), Some("tenant-a"));
        assert_eq!(snap.monitors, vol.monitors);
        assert_eq!(snap.encryption, EncryptionType::Block);
        assert_eq!(snap.object_path(), "replicapool/tenant-a/csi-vol-1@csi-snap-1");
    }

    #[test]
    fn test_to_volume_keeps_identity() {
        let mut snap = parent().snapshot_named("csi-snap-1");
        snap.volume_id = Some("0001-0002-c1-0000000000000005-u1".to_string());
        snap.image_id = Some("10a2b3".to_string());

        let vol = snap.to_volume();
        assert_eq!(vol.kind, ObjectKind::Volume);
        assert_eq!(vol.image_name, "csi-snap-1");
        assert_eq!(vol.volume_id, snap.volume_id);
        assert_eq!(vol.image_id, snap.image_id);
        assert_eq!(vol.encryption, EncryptionType::Block);
    }

    #[test]
    fn test_cloned_from_records_source() {
        let snap = parent().snapshot_named("csi-vol-2");
        let clone = BackendObjectDescriptor::volume("c1", "replicapool", "csi-vol-2").cloned_from(&snap);

        assert_eq!(
            clone.kind,
            ObjectKind::Clone {
                source_snapshot: "csi-vol-2".to_string()
            }
        );
        assert_eq!(clone.parent_name.as_deref(), Some("csi-vol-1"));
        assert_eq!(clone.object_path(), "replicapool/csi-vol-2");
    }

    #[test]
    fn test_lock_key_preference() {
        let vol = parent();
        assert_eq!(vol.lock_key(), "replicapool/csi-vol-1");

        let vol = vol.with_request_name("pvc-1");
        assert_eq!(vol.lock_key(), "pvc-1");

        let vol = vol.with_volume_id("0001-0002-c1-0000000000000005-u1");
        assert_eq!(vol.lock_key(), "0001-0002-c1-0000000000000005-u1");
    }

    #[test]
    fn test_serialization_roundtrip() {
        let snap = parent().snapshot_named("csi-snap-1");
        let json = serde_json::to_string(&snap).unwrap();
        let back: BackendObjectDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }
}
