//! Integration tests for identity recovery.

use std::time::Duration;

use common::{Credentials, ObjectUuid};
use identity::{BackendObjectDescriptor, VolumeIdentifier, decode_handle};
use journal::{InMemoryJournal, JournalError, ReserveRequest};
use provisioner::{
    IdentityRecovery, InMemoryBackend, ProvisionError, RecoverySettings, RegenerateRequest,
    ResourceLocks, StaticClusterResolver,
};

const CLUSTER_CONFIG: &str = r#"{
    "clusters": [
        {
            "clusterID": "c1",
            "monitors": ["10.0.0.1:6789"],
            "pools": [ { "id": 5, "name": "replicapool" } ]
        }
    ],
    "mappings": [
        { "clusterIDMapping": { "c-remote": "c1" }, "rbdPoolIDMapping": [ { "9": "5" } ] }
    ]
}"#;

type TestRecovery = IdentityRecovery<StaticClusterResolver, InMemoryBackend, InMemoryJournal>;

struct TestHarness {
    recovery: TestRecovery,
    backend: InMemoryBackend,
    journal: InMemoryJournal,
    locks: ResourceLocks,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_settings(RecoverySettings::default())
    }

    fn with_settings(settings: RecoverySettings) -> Self {
        let resolver = StaticClusterResolver::from_json(CLUSTER_CONFIG).unwrap();
        let backend = InMemoryBackend::new();
        let journal = InMemoryJournal::new();
        let locks = ResourceLocks::new();

        let recovery = IdentityRecovery::new(
            resolver,
            backend.clone(),
            journal.clone(),
            locks.clone(),
            settings,
        );

        Self {
            recovery,
            backend,
            journal,
            locks,
        }
    }

    fn seed(&self, request_name: &str, uuid: &str, owner: &str) {
        self.journal.seed(
            ReserveRequest::new("replicapool", 5, request_name, "csi-snap-")
                .with_owner(owner)
                .to_record(ObjectUuid::new(uuid)),
        );
    }

    fn image(&self, name: &str) -> BackendObjectDescriptor {
        BackendObjectDescriptor::volume("c1", "replicapool", name)
    }

    fn assert_released(&self) {
        assert!(self.locks.is_empty());
        assert_eq!(self.journal.open_sessions(), 0);
        assert_eq!(self.backend.open_sessions(), 0);
    }
}

fn creds() -> Credentials {
    Credentials::new("admin", "AQD9")
}

fn handle(cluster_id: &str, pool_id: i64, uuid: &str) -> String {
    VolumeIdentifier::new(cluster_id, pool_id, uuid).encode().unwrap()
}

fn request(owner: &str) -> RegenerateRequest {
    RegenerateRequest::new(handle("c1", 5, "u1"), owner, "snap-42")
}

#[tokio::test]
async fn test_fresh_reservation_for_unknown_request() {
    let h = TestHarness::new();
    h.journal.push_next_uuid("u2");

    let out = h
        .recovery
        .regenerate_identity(&request("ns-a"), &creds())
        .await
        .unwrap();

    let decoded = decode_handle(&out).unwrap();
    assert_eq!(decoded.version, 1);
    assert_eq!(decoded.cluster_id, "c1");
    assert_eq!(decoded.location_id, 5);
    assert_eq!(decoded.object_uuid, "u2");

    let record = h.journal.get("replicapool", "snap-42").unwrap();
    assert_eq!(record.image_name, "csi-snap-u2");
    assert!(record.is_owned_by("ns-a"));
    h.assert_released();
}

#[tokio::test]
async fn test_existing_reservation_is_reused_and_owner_corrected() {
    let h = TestHarness::new();
    h.seed("snap-42", "u9", "ns-a");

    let out = h
        .recovery
        .regenerate_identity(&request("ns-b"), &creds())
        .await
        .unwrap();

    assert_eq!(out, handle("c1", 5, "u9"));
    assert_eq!(h.journal.record_count(), 1);
    let record = h.journal.get("replicapool", "snap-42").unwrap();
    assert!(record.is_owned_by("ns-b"));
    assert_eq!(record.image_uuid.as_str(), "u9");
    h.assert_released();
}

#[tokio::test]
async fn test_empty_handle_is_invalid() {
    let h = TestHarness::new();

    let err = h
        .recovery
        .regenerate_identity(&RegenerateRequest::new("", "ns-a", "snap-42"), &creds())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::Codec(identity::CodecError::InvalidHandle(_))
    ));
    assert_eq!(h.journal.sessions_opened(), 0);
    assert_eq!(h.journal.record_count(), 0);
    h.assert_released();
}

#[tokio::test]
async fn test_repeated_calls_converge() {
    let h = TestHarness::new();

    let first = h
        .recovery
        .regenerate_identity(&request("ns-a"), &creds())
        .await
        .unwrap();
    let second = h
        .recovery
        .regenerate_identity(&request("ns-a"), &creds())
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(h.journal.record_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_on_same_handle() {
    let h = TestHarness::new();
    // Hold the first caller inside the critical section long enough for the
    // second to arrive.
    h.backend.set_connect_delay(Some(Duration::from_millis(50)));

    let req = request("ns-a");
    let credentials = creds();
    let (a, b) = tokio::join!(
        h.recovery.regenerate_identity(&req, &credentials),
        h.recovery.regenerate_identity(&req, &credentials),
    );

    let busy = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_busy()))
        .count();
    let ok = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!((ok, busy), (1, 1));
    assert_eq!(h.journal.record_count(), 1);
    h.assert_released();
}

#[tokio::test]
async fn test_held_lock_fails_fast() {
    let h = TestHarness::new();
    let req = request("ns-a");
    let guard = h.locks.try_lock(&req.input_handle).unwrap();

    let err = h
        .recovery
        .regenerate_identity(&req, &creds())
        .await
        .unwrap_err();
    assert!(err.is_busy());
    assert_eq!(h.journal.sessions_opened(), 0);

    drop(guard);
    assert!(h.recovery.regenerate_identity(&req, &creds()).await.is_ok());
}

#[tokio::test]
async fn test_missing_image_id_is_backfilled() {
    let h = TestHarness::new();
    h.seed("snap-42", "u9", "ns-a");
    let image_id = h.backend.add_object(&h.image("csi-snap-u9"));

    h.recovery
        .regenerate_identity(&request("ns-a"), &creds())
        .await
        .unwrap();

    let record = h.journal.get("replicapool", "snap-42").unwrap();
    assert_eq!(record.image_id.as_deref(), Some(image_id.as_str()));
    assert_eq!(record.image_uuid.as_str(), "u9");
    assert_eq!(record.image_name, "csi-snap-u9");
}

#[tokio::test]
async fn test_absent_image_leaves_image_id_unset() {
    let h = TestHarness::new();
    h.seed("snap-42", "u9", "ns-a");

    h.recovery
        .regenerate_identity(&request("ns-a"), &creds())
        .await
        .unwrap();

    assert!(h.journal.get("replicapool", "snap-42").unwrap().needs_image_id());
}

#[tokio::test]
async fn test_failure_after_reserve_undoes_reservation() {
    let h = TestHarness::new();
    h.journal.push_next_uuid("u2");
    h.backend.add_object(&h.image("csi-snap-u2"));
    h.journal.set_fail_on_store_image_id(true);

    let err = h
        .recovery
        .regenerate_identity(&request("ns-a"), &creds())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::Journal(JournalError::Connection(_))
    ));
    assert!(h.journal.get("replicapool", "snap-42").is_none());
    h.assert_released();
}

#[tokio::test]
async fn test_failed_undo_does_not_mask_original_error() {
    let h = TestHarness::new();
    h.backend.set_fail_on_image_id(true);
    h.journal.set_fail_on_undo(true);

    let err = h
        .recovery
        .regenerate_identity(&request("ns-a"), &creds())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Backend(_)));
    // The undo failed, so the reservation is left for the next attempt to reuse.
    assert!(h.journal.get("replicapool", "snap-42").is_some());
    h.assert_released();
}

#[tokio::test]
async fn test_reserve_failure_leaves_nothing() {
    let h = TestHarness::new();
    h.journal.set_fail_on_reserve(true);

    assert!(
        h.recovery
            .regenerate_identity(&request("ns-a"), &creds())
            .await
            .is_err()
    );
    assert_eq!(h.journal.record_count(), 0);
    h.assert_released();
}

#[tokio::test]
async fn test_handle_from_peer_cluster_is_mapped() {
    let h = TestHarness::new();
    h.journal.push_next_uuid("u2");
    let req = RegenerateRequest::new(handle("c-remote", 9, "u1"), "ns-a", "snap-42");

    let out = h.recovery.regenerate_identity(&req, &creds()).await.unwrap();
    assert_eq!(out, handle("c1", 5, "u2"));
}

#[tokio::test]
async fn test_unknown_cluster_aborts_before_locking() {
    let h = TestHarness::new();
    let req = RegenerateRequest::new(handle("c9", 5, "u1"), "ns-a", "snap-42");

    let err = h.recovery.regenerate_identity(&req, &creds()).await.unwrap_err();
    assert!(matches!(err, ProvisionError::Resolve(_)));
    assert_eq!(h.journal.sessions_opened(), 0);
    h.assert_released();
}

#[tokio::test(start_paused = true)]
async fn test_slow_backend_hits_deadline() {
    let h = TestHarness::with_settings(RecoverySettings {
        call_timeout: Duration::from_secs(1),
        ..RecoverySettings::default()
    });
    h.backend.set_connect_delay(Some(Duration::from_secs(60)));

    let err = h
        .recovery
        .regenerate_identity(&request("ns-a"), &creds())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::DeadlineExceeded {
            operation: "connect backend"
        }
    ));
    h.assert_released();
}

#[tokio::test]
async fn test_custom_journal_pool_and_prefix() {
    let h = TestHarness::with_settings(RecoverySettings {
        name_prefix: "csi-vol-".to_string(),
        journal_pool: Some("replicapool".to_string()),
        ..RecoverySettings::default()
    });
    h.journal.push_next_uuid("u3");

    h.recovery
        .regenerate_identity(&request("ns-a"), &creds())
        .await
        .unwrap();
    assert_eq!(
        h.journal.get("replicapool", "snap-42").unwrap().image_name,
        "csi-vol-u3"
    );
}
