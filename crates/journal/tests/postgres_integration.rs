//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container and need Docker.
//! Run with:
//!
//! ```bash
//! cargo test -p journal --test postgres_integration -- --ignored
//! ```

use std::sync::Arc;

use common::{Credentials, EncryptionType, ObjectUuid};
use journal::{
    JournalConnector, JournalTarget, PostgresJournal, PostgresJournalSession, ReservationJournal,
    ReserveRequest,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_reservations_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Each test gets its own instance ID, so tests never see each other's rows.
async fn get_test_journal() -> PostgresJournal {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    PostgresJournal::new(pool, ObjectUuid::generate().into_inner())
}

async fn open(journal: &PostgresJournal) -> PostgresJournalSession {
    journal
        .connect(&JournalTarget::default(), &Credentials::new("admin", "key"))
        .await
        .unwrap()
}

fn request(name: &str) -> ReserveRequest {
    ReserveRequest::new("replicapool", 5, name, "csi-snap-")
        .with_owner("ns-a")
        .with_encryption(EncryptionType::Block)
}

#[tokio::test]
#[ignore = "requires docker"]
async fn reserve_and_check_reservation() {
    let journal = get_test_journal().await;
    let session = open(&journal).await;

    let reservation = session.reserve_name(&request("snap-42")).await.unwrap();
    assert!(reservation.image_name.starts_with("csi-snap-"));

    let record = session
        .check_reservation("replicapool", "snap-42")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.image_uuid, reservation.image_uuid);
    assert_eq!(record.image_name, reservation.image_name);
    assert_eq!(record.pool_id, 5);
    assert_eq!(record.encryption, EncryptionType::Block);
    assert!(record.is_owned_by("ns-a"));
    assert!(record.needs_image_id());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn duplicate_request_is_a_conflict() {
    let journal = get_test_journal().await;
    let session = open(&journal).await;

    session.reserve_name(&request("snap-42")).await.unwrap();
    let err = session.reserve_name(&request("snap-42")).await.unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn undo_reservation_is_idempotent() {
    let journal = get_test_journal().await;
    let session = open(&journal).await;

    let reservation = session.reserve_name(&request("snap-42")).await.unwrap();
    for _ in 0..2 {
        session
            .undo_reservation("replicapool", &reservation.image_name, "snap-42")
            .await
            .unwrap();
    }
    assert!(
        session
            .check_reservation("replicapool", "snap-42")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
#[ignore = "requires docker"]
async fn undo_with_wrong_image_name_is_refused() {
    let journal = get_test_journal().await;
    let session = open(&journal).await;

    session.reserve_name(&request("snap-42")).await.unwrap();
    let err = session
        .undo_reservation("replicapool", "csi-snap-other", "snap-42")
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn store_image_id_and_reset_owner() {
    let journal = get_test_journal().await;
    let session = open(&journal).await;
    let reservation = session.reserve_name(&request("snap-42")).await.unwrap();

    session
        .store_image_id("replicapool", &reservation.image_uuid, "10a2b3")
        .await
        .unwrap();
    session
        .reset_owner("replicapool", &reservation.image_uuid, "ns-b")
        .await
        .unwrap();

    let record = session
        .check_reservation("replicapool", "snap-42")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.image_id.as_deref(), Some("10a2b3"));
    assert!(record.is_owned_by("ns-b"));
    assert_eq!(record.image_name, reservation.image_name);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn updates_on_missing_record_are_not_found() {
    let journal = get_test_journal().await;
    let session = open(&journal).await;

    let err = session
        .store_image_id("replicapool", &ObjectUuid::new("ghost"), "10a2b3")
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = session
        .reset_owner("replicapool", &ObjectUuid::new("ghost"), "ns-b")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn namespaces_are_isolated() {
    let journal = get_test_journal().await;
    let default_ns = open(&journal).await;
    let tenant = journal
        .connect(
            &JournalTarget::default().with_namespace(Some("tenant-a".to_string())),
            &Credentials::new("admin", "key"),
        )
        .await
        .unwrap();

    tenant.reserve_name(&request("snap-42")).await.unwrap();
    assert!(
        default_ns
            .check_reservation("replicapool", "snap-42")
            .await
            .unwrap()
            .is_none()
    );
}
