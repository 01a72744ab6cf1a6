use async_trait::async_trait;
use common::{Credentials, EncryptionType, ObjectUuid};
use sqlx::{PgPool, Postgres, Row, pool::PoolConnection, postgres::PgRow};
use tokio::sync::Mutex;

use crate::{
    JournalConnector, JournalError, JournalTarget, Reservation, ReservationJournal,
    ReservationRecord, ReserveRequest, Result,
};

const RESERVATION_PKEY: &str = "reservations_pkey";
const UNIQUE_IMAGE_UUID: &str = "unique_image_uuid";

/// PostgreSQL-backed reservation journal.
///
/// Several provisioner instances may share one database; `instance_id`
/// keeps their reservations apart.
#[derive(Clone)]
pub struct PostgresJournal {
    pool: PgPool,
    instance_id: String,
}

impl PostgresJournal {
    /// Creates a new PostgreSQL journal.
    pub fn new(pool: PgPool, instance_id: impl Into<String>) -> Self {
        Self {
            pool,
            instance_id: instance_id.into(),
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

#[async_trait]
impl JournalConnector for PostgresJournal {
    type Session = PostgresJournalSession;

    async fn connect(
        &self,
        target: &JournalTarget,
        _credentials: &Credentials,
    ) -> Result<Self::Session> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| JournalError::Connection(e.to_string()))?;
        tracing::debug!(instance_id = %self.instance_id, "journal session opened");
        Ok(PostgresJournalSession {
            conn: Mutex::new(conn),
            instance_id: self.instance_id.clone(),
            namespace: target.namespace.clone().unwrap_or_default(),
        })
    }
}

/// Session holding one pooled connection; the connection returns to the
/// pool on drop.
pub struct PostgresJournalSession {
    conn: Mutex<PoolConnection<Postgres>>,
    instance_id: String,
    namespace: String,
}

impl PostgresJournalSession {
    fn row_to_record(row: PgRow) -> Result<ReservationRecord> {
        let encryption: String = row.try_get("encryption")?;
        let encryption = encryption
            .parse::<EncryptionType>()
            .map_err(|e| JournalError::Corrupt(e.to_string()))?;

        Ok(ReservationRecord {
            request_name: row.try_get("request_name")?,
            journal_pool: row.try_get("journal_pool")?,
            pool: row.try_get("pool")?,
            pool_id: row.try_get("pool_id")?,
            image_uuid: ObjectUuid::new(row.try_get::<String, _>("image_uuid")?),
            image_name: row.try_get("image_name")?,
            image_id: row.try_get("image_id")?,
            owner: row.try_get("owner")?,
            parent_name: row.try_get("parent_name")?,
            encryption,
            reserved_at: row.try_get("reserved_at")?,
        })
    }

    fn not_found(journal_pool: &str, image_uuid: &ObjectUuid) -> JournalError {
        JournalError::NotFound {
            pool: journal_pool.to_string(),
            key: image_uuid.to_string(),
        }
    }
}

#[async_trait]
impl ReservationJournal for PostgresJournalSession {
    async fn check_reservation(
        &self,
        journal_pool: &str,
        request_name: &str,
    ) -> Result<Option<ReservationRecord>> {
        let mut conn = self.conn.lock().await;
        let row = sqlx::query(
            r#"
            SELECT request_name, journal_pool, pool, pool_id, image_uuid, image_name,
                   image_id, owner, parent_name, encryption, reserved_at
            FROM reservations
            WHERE instance_id = $1 AND namespace = $2 AND journal_pool = $3 AND request_name = $4
            "#,
        )
        .bind(&self.instance_id)
        .bind(&self.namespace)
        .bind(journal_pool)
        .bind(request_name)
        .fetch_optional(&mut **conn)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn reserve_name(&self, request: &ReserveRequest) -> Result<Reservation> {
        let record = request.to_record(ObjectUuid::generate());
        let mut conn = self.conn.lock().await;

        // A single INSERT is atomic: either the whole record lands or nothing does.
        sqlx::query(
            r#"
            INSERT INTO reservations (instance_id, namespace, journal_pool, journal_pool_id,
                                      pool, pool_id, request_name, image_uuid, image_name,
                                      owner, parent_name, encryption, reserved_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&self.instance_id)
        .bind(&self.namespace)
        .bind(&request.journal_pool)
        .bind(request.journal_pool_id)
        .bind(&record.pool)
        .bind(record.pool_id)
        .bind(&record.request_name)
        .bind(record.image_uuid.as_str())
        .bind(&record.image_name)
        .bind(&record.owner)
        .bind(&record.parent_name)
        .bind(record.encryption.as_str())
        .bind(record.reserved_at)
        .execute(&mut **conn)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && matches!(db_err.constraint(), Some(RESERVATION_PKEY | UNIQUE_IMAGE_UUID))
            {
                return JournalError::ReservationConflict {
                    pool: request.journal_pool.clone(),
                    reason: format!(
                        "request {} or UUID {} already reserved",
                        request.request_name, record.image_uuid
                    ),
                };
            }
            JournalError::Database(e)
        })?;

        Ok(Reservation::from(&record))
    }

    async fn undo_reservation(
        &self,
        journal_pool: &str,
        image_name: &str,
        request_name: &str,
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let deleted = sqlx::query(
            r#"
            DELETE FROM reservations
            WHERE instance_id = $1 AND namespace = $2 AND journal_pool = $3
              AND request_name = $4 AND image_name = $5
            "#,
        )
        .bind(&self.instance_id)
        .bind(&self.namespace)
        .bind(journal_pool)
        .bind(request_name)
        .bind(image_name)
        .execute(&mut **conn)
        .await?
        .rows_affected();

        if deleted > 0 {
            return Ok(());
        }

        let held: Option<String> = sqlx::query_scalar(
            r#"
            SELECT image_name FROM reservations
            WHERE instance_id = $1 AND namespace = $2 AND journal_pool = $3 AND request_name = $4
            "#,
        )
        .bind(&self.instance_id)
        .bind(&self.namespace)
        .bind(journal_pool)
        .bind(request_name)
        .fetch_optional(&mut **conn)
        .await?;

        match held {
            None => Ok(()),
            Some(held) => Err(JournalError::ReservationConflict {
                pool: journal_pool.to_string(),
                reason: format!("request {request_name} is reserved as {held}, not {image_name}"),
            }),
        }
    }

    async fn store_image_id(
        &self,
        journal_pool: &str,
        image_uuid: &ObjectUuid,
        image_id: &str,
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let updated = sqlx::query(
            r#"
            UPDATE reservations SET image_id = $5
            WHERE instance_id = $1 AND namespace = $2 AND journal_pool = $3 AND image_uuid = $4
            "#,
        )
        .bind(&self.instance_id)
        .bind(&self.namespace)
        .bind(journal_pool)
        .bind(image_uuid.as_str())
        .bind(image_id)
        .execute(&mut **conn)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(Self::not_found(journal_pool, image_uuid));
        }
        Ok(())
    }

    async fn reset_owner(
        &self,
        journal_pool: &str,
        image_uuid: &ObjectUuid,
        owner: &str,
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let updated = sqlx::query(
            r#"
            UPDATE reservations SET owner = $5
            WHERE instance_id = $1 AND namespace = $2 AND journal_pool = $3 AND image_uuid = $4
            "#,
        )
        .bind(&self.instance_id)
        .bind(&self.namespace)
        .bind(journal_pool)
        .bind(image_uuid.as_str())
        .bind(owner)
        .execute(&mut **conn)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(Self::not_found(journal_pool, image_uuid));
        }
        Ok(())
    }
}
