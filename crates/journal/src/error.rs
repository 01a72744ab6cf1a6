use thiserror::Error;

/// Errors that can occur when interacting with the reservation journal.
#[derive(Debug, Error)]
pub enum JournalError {
    /// No reservation exists for the given key.
    #[error("reservation not found in pool {pool}: {key}")]
    NotFound { pool: String, key: String },

    /// Two distinct reservations would claim the same identity.
    #[error("reservation conflict in pool {pool}: {reason}")]
    ReservationConflict { pool: String, reason: String },

    /// The journal could not be reached.
    #[error("journal connection failed: {0}")]
    Connection(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored value could not be interpreted.
    #[error("corrupt journal entry: {0}")]
    Corrupt(String),
}

impl JournalError {
    /// Returns true if the error means the reservation is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, JournalError::NotFound { .. })
    }

    /// Returns true if the error is a reservation conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, JournalError::ReservationConflict { .. })
    }
}

/// Result type for journal operations.
pub type Result<T> = std::result::Result<T, JournalError>;
