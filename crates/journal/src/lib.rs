//! Reservation journal for backend object identities.
//!
//! The journal maps a caller-supplied request name to the object UUID and
//! image name reserved for it, scoped per storage pool. It is the only
//! persistent state behind idempotent provisioning and recovery.

pub mod error;
pub mod journal;
pub mod memory;
pub mod postgres;
pub mod record;

pub use common::{EncryptionType, ObjectUuid};
pub use error::{JournalError, Result};
pub use journal::{JournalConnector, JournalTarget, ReservationJournal};
pub use memory::{InMemoryJournal, InMemoryJournalSession};
pub use postgres::{PostgresJournal, PostgresJournalSession};
pub use record::{Reservation, ReservationRecord, ReserveRequest};
