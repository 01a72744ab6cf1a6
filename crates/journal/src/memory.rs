use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::{Credentials, ObjectUuid};

use crate::{
    JournalConnector, JournalError, JournalTarget, Reservation, ReservationJournal,
    ReservationRecord, ReserveRequest, Result,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    namespace: String,
    journal_pool: String,
    request_name: String,
}

impl EntryKey {
    fn new(namespace: &str, journal_pool: &str, request_name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            journal_pool: journal_pool.to_string(),
            request_name: request_name.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct JournalState {
    records: HashMap<EntryKey, ReservationRecord>,
    next_uuids: VecDeque<ObjectUuid>,
    fail_on_connect: bool,
    fail_on_reserve: bool,
    fail_on_undo: bool,
    fail_on_store_image_id: bool,
    fail_on_reset_owner: bool,
}

impl JournalState {
    fn find_by_uuid_mut(
        &mut self,
        namespace: &str,
        journal_pool: &str,
        image_uuid: &ObjectUuid,
    ) -> Option<&mut ReservationRecord> {
        self.records.iter_mut().find_map(|(key, record)| {
            (key.namespace == namespace
                && key.journal_pool == journal_pool
                && &record.image_uuid == image_uuid)
                .then_some(record)
        })
    }
}

fn injected(operation: &str) -> JournalError {
    JournalError::Connection(format!("injected {operation} failure"))
}

/// In-memory reservation journal for testing.
///
/// This implementation keeps all records in memory and provides the same
/// interface as the PostgreSQL implementation. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJournal {
    state: Arc<RwLock<JournalState>>,
    open_sessions: Arc<AtomicUsize>,
    sessions_opened: Arc<AtomicUsize>,
}

impl InMemoryJournal {
    /// Creates a new empty in-memory journal.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, JournalState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, JournalState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues the UUID handed out by the next reservation.
    pub fn push_next_uuid(&self, uuid: impl Into<ObjectUuid>) {
        self.write().next_uuids.push_back(uuid.into());
    }

    /// Stores a record directly in the default namespace.
    pub fn seed(&self, record: ReservationRecord) {
        let key = EntryKey::new("", &record.journal_pool, &record.request_name);
        self.write().records.insert(key, record);
    }

    /// Returns the record held by `request_name` in the default namespace.
    pub fn get(&self, journal_pool: &str, request_name: &str) -> Option<ReservationRecord> {
        self.read()
            .records
            .get(&EntryKey::new("", journal_pool, request_name))
            .cloned()
    }

    /// Returns the total number of records across all namespaces.
    pub fn record_count(&self) -> usize {
        self.read().records.len()
    }

    /// Returns the number of sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Returns the number of sessions opened since creation.
    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    /// Configures the journal to refuse new sessions.
    pub fn set_fail_on_connect(&self, fail: bool) {
        self.write().fail_on_connect = fail;
    }

    /// Configures the journal to fail reservations.
    pub fn set_fail_on_reserve(&self, fail: bool) {
        self.write().fail_on_reserve = fail;
    }

    /// Configures the journal to fail undo calls.
    pub fn set_fail_on_undo(&self, fail: bool) {
        self.write().fail_on_undo = fail;
    }

    /// Configures the journal to fail image ID updates.
    pub fn set_fail_on_store_image_id(&self, fail: bool) {
        self.write().fail_on_store_image_id = fail;
    }

    /// Configures the journal to fail owner updates.
    pub fn set_fail_on_reset_owner(&self, fail: bool) {
        self.write().fail_on_reset_owner = fail;
    }
}

#[async_trait]
impl JournalConnector for InMemoryJournal {
    type Session = InMemoryJournalSession;

    async fn connect(
        &self,
        target: &JournalTarget,
        _credentials: &Credentials,
    ) -> Result<Self::Session> {
        if self.read().fail_on_connect {
            return Err(injected("connect"));
        }
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryJournalSession {
            journal: self.clone(),
            namespace: target.namespace.clone().unwrap_or_default(),
        })
    }
}

/// Session on an [`InMemoryJournal`]; closes on drop.
#[derive(Debug)]
pub struct InMemoryJournalSession {
    journal: InMemoryJournal,
    namespace: String,
}

impl Drop for InMemoryJournalSession {
    fn drop(&mut self) {
        self.journal.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReservationJournal for InMemoryJournalSession {
    async fn check_reservation(
        &self,
        journal_pool: &str,
        request_name: &str,
    ) -> Result<Option<ReservationRecord>> {
        let key = EntryKey::new(&self.namespace, journal_pool, request_name);
        Ok(self.journal.read().records.get(&key).cloned())
    }

    async fn reserve_name(&self, request: &ReserveRequest) -> Result<Reservation> {
        let mut state = self.journal.write();
        if state.fail_on_reserve {
            return Err(injected("reserve"));
        }

        let key = EntryKey::new(&self.namespace, &request.journal_pool, &request.request_name);
        if let Some(existing) = state.records.get(&key) {
            return Err(JournalError::ReservationConflict {
                pool: request.journal_pool.clone(),
                reason: format!(
                    "request {} already reserved as {}",
                    request.request_name, existing.image_name
                ),
            });
        }

        let image_uuid = state
            .next_uuids
            .pop_front()
            .unwrap_or_else(ObjectUuid::generate);
        if state
            .find_by_uuid_mut(&self.namespace, &request.journal_pool, &image_uuid)
            .is_some()
        {
            return Err(JournalError::ReservationConflict {
                pool: request.journal_pool.clone(),
                reason: format!("UUID {image_uuid} already reserved"),
            });
        }

        let record = request.to_record(image_uuid);
        let reservation = Reservation::from(&record);
        state.records.insert(key, record);
        Ok(reservation)
    }

    async fn undo_reservation(
        &self,
        journal_pool: &str,
        image_name: &str,
        request_name: &str,
    ) -> Result<()> {
        let mut state = self.journal.write();
        if state.fail_on_undo {
            return Err(injected("undo"));
        }

        let key = EntryKey::new(&self.namespace, journal_pool, request_name);
        match state.records.get(&key) {
            None => Ok(()),
            Some(record) if record.image_name != image_name => {
                Err(JournalError::ReservationConflict {
                    pool: journal_pool.to_string(),
                    reason: format!(
                        "request {request_name} is reserved as {}, not {image_name}",
                        record.image_name
                    ),
                })
            }
            Some(_) => {
                state.records.remove(&key);
                Ok(())
            }
        }
    }

    async fn store_image_id(
        &self,
        journal_pool: &str,
        image_uuid: &ObjectUuid,
        image_id: &str,
    ) -> Result<()> {
        let mut state = self.journal.write();
        if state.fail_on_store_image_id {
            return Err(injected("store image ID"));
        }
        let record = state
            .find_by_uuid_mut(&self.namespace, journal_pool, image_uuid)
            .ok_or_else(|| JournalError::NotFound {
                pool: journal_pool.to_string(),
                key: image_uuid.to_string(),
            })?;
        record.image_id = Some(image_id.to_string());
        Ok(())
    }

    async fn reset_owner(
        &self,
        journal_pool: &str,
        image_uuid: &ObjectUuid,
        owner: &str,
    ) -> Result<()> {
        let mut state = self.journal.write();
        if state.fail_on_reset_owner {
            return Err(injected("reset owner"));
        }
        let record = state
            .find_by_uuid_mut(&self.namespace, journal_pool, image_uuid)
            .ok_or_else(|| JournalError::NotFound {
                pool: journal_pool.to_string(),
                key: image_uuid.to_string(),
            })?;
        record.owner = Some(owner.to_string());
        Ok(())
    }
}
