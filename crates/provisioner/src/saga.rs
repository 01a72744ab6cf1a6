//! Compensation tracking for multi-step workflows.
//!
//! Each step records the action that undoes it. On failure the
//! recorded actions run in reverse order; each one is best-effort and its
//! failure is logged, never returned in place of the triggering error.

use std::time::Duration;

use identity::BackendObjectDescriptor;
use journal::ReservationJournal;

use crate::backend::BackendSession;
use crate::deadline::bounded;
use crate::error::Result;

/// Progress of a workflow.
///
/// A saga is created `Running` and ends either `Completed` or, after its
/// compensations ran, `RolledBack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaState {
    Running,
    /// Compensations are being applied.
    Compensating,
    Completed,
    /// `leftovers` compensations failed and may have left objects behind.
    RolledBack { leftovers: usize },
}

/// An action that undoes one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Delete an image or snapshot that the workflow may have created.
    DeleteObject(BackendObjectDescriptor),
    /// Remove a reservation that the workflow created.
    UndoReservation {
        journal_pool: String,
        image_name: String,
        request_name: String,
    },
}

impl Compensation {
    /// Short name used in logs.
    pub fn step(&self) -> &'static str {
        match self {
            Compensation::DeleteObject(object) if object.is_snapshot() => "delete_snapshot",
            Compensation::DeleteObject(_) => "delete_image",
            Compensation::UndoReservation { .. } => "undo_reservation",
        }
    }

    async fn run<B, J>(&self, backend: &B, journal: Option<&J>, limit: Duration) -> Result<()>
    where
        B: BackendSession,
        J: ReservationJournal,
    {
        match self {
            Compensation::DeleteObject(object) => {
                bounded(limit, "delete object", backend.delete_object(object)).await
            }
            Compensation::UndoReservation {
                journal_pool,
                image_name,
                request_name,
            } => match journal {
                Some(journal) => {
                    bounded(
                        limit,
                        "undo reservation",
                        journal.undo_reservation(journal_pool, image_name, request_name),
                    )
                    .await
                }
                None => {
                    tracing::warn!(%request_name, "no journal session to undo reservation");
                    Ok(())
                }
            },
        }
    }
}

/// Ordered list of compensations for the steps started so far.
#[derive(Debug)]
pub struct Saga {
    state: SagaState,
    compensations: Vec<Compensation>,
}

impl Saga {
    /// Creates a running saga with no completed steps.
    pub fn start() -> Self {
        Self {
            state: SagaState::Running,
            compensations: Vec::new(),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SagaState {
        self.state
    }

    /// Returns the compensations still pending, oldest first.
    pub fn pending(&self) -> &[Compensation] {
        &self.compensations
    }

    /// Records the compensation for a step.
    ///
    /// Record it before the step's call is issued: a call that times out may
    /// still take effect, and a compensation for an object that never
    /// appeared ends in `NotFound`, which counts as success.
    pub fn record(&mut self, compensation: Compensation) {
        self.compensations.push(compensation);
    }

    /// Marks the saga as completed; recorded compensations are discarded.
    pub fn complete(&mut self) {
        self.compensations.clear();
        self.state = SagaState::Completed;
    }

    /// Runs all recorded compensations in reverse order.
    ///
    /// `NotFound` counts as success. Returns the number of compensations that
    /// failed; those failures are logged here.
    pub async fn unwind<B, J>(&mut self, backend: &B, journal: Option<&J>, limit: Duration) -> usize
    where
        B: BackendSession,
        J: ReservationJournal,
    {
        self.state = SagaState::Compensating;
        let mut failed = 0;
        while let Some(compensation) = self.compensations.pop() {
            match compensation.run(backend, journal, limit).await {
                Ok(()) => tracing::debug!(step = compensation.step(), "compensation completed"),
                Err(e) if e.is_not_found() => {
                    tracing::debug!(step = compensation.step(), "nothing to compensate")
                }
                Err(e) => {
                    failed += 1;
                    tracing::error!(step = compensation.step(), error = %e, "compensation failed");
                }
            }
        }
        self.state = SagaState::RolledBack { leftovers: failed };
        failed
    }
}
