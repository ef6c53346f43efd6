//! Storage abstraction for workflow records and history.
//!
//! This module provides the [`WorkflowStore`] trait that abstracts over
//! storage backends, plus the [`Clock`] the store answers time queries from.
//! Two implementations are provided:
//!
//! - [`MemoryStore`] — in-memory reference backend for tests and embedding
//! - [`PgStore`] — PostgreSQL storage for production (requires the
//!   `postgres` feature)

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

use std::future::Future;
use std::sync::{Mutex, PoisonError};

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

use serde_json::Value;
use time::OffsetDateTime;

use crate::error::Result;
use crate::workflow::{EventType, HistoryEvent, WorkflowId, WorkflowRecord, WorkflowStatus};

/// Time source owned by the store.
///
/// All wake-time arithmetic and readiness checks go through the store's
/// clock, never the process clock, so tests can substitute a fake.
pub trait Clock: Send + Sync + 'static {
    /// The current timestamp.
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to. For tests.
///
/// # Example
///
/// ```
/// use duraflow::{Clock, ManualClock};
/// use time::macros::datetime;
///
/// let clock = ManualClock::new(datetime!(2023-01-01 12:00:00 UTC));
/// clock.advance(time::Duration::days(7));
/// assert_eq!(clock.now(), datetime!(2023-01-08 12:00:00 UTC));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jump the clock to an absolute timestamp.
    pub fn set(&self, to: OffsetDateTime) {
        *self.locked() = to;
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: time::Duration) {
        let mut now = self.locked();
        *now += delta;
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, OffsetDateTime> {
        self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.locked()
    }
}

/// Durable storage of workflow records and append-only history.
///
/// All mutations observed by one caller must be observed by subsequent
/// callers (read-your-writes). Per-workflow insertion order of history
/// events must be strictly preserved; `seq` is strictly increasing within a
/// workflow.
///
/// Backends do not enforce the single-orchestrator-per-workflow rule by
/// themselves; [`try_wake`](Self::try_wake) is the compare-and-swap the
/// orchestrator uses so that concurrent workers cannot both re-enter the
/// same sleeping workflow.
pub trait WorkflowStore: Send + Sync + Clone + 'static {
    /// Insert a new workflow with `status = running` and empty history.
    ///
    /// Fails with [`Error::WorkflowAlreadyExists`](crate::Error::WorkflowAlreadyExists)
    /// if the id is taken.
    fn create(
        &self,
        id: &WorkflowId,
        class: &str,
        args: Value,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Load a workflow record, or `None` if the id is unknown.
    fn load(&self, id: &WorkflowId) -> impl Future<Output = Result<Option<WorkflowRecord>>> + Send;

    /// Append one history event with the store's current time.
    ///
    /// The event is assigned the next `seq` for the workflow.
    fn append_event(
        &self,
        id: &WorkflowId,
        event_type: EventType,
        result: Option<Value>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Full ordered history for a workflow, oldest first.
    fn history(&self, id: &WorkflowId) -> impl Future<Output = Result<Vec<HistoryEvent>>> + Send;

    /// Atomically update the record's status.
    ///
    /// If `wake_up_time` is supplied it is stored; otherwise, when the new
    /// status is not `Sleeping`, any existing wake time is cleared.
    fn update_status(
        &self,
        id: &WorkflowId,
        status: WorkflowStatus,
        wake_up_time: Option<OffsetDateTime>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Compare-and-swap `sleeping -> running`, clearing the wake time.
    ///
    /// Returns `false` if the workflow was not sleeping, which tells a
    /// worker that another orchestrator already claimed the wake.
    fn try_wake(&self, id: &WorkflowId) -> impl Future<Output = Result<bool>> + Send;

    /// Ids of sleeping workflows whose wake time has arrived, at most
    /// `limit` of them, ordered so that the longest-due come first.
    ///
    /// Never returns an id whose `wake_up_time` is in the store's future.
    fn poll_ready(&self, limit: usize) -> impl Future<Output = Result<Vec<WorkflowId>>> + Send;

    /// The store clock's current timestamp.
    fn now(&self) -> impl Future<Output = Result<OffsetDateTime>> + Send;
}
