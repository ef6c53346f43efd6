//! In-memory store implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use time::OffsetDateTime;

use super::{Clock, SystemClock, WorkflowStore};
use crate::error::{Error, Result};
use crate::workflow::{EventType, HistoryEvent, WorkflowId, WorkflowRecord, WorkflowStatus};

/// In-memory reference backend.
///
/// Backs the test suite and small embedded deployments where durability
/// across process restarts is not needed. Cheap to clone; clones share
/// state. The clock is pluggable so tests can drive time by hand.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use duraflow::{ManualClock, MemoryStore};
/// use time::macros::datetime;
///
/// let clock = Arc::new(ManualClock::new(datetime!(2023-01-01 12:00:00 UTC)));
/// let store = MemoryStore::with_clock(clock.clone());
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct Inner {
    workflows: BTreeMap<WorkflowId, WorkflowRecord>,
    history: BTreeMap<WorkflowId, Vec<HistoryEvent>>,
}

impl MemoryStore {
    /// Create a store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store on a caller-supplied clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            clock,
        }
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowStore for MemoryStore {
    async fn create(&self, id: &WorkflowId, class: &str, args: Value) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.locked();
        if inner.workflows.contains_key(id) {
            return Err(Error::WorkflowAlreadyExists(id.to_string()));
        }
        inner.workflows.insert(
            id.clone(),
            WorkflowRecord {
                id: id.clone(),
                class: class.to_owned(),
                args,
                status: WorkflowStatus::Running,
                wake_up_time: None,
                created_at: now,
                updated_at: now,
            },
        );
        inner.history.insert(id.clone(), Vec::new());
        Ok(())
    }

    async fn load(&self, id: &WorkflowId) -> Result<Option<WorkflowRecord>> {
        Ok(self.locked().workflows.get(id).cloned())
    }

    async fn append_event(
        &self,
        id: &WorkflowId,
        event_type: EventType,
        result: Option<Value>,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.locked();
        if !inner.workflows.contains_key(id) {
            return Err(Error::WorkflowNotFound(id.to_string()));
        }
        let events = inner.history.entry(id.clone()).or_default();
        let seq = events.len() as i64 + 1;
        events.push(HistoryEvent {
            workflow_id: id.clone(),
            seq,
            event_type,
            result,
            created_at: now,
        });
        Ok(())
    }

    async fn history(&self, id: &WorkflowId) -> Result<Vec<HistoryEvent>> {
        Ok(self.locked().history.get(id).cloned().unwrap_or_default())
    }

    async fn update_status(
        &self,
        id: &WorkflowId,
        status: WorkflowStatus,
        wake_up_time: Option<OffsetDateTime>,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.locked();
        let record = inner
            .workflows
            .get_mut(id)
            .ok_or_else(|| Error::WorkflowNotFound(id.to_string()))?;
        record.status = status;
        if wake_up_time.is_some() {
            record.wake_up_time = wake_up_time;
        } else if status != WorkflowStatus::Sleeping {
            record.wake_up_time = None;
        }
        record.updated_at = now;
        Ok(())
    }

    async fn try_wake(&self, id: &WorkflowId) -> Result<bool> {
        let now = self.clock.now();
        let mut inner = self.locked();
        let record = inner
            .workflows
            .get_mut(id)
            .ok_or_else(|| Error::WorkflowNotFound(id.to_string()))?;
        if record.status != WorkflowStatus::Sleeping {
            return Ok(false);
        }
        record.status = WorkflowStatus::Running;
        record.wake_up_time = None;
        record.updated_at = now;
        Ok(true)
    }

    async fn poll_ready(&self, limit: usize) -> Result<Vec<WorkflowId>> {
        let now = self.clock.now();
        let inner = self.locked();
        let mut due: Vec<(OffsetDateTime, WorkflowId)> = inner
            .workflows
            .values()
            .filter(|r| r.status == WorkflowStatus::Sleeping)
            .filter_map(|r| {
                r.wake_up_time
                    .filter(|wake| *wake <= now)
                    .map(|wake| (wake, r.id.clone()))
            })
            .collect();
        // Longest-due first so no workflow can be starved by later sleepers.
        due.sort();
        due.truncate(limit);
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    async fn now(&self) -> Result<OffsetDateTime> {
        Ok(self.clock.now())
    }
}
