//! Core workflow types: identifiers, statuses, records, and history events.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::Error;

/// A workflow instance identifier (business key).
///
/// Use natural business keys (order id, subscription id) rather than
/// synthetic UUIDs. This makes correlation intuitive and idempotency natural.
///
/// # Example
///
/// ```
/// use duraflow::WorkflowId;
///
/// let id = WorkflowId::new("sub-123");
/// assert_eq!(id.as_str(), "sub-123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Create a new workflow ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Consume the wrapper and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Borrow the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<String> for WorkflowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkflowId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Lifecycle state of a workflow instance.
///
/// A workflow is created `Running`, moves between `Running` and `Sleeping`
/// arbitrarily many times, and ends in one of the two terminal states.
/// `Sleeping` always carries a wake-up time on the record; leaving
/// `Sleeping` clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// An orchestrator is (or may be) driving the body forward.
    Running,
    /// No in-memory execution exists; a wake timestamp is persisted.
    Sleeping,
    /// The body returned. Terminal.
    Completed,
    /// The body or one of its suspensions raised. Terminal.
    Failed,
}

impl WorkflowStatus {
    /// Returns `true` for `Completed` and `Failed`.
    ///
    /// Terminal statuses are sticky: no transition ever leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    /// Stable string form, as persisted by the store.
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Sleeping => "sleeping",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "running" => Ok(WorkflowStatus::Running),
            "sleeping" => Ok(WorkflowStatus::Sleeping),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            other => Err(Error::UnknownStatus(other.to_owned())),
        }
    }
}

/// Kind of a resolved suspension in the history stream.
///
/// Each event type corresponds to exactly one suspension kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// An activity was invoked and its result checkpointed.
    ActivityCompleted,
    /// A durable timer elapsed. Carries no payload.
    TimerCompleted,
    /// An inline side-effect thunk was invoked and its result checkpointed.
    SideEffectCompleted,
}

impl EventType {
    /// Stable string form, as persisted by the store.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::ActivityCompleted => "activity_completed",
            EventType::TimerCompleted => "timer_completed",
            EventType::SideEffectCompleted => "side_effect_completed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "activity_completed" => Ok(EventType::ActivityCompleted),
            "timer_completed" => Ok(EventType::TimerCompleted),
            "side_effect_completed" => Ok(EventType::SideEffectCompleted),
            other => Err(Error::UnknownEventType(other.to_owned())),
        }
    }
}

/// Mutable per-instance record, one row per workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Caller-supplied unique identifier.
    pub id: WorkflowId,
    /// Symbolic name resolved to a body factory through the registry.
    pub class: String,
    /// Serialized constructor arguments for the body.
    pub args: Value,
    /// Current lifecycle state.
    pub status: WorkflowStatus,
    /// Absolute wake timestamp. Non-null iff `status == Sleeping`.
    pub wake_up_time: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// One resolved suspension in a workflow's append-only history.
///
/// `seq` is strictly increasing within a workflow (starting at 1) so reads
/// are deterministic. Events are never mutated or deleted while the workflow
/// is non-terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub workflow_id: WorkflowId,
    pub seq: i64,
    pub event_type: EventType,
    /// Checkpointed result. `None` for timers; activities and side effects
    /// may also legitimately produce null.
    pub result: Option<Value>,
    pub created_at: OffsetDateTime,
}
