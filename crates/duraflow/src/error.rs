//! Error types for duraflow.

use thiserror::Error;

use crate::context::RequestKind;
use crate::workflow::EventType;

/// A `Result` alias with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in duraflow operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to serialize or deserialize workflow args or history results.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The workflow id does not exist in the store.
    ///
    /// Returned by the orchestrator when `run` is called for an unknown id.
    /// Nothing is persisted in this case.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// A workflow with this id has already been created.
    #[error("workflow already exists: {0}")]
    WorkflowAlreadyExists(String),

    /// The workflow's class name is not present in the registry.
    #[error("unknown workflow class: {0}")]
    UnknownWorkflowClass(String),

    /// A workflow class was registered more than once.
    #[error("duplicate workflow class registration: {0}")]
    DuplicateWorkflowClass(String),

    /// A stored status string did not match any known workflow status.
    #[error("unknown workflow status: {0}")]
    UnknownStatus(String),

    /// A stored event type string did not match any known history event type.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// A `wait` duration string was not in the supported
    /// `"N seconds|minutes|hours|days|weeks"` grammar.
    #[error("invalid wait duration {input:?}: {reason}")]
    InvalidWaitDuration {
        /// The raw duration expression.
        input: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The body's sequence of suspensions diverged from the recorded history.
    ///
    /// Includes the position in the stream (0-indexed), the event kind history
    /// recorded there, and the kind the body requested instead. The workflow
    /// is marked failed when this is detected.
    #[error(
        "non-deterministic replay of workflow {workflow_id} at sequence {sequence}: \
         history recorded {recorded}, body requested {requested}"
    )]
    NonDeterministicReplay {
        /// The workflow instance ID.
        workflow_id: String,
        /// The event's position in the stream (0-indexed).
        sequence: usize,
        /// The event kind found in history.
        recorded: EventType,
        /// The suspension kind the body yielded.
        requested: RequestKind,
    },

    /// The body returned `Pending` without parking a suspension request,
    /// i.e. it awaited a future that did not come from its
    /// [`WorkflowContext`](crate::WorkflowContext).
    #[error("workflow {0} suspended outside the workflow context")]
    SuspendedOutsideContext(String),

    /// PostgreSQL storage error.
    ///
    /// Preserves the full `sqlx::Error` for matching on specific database
    /// error conditions.
    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),
}

impl Error {
    /// Create a non-determinism error with replay context.
    pub fn non_deterministic_replay(
        workflow_id: impl Into<String>,
        sequence: usize,
        recorded: EventType,
        requested: RequestKind,
    ) -> Self {
        Error::NonDeterministicReplay {
            workflow_id: workflow_id.into(),
            sequence,
            recorded,
            requested,
        }
    }
}
