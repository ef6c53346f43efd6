//! The replay loop that drives a single workflow forward.

use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use serde_json::Value;
use tracing::{debug, error, info};

use crate::context::{SuspensionRequest, WorkflowContext};
use crate::duration::WaitDuration;
use crate::error::{Error, Result};
use crate::registry::WorkflowRegistry;
use crate::store::WorkflowStore;
use crate::workflow::{EventType, WorkflowId, WorkflowStatus};

/// How a `run` call left the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The body returned; the workflow is terminal.
    Completed,
    /// The workflow is parked on a durable timer (or was not due yet).
    Sleeping,
    /// The body, an activity, or a side effect raised; the workflow is
    /// terminal. The cause is logged, history keeps everything up to but not
    /// including the failing step.
    Failed,
}

/// Drives workflows to their next suspension point or to completion.
///
/// The orchestrator owns no cross-call state: everything it needs is loaded
/// from the store at the start of each [`run`](Self::run) and every
/// progression is persisted before `run` returns. Cheap to clone.
pub struct Orchestrator<S> {
    store: S,
    registry: Arc<WorkflowRegistry>,
}

impl<S> Clone for Orchestrator<S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<S> Orchestrator<S>
where
    S: WorkflowStore,
{
    /// Create an orchestrator over a store and a fully built registry.
    pub fn new(store: S, registry: WorkflowRegistry) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one workflow until it completes, parks on a timer, or fails.
    ///
    /// The algorithm:
    ///
    /// 1. Load the record. Unknown id is a caller error; nothing is
    ///    persisted. Terminal workflows are returned as-is untouched.
    /// 2. Wake handling: a sleeping workflow that is not yet due is left
    ///    alone. A due one is claimed with a compare-and-swap back to
    ///    `running` (losing the swap means another worker got there first)
    ///    and exactly one `timer_completed` event is appended, closing the
    ///    scheduled/fired pair before the body observes anything.
    /// 3. Instantiate the body from the registry and read the full history.
    /// 4. Drive the body. Each suspension is resolved from history while
    ///    the cursor has events left (a kind mismatch is non-determinism
    ///    and fails the workflow); past the end of history, activities and
    ///    side effects are executed live and checkpointed, and a timer
    ///    persists `sleeping` plus the wake time and returns.
    /// 5. When the body returns the workflow is `completed`; any error
    ///    escaping the body or a live suspension marks it `failed`.
    ///
    /// Store I/O failures bubble up without changing the workflow's status;
    /// the next poll will observe unchanged state and retry from replay.
    pub async fn run(&self, id: &WorkflowId) -> Result<RunOutcome> {
        let record = self
            .store
            .load(id)
            .await?
            .ok_or_else(|| Error::WorkflowNotFound(id.to_string()))?;

        match record.status {
            WorkflowStatus::Completed => return Ok(RunOutcome::Completed),
            WorkflowStatus::Failed => return Ok(RunOutcome::Failed),
            WorkflowStatus::Sleeping => {
                let now = self.store.now().await?;
                if record.wake_up_time.is_some_and(|wake| wake > now) {
                    return Ok(RunOutcome::Sleeping);
                }
                if !self.store.try_wake(id).await? {
                    debug!(workflow_id = %id, "Wake already claimed by another worker");
                    return Ok(RunOutcome::Sleeping);
                }
                self.store
                    .append_event(id, EventType::TimerCompleted, None)
                    .await?;
            }
            WorkflowStatus::Running => {}
        }

        let ctx = WorkflowContext::new();
        let Some(mut body) =
            self.registry
                .instantiate(&record.class, ctx.clone(), record.args.clone())
        else {
            return self
                .fail(id, Error::UnknownWorkflowClass(record.class.clone()))
                .await;
        };

        let history = self.store.history(id).await?;
        let mut cursor = 0usize;

        loop {
            // A fresh context per poll: nothing in this protocol needs a real
            // waker, and `Context` must not live across the awaits below.
            let polled = {
                let mut poll_cx = Context::from_waker(Waker::noop());
                body.as_mut().poll(&mut poll_cx)
            };
            match polled {
                Poll::Ready(Ok(output)) => {
                    self.store
                        .update_status(id, WorkflowStatus::Completed, None)
                        .await?;
                    info!(workflow_id = %id, replayed = cursor, "Workflow completed");
                    debug!(workflow_id = %id, %output, "Workflow output");
                    return Ok(RunOutcome::Completed);
                }
                Poll::Ready(Err(e)) => {
                    return self.fail(id, format!("{e:#}")).await;
                }
                Poll::Pending => {
                    let Some(request) = ctx.take_pending() else {
                        return self
                            .fail(id, Error::SuspendedOutsideContext(id.to_string()))
                            .await;
                    };

                    if let Some(event) = history.get(cursor) {
                        // Replay branch: resolve from history, never re-execute.
                        if event.event_type != request.kind().completed_event() {
                            let err = Error::non_deterministic_replay(
                                id.as_str(),
                                cursor,
                                event.event_type,
                                request.kind(),
                            );
                            return self.fail(id, err).await;
                        }
                        cursor += 1;
                        ctx.resolve(event.result.clone().unwrap_or(Value::Null));
                        continue;
                    }

                    // Live branch: history is exhausted, do real work.
                    match request {
                        SuspensionRequest::Activity { body: activity } => {
                            match activity.handle().await {
                                Ok(result) => {
                                    self.store
                                        .append_event(
                                            id,
                                            EventType::ActivityCompleted,
                                            Some(result.clone()),
                                        )
                                        .await?;
                                    ctx.resolve(result);
                                }
                                Err(e) => {
                                    return self.fail(id, format!("activity failed: {e:#}")).await;
                                }
                            }
                        }
                        SuspensionRequest::SideEffect { thunk } => match thunk() {
                            Ok(result) => {
                                self.store
                                    .append_event(
                                        id,
                                        EventType::SideEffectCompleted,
                                        Some(result.clone()),
                                    )
                                    .await?;
                                ctx.resolve(result);
                            }
                            Err(e) => {
                                return self.fail(id, format!("side effect failed: {e:#}")).await;
                            }
                        },
                        SuspensionRequest::Timer { duration } => {
                            let duration: WaitDuration = match duration.parse() {
                                Ok(d) => d,
                                Err(e) => return self.fail(id, e).await,
                            };
                            let wake = self.store.now().await? + duration.as_time_duration();
                            self.store
                                .update_status(id, WorkflowStatus::Sleeping, Some(wake))
                                .await?;
                            debug!(workflow_id = %id, wake_up_time = %wake, "Workflow sleeping");
                            // The body stays suspended in memory only; the
                            // next run replays it from scratch.
                            return Ok(RunOutcome::Sleeping);
                        }
                    }
                }
            }
        }
    }

    async fn fail(&self, id: &WorkflowId, reason: impl std::fmt::Display) -> Result<RunOutcome> {
        error!(workflow_id = %id, error = %reason, "Workflow failed");
        self.store
            .update_status(id, WorkflowStatus::Failed, None)
            .await?;
        Ok(RunOutcome::Failed)
    }
}
