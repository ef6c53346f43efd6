//! The cooperative suspension primitive connecting workflow bodies to the
//! orchestrator.
//!
//! A workflow body is an ordinary `async` block handed a [`WorkflowContext`].
//! The only legitimate await points inside a body are the three suspension
//! constructors: [`execute`](WorkflowContext::execute),
//! [`wait`](WorkflowContext::wait) and
//! [`side_effect`](WorkflowContext::side_effect). Awaiting one parks a
//! [`SuspensionRequest`] in a slot shared with the orchestrator and returns
//! `Pending`; the orchestrator observes the parked request, resolves it
//! (from history or by doing real work), deposits the result, and polls the
//! body again. The next poll of the same future takes the deposited value
//! and completes.
//!
//! The orchestrator drives the body with a noop waker: nothing about this
//! protocol needs a reactor, because every `Pending` is paired with a parked
//! request that the drive loop resolves synchronously in the same turn.
//!
//! Local variables in the body survive suspensions within a single
//! `run` call. Nothing survives across `run` calls; re-entry replays the
//! recorded history from scratch.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use serde_json::Value;

use crate::activity::Activity;
use crate::workflow::EventType;

/// Deferred computation passed to [`WorkflowContext::side_effect`].
pub(crate) type SideEffectFn = Box<dyn FnOnce() -> anyhow::Result<Value> + Send>;

/// A suspension yielded by the body, in memory only and never persisted.
pub(crate) enum SuspensionRequest {
    /// Invoke an activity and checkpoint its result.
    Activity { body: Box<dyn Activity> },
    /// Park the workflow until the relative-time expression elapses.
    Timer { duration: String },
    /// Invoke an inline thunk and checkpoint its result.
    SideEffect { thunk: SideEffectFn },
}

impl SuspensionRequest {
    pub(crate) fn kind(&self) -> RequestKind {
        match self {
            SuspensionRequest::Activity { .. } => RequestKind::Activity,
            SuspensionRequest::Timer { .. } => RequestKind::Timer,
            SuspensionRequest::SideEffect { .. } => RequestKind::SideEffect,
        }
    }
}

/// Kind of a yielded suspension request.
///
/// Used when checking a replayed request against the recorded history and in
/// the resulting non-determinism diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Activity,
    Timer,
    SideEffect,
}

impl RequestKind {
    /// The history event type that resolves this suspension kind.
    pub fn completed_event(self) -> EventType {
        match self {
            RequestKind::Activity => EventType::ActivityCompleted,
            RequestKind::Timer => EventType::TimerCompleted,
            RequestKind::SideEffect => EventType::SideEffectCompleted,
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RequestKind::Activity => "activity",
            RequestKind::Timer => "timer",
            RequestKind::SideEffect => "side_effect",
        })
    }
}

#[derive(Default)]
struct CtxInner {
    /// Request parked by the currently suspended await point, if any.
    pending: Option<SuspensionRequest>,
    /// Result deposited by the orchestrator for that await point.
    resolved: Option<Value>,
}

/// Handle through which a workflow body communicates with the orchestrator.
///
/// Cheap to clone; all clones share the same suspension slot. A context is
/// created per `run` call and handed to the body factory, it is not
/// reusable across runs.
#[derive(Clone)]
pub struct WorkflowContext {
    inner: Arc<Mutex<CtxInner>>,
}

impl WorkflowContext {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CtxInner::default())),
        }
    }

    /// Suspend on an activity. Resolves to the activity's checkpointed
    /// result: live on first execution, replayed from history afterwards.
    pub fn execute(&self, activity: impl Activity + 'static) -> Suspend {
        self.suspend(SuspensionRequest::Activity {
            body: Box::new(activity),
        })
    }

    /// Suspend on a durable timer.
    ///
    /// `duration` is a relative-time expression from the closed grammar
    /// `"N seconds|minutes|hours|days|weeks"` (see
    /// [`WaitDuration`](crate::WaitDuration)). The body will only be
    /// re-entered, in a later `run`, once the wake time computed against the
    /// store's clock has passed. Resolves to null.
    pub fn wait(&self, duration: impl Into<String>) -> Suspend {
        self.suspend(SuspensionRequest::Timer {
            duration: duration.into(),
        })
    }

    /// Suspend on an inline deferred computation.
    ///
    /// Same checkpointing semantics as an activity: the thunk runs once, its
    /// result is recorded, and every replay observes the recorded value.
    /// The canonical use is non-deterministic data (random numbers, fresh
    /// ids, the current time) that must stay stable across replays.
    pub fn side_effect<F>(&self, thunk: F) -> Suspend
    where
        F: FnOnce() -> anyhow::Result<Value> + Send + 'static,
    {
        self.suspend(SuspensionRequest::SideEffect {
            thunk: Box::new(thunk),
        })
    }

    fn suspend(&self, request: SuspensionRequest) -> Suspend {
        Suspend {
            ctx: self.clone(),
            request: Some(request),
        }
    }

    /// Take the request parked by the body's current suspension, if any.
    pub(crate) fn take_pending(&self) -> Option<SuspensionRequest> {
        self.locked().pending.take()
    }

    /// Deposit the result for the current suspension. The next poll of the
    /// suspended future completes with it.
    pub(crate) fn resolve(&self, value: Value) {
        self.locked().resolved = Some(value);
    }

    fn locked(&self) -> MutexGuard<'_, CtxInner> {
        // The drive loop is single-threaded per workflow; a poisoned lock can
        // only mean the body panicked mid-suspension, in which case the slot
        // contents are still coherent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Future returned by the suspension constructors.
///
/// First poll parks the request and stays pending; the poll after the
/// orchestrator resolves the request completes with the resolved value.
pub struct Suspend {
    ctx: WorkflowContext,
    request: Option<SuspensionRequest>,
}

impl Future for Suspend {
    type Output = Value;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Value> {
        let this = self.get_mut();
        let mut inner = this.ctx.locked();
        if let Some(value) = inner.resolved.take() {
            return Poll::Ready(value);
        }
        if let Some(request) = this.request.take() {
            inner.pending = Some(request);
        }
        Poll::Pending
    }
}
