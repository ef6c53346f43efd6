//! End-to-end engine scenarios over the in-memory store.
//!
//! These tests drive complete workflow lifecycles: live execution, durable
//! timers, replay after re-entry, non-determinism detection, and worker
//! isolation. The store clock is a [`ManualClock`] so timers are exercised
//! without waiting on wall-clock time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use duraflow::{
    Activity, EventType, ManualClock, MemoryStore, Orchestrator, RunOutcome, Worker, WorkerConfig,
    WorkflowContext, WorkflowId, WorkflowRegistry, WorkflowStatus, WorkflowStore,
};
use serde_json::{Value, json};
use time::macros::datetime;

const START: time::OffsetDateTime = datetime!(2023-01-01 12:00:00 UTC);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn store_at(start: time::OffsetDateTime) -> (MemoryStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start));
    (MemoryStore::with_clock(clock.clone()), clock)
}

/// Activity that counts its invocations, for at-most-once assertions.
struct MockActivity {
    label: String,
    calls: Arc<AtomicUsize>,
}

impl MockActivity {
    fn new(label: &str, calls: Arc<AtomicUsize>) -> Self {
        Self {
            label: label.to_owned(),
            calls,
        }
    }
}

#[async_trait]
impl Activity for MockActivity {
    async fn handle(&self) -> anyhow::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!(format!("Processed: {}", self.label)))
    }
}

fn event_kinds(history: &[duraflow::HistoryEvent]) -> Vec<EventType> {
    history.iter().map(|e| e.event_type).collect()
}

// =============================================================================
// Scenario A: signup, 7-day wait, charge
// =============================================================================

#[tokio::test]
async fn signup_wait_charge_lifecycle() {
    init_tracing();
    let (store, clock) = store_at(START);
    let signup_calls = Arc::new(AtomicUsize::new(0));
    let charge_calls = Arc::new(AtomicUsize::new(0));

    let mut registry = WorkflowRegistry::new();
    {
        let signup_calls = Arc::clone(&signup_calls);
        let charge_calls = Arc::clone(&charge_calls);
        registry
            .register("subscription", move |ctx: WorkflowContext, _args: Value| {
                let signup = MockActivity::new("Signup", Arc::clone(&signup_calls));
                let charge = MockActivity::new("Charge", Arc::clone(&charge_calls));
                async move {
                    let s = ctx.execute(signup).await;
                    ctx.wait("7 days").await;
                    let c = ctx.execute(charge).await;
                    Ok(json!(format!(
                        "Done: {} -> {}",
                        s.as_str().unwrap_or_default(),
                        c.as_str().unwrap_or_default()
                    )))
                }
            })
            .unwrap();
    }

    let orchestrator = Orchestrator::new(store.clone(), registry);
    let id = WorkflowId::new("sub-1");
    store.create(&id, "subscription", json!("acme")).await.unwrap();

    // First run: signup executes live, then the body parks on the timer.
    assert_eq!(orchestrator.run(&id).await.unwrap(), RunOutcome::Sleeping);

    let record = store.load(&id).await.unwrap().unwrap();
    assert_eq!(record.status, WorkflowStatus::Sleeping);
    assert_eq!(record.wake_up_time, Some(datetime!(2023-01-08 12:00:00 UTC)));

    let history = store.history(&id).await.unwrap();
    assert_eq!(event_kinds(&history), vec![EventType::ActivityCompleted]);
    assert_eq!(history[0].result, Some(json!("Processed: Signup")));
    assert_eq!(signup_calls.load(Ordering::SeqCst), 1);

    // Not due yet: the poll sees nothing.
    assert!(store.poll_ready(10).await.unwrap().is_empty());

    // One second past the wake time, the poll surfaces it and the worker
    // drives it to completion.
    clock.set(datetime!(2023-01-08 12:00:01 UTC));
    assert_eq!(store.poll_ready(10).await.unwrap(), vec![id.clone()]);

    let worker = Worker::new(orchestrator, WorkerConfig::default());
    assert_eq!(worker.run_once().await.unwrap(), 1);

    let record = store.load(&id).await.unwrap().unwrap();
    assert_eq!(record.status, WorkflowStatus::Completed);
    assert!(record.wake_up_time.is_none());

    let history = store.history(&id).await.unwrap();
    assert_eq!(
        event_kinds(&history),
        vec![
            EventType::ActivityCompleted,
            EventType::TimerCompleted,
            EventType::ActivityCompleted,
        ]
    );
    assert_eq!(history[1].result, None);
    assert_eq!(history[2].result, Some(json!("Processed: Charge")));

    // Signup replayed from history, not re-invoked.
    assert_eq!(signup_calls.load(Ordering::SeqCst), 1);
    assert_eq!(charge_calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Scenario B: edited body is caught as non-deterministic replay
// =============================================================================

#[tokio::test]
async fn edited_body_fails_as_non_deterministic() {
    init_tracing();
    let (store, clock) = store_at(START);
    let calls = Arc::new(AtomicUsize::new(0));
    let id = WorkflowId::new("promo-1");

    // Version 1: activity first, then a timer.
    let mut registry_v1 = WorkflowRegistry::new();
    {
        let calls = Arc::clone(&calls);
        registry_v1
            .register("promo", move |ctx: WorkflowContext, _args: Value| {
                let activity = MockActivity::new("Reserve", Arc::clone(&calls));
                async move {
                    ctx.execute(activity).await;
                    ctx.wait("1 minutes").await;
                    Ok(Value::Null)
                }
            })
            .unwrap();
    }

    store.create(&id, "promo", Value::Null).await.unwrap();
    let v1 = Orchestrator::new(store.clone(), registry_v1);
    assert_eq!(v1.run(&id).await.unwrap(), RunOutcome::Sleeping);
    assert_eq!(
        event_kinds(&store.history(&id).await.unwrap()),
        vec![EventType::ActivityCompleted]
    );

    // The author swaps the order: timer first. History no longer matches.
    let mut registry_v2 = WorkflowRegistry::new();
    {
        let calls = Arc::clone(&calls);
        registry_v2
            .register("promo", move |ctx: WorkflowContext, _args: Value| {
                let activity = MockActivity::new("Reserve", Arc::clone(&calls));
                async move {
                    ctx.wait("1 minutes").await;
                    ctx.execute(activity).await;
                    Ok(Value::Null)
                }
            })
            .unwrap();
    }

    clock.advance(time::Duration::minutes(2));
    let v2 = Orchestrator::new(store.clone(), registry_v2);
    assert_eq!(v2.run(&id).await.unwrap(), RunOutcome::Failed);

    let record = store.load(&id).await.unwrap().unwrap();
    assert_eq!(record.status, WorkflowStatus::Failed);

    // Wake handling recorded the timer resolution before replay diverged;
    // nothing after the divergence point was appended.
    assert_eq!(
        event_kinds(&store.history(&id).await.unwrap()),
        vec![EventType::ActivityCompleted, EventType::TimerCompleted]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Scenario C: side-effect replay stability
// =============================================================================

#[tokio::test]
async fn completed_workflow_never_reinvokes_the_thunk() {
    let (store, _clock) = store_at(START);
    let thunk_calls = Arc::new(AtomicUsize::new(0));

    let mut registry = WorkflowRegistry::new();
    {
        let thunk_calls = Arc::clone(&thunk_calls);
        registry
            .register("roll", move |ctx: WorkflowContext, _args: Value| {
                let thunk_calls = Arc::clone(&thunk_calls);
                async move {
                    let x = ctx
                        .side_effect(move || {
                            thunk_calls.fetch_add(1, Ordering::SeqCst);
                            Ok(json!(0.42))
                        })
                        .await;
                    Ok(x)
                }
            })
            .unwrap();
    }

    let orchestrator = Orchestrator::new(store.clone(), registry);
    let id = WorkflowId::new("roll-1");
    store.create(&id, "roll", Value::Null).await.unwrap();

    assert_eq!(orchestrator.run(&id).await.unwrap(), RunOutcome::Completed);
    let history = store.history(&id).await.unwrap();
    assert_eq!(event_kinds(&history), vec![EventType::SideEffectCompleted]);
    assert_eq!(history[0].result, Some(json!(0.42)));

    assert_eq!(orchestrator.run(&id).await.unwrap(), RunOutcome::Completed);
    assert_eq!(thunk_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn replay_resumes_with_the_recorded_side_effect_value() {
    let (store, clock) = store_at(START);
    let thunk_calls = Arc::new(AtomicUsize::new(0));
    let observed: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));

    let mut registry = WorkflowRegistry::new();
    {
        let thunk_calls = Arc::clone(&thunk_calls);
        let observed = Arc::clone(&observed);
        registry
            .register("roll_and_wait", move |ctx: WorkflowContext, _args: Value| {
                let thunk_calls = Arc::clone(&thunk_calls);
                let observed = Arc::clone(&observed);
                async move {
                    let x = ctx
                        .side_effect(move || {
                            // A fresh value every invocation, so a re-run
                            // would be visible in the observations.
                            let n = thunk_calls.fetch_add(1, Ordering::SeqCst);
                            Ok(json!(n))
                        })
                        .await;
                    observed.lock().unwrap().push(x.clone());
                    ctx.wait("1 minutes").await;
                    Ok(x)
                }
            })
            .unwrap();
    }

    let orchestrator = Orchestrator::new(store.clone(), registry);
    let id = WorkflowId::new("roll-2");
    store.create(&id, "roll_and_wait", Value::Null).await.unwrap();

    assert_eq!(orchestrator.run(&id).await.unwrap(), RunOutcome::Sleeping);

    clock.advance(time::Duration::minutes(2));
    assert_eq!(orchestrator.run(&id).await.unwrap(), RunOutcome::Completed);

    // The thunk ran once; the replayed body observed the same value again.
    assert_eq!(thunk_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*observed.lock().unwrap(), vec![json!(0), json!(0)]);
}

// =============================================================================
// Round-trip law: pure-live and pure-replay runs agree
// =============================================================================

#[tokio::test]
async fn cold_run_and_pure_replay_produce_the_same_history() {
    let (store, _clock) = store_at(START);
    let activity_calls = Arc::new(AtomicUsize::new(0));

    let mut registry = WorkflowRegistry::new();
    {
        let activity_calls = Arc::clone(&activity_calls);
        registry
            .register("pipeline", move |ctx: WorkflowContext, _args: Value| {
                let extract = MockActivity::new("Extract", Arc::clone(&activity_calls));
                async move {
                    let e = ctx.execute(extract).await;
                    let t = ctx.side_effect(move || Ok(json!("transformed"))).await;
                    Ok(json!([e, t]))
                }
            })
            .unwrap();
    }
    let orchestrator = Orchestrator::new(store.clone(), registry);

    // Cold: everything through the live branch.
    let cold = WorkflowId::new("pipe-cold");
    store.create(&cold, "pipeline", Value::Null).await.unwrap();
    assert_eq!(orchestrator.run(&cold).await.unwrap(), RunOutcome::Completed);
    let cold_history = store.history(&cold).await.unwrap();
    assert_eq!(activity_calls.load(Ordering::SeqCst), 1);

    // Replayed: a second instance whose history is already fully recorded,
    // as if the process had crashed after every step.
    let replayed = WorkflowId::new("pipe-replayed");
    store.create(&replayed, "pipeline", Value::Null).await.unwrap();
    for event in &cold_history {
        store
            .append_event(&replayed, event.event_type, event.result.clone())
            .await
            .unwrap();
    }
    assert_eq!(orchestrator.run(&replayed).await.unwrap(), RunOutcome::Completed);

    // No live execution happened on the replay path.
    assert_eq!(activity_calls.load(Ordering::SeqCst), 1);

    let replayed_history = store.history(&replayed).await.unwrap();
    assert_eq!(event_kinds(&replayed_history), event_kinds(&cold_history));
    let results: Vec<_> = replayed_history.iter().map(|e| &e.result).collect();
    let cold_results: Vec<_> = cold_history.iter().map(|e| &e.result).collect();
    assert_eq!(results, cold_results);

    let cold_status = store.load(&cold).await.unwrap().unwrap().status;
    let replayed_status = store.load(&replayed).await.unwrap().unwrap().status;
    assert_eq!(cold_status, replayed_status);
}

// =============================================================================
// Idempotence and timer boundaries
// =============================================================================

#[tokio::test]
async fn premature_runs_on_a_sleeping_workflow_are_noops() {
    let (store, clock) = store_at(START);

    let mut registry = WorkflowRegistry::new();
    registry
        .register("napper", |ctx: WorkflowContext, _args: Value| async move {
            ctx.wait("1 hours").await;
            Ok(Value::Null)
        })
        .unwrap();
    let orchestrator = Orchestrator::new(store.clone(), registry);

    let id = WorkflowId::new("nap-1");
    store.create(&id, "napper", Value::Null).await.unwrap();
    assert_eq!(orchestrator.run(&id).await.unwrap(), RunOutcome::Sleeping);

    let parked = store.load(&id).await.unwrap().unwrap();
    let wake = parked.wake_up_time.unwrap();
    assert_eq!(wake, START + time::Duration::hours(1));

    // Wake time has not arrived: repeated runs change nothing.
    for _ in 0..3 {
        assert_eq!(orchestrator.run(&id).await.unwrap(), RunOutcome::Sleeping);
    }
    let record = store.load(&id).await.unwrap().unwrap();
    assert_eq!(record.status, WorkflowStatus::Sleeping);
    assert_eq!(record.wake_up_time, Some(wake));
    assert!(store.history(&id).await.unwrap().is_empty());

    // Once due, exactly one timer_completed is appended, no matter how many
    // further runs follow.
    clock.advance(time::Duration::hours(2));
    assert_eq!(orchestrator.run(&id).await.unwrap(), RunOutcome::Completed);
    assert_eq!(orchestrator.run(&id).await.unwrap(), RunOutcome::Completed);
    assert_eq!(
        event_kinds(&store.history(&id).await.unwrap()),
        vec![EventType::TimerCompleted]
    );
}

#[tokio::test]
async fn zero_duration_timer_is_due_on_the_next_poll() {
    let (store, _clock) = store_at(START);

    let mut registry = WorkflowRegistry::new();
    registry
        .register("instant", |ctx: WorkflowContext, _args: Value| async move {
            ctx.wait("0 seconds").await;
            Ok(Value::Null)
        })
        .unwrap();
    let orchestrator = Orchestrator::new(store.clone(), registry);

    let id = WorkflowId::new("instant-1");
    store.create(&id, "instant", Value::Null).await.unwrap();
    assert_eq!(orchestrator.run(&id).await.unwrap(), RunOutcome::Sleeping);

    let record = store.load(&id).await.unwrap().unwrap();
    assert_eq!(record.wake_up_time, Some(START));

    assert_eq!(store.poll_ready(10).await.unwrap(), vec![id.clone()]);
    assert_eq!(orchestrator.run(&id).await.unwrap(), RunOutcome::Completed);
}

// =============================================================================
// Scenario D: worker isolation
// =============================================================================

#[tokio::test]
async fn one_failing_workflow_does_not_stop_the_batch() {
    init_tracing();
    let (store, clock) = store_at(START);

    let mut registry = WorkflowRegistry::new();
    registry
        .register("fragile", |ctx: WorkflowContext, _args: Value| async move {
            ctx.wait("1 minutes").await;
            anyhow::bail!("raised on wake")
        })
        .unwrap();
    registry
        .register("sturdy", |ctx: WorkflowContext, _args: Value| async move {
            ctx.wait("1 minutes").await;
            Ok(json!("fine"))
        })
        .unwrap();
    let orchestrator = Orchestrator::new(store.clone(), registry);

    // "a-" sorts first so the failing workflow is driven before the healthy one.
    let fragile = WorkflowId::new("a-fragile");
    let sturdy = WorkflowId::new("b-sturdy");
    store.create(&fragile, "fragile", Value::Null).await.unwrap();
    store.create(&sturdy, "sturdy", Value::Null).await.unwrap();
    assert_eq!(orchestrator.run(&fragile).await.unwrap(), RunOutcome::Sleeping);
    assert_eq!(orchestrator.run(&sturdy).await.unwrap(), RunOutcome::Sleeping);

    clock.advance(time::Duration::minutes(2));
    let worker = Worker::new(orchestrator, WorkerConfig::default());
    assert_eq!(worker.run_once().await.unwrap(), 2);

    let fragile_record = store.load(&fragile).await.unwrap().unwrap();
    let sturdy_record = store.load(&sturdy).await.unwrap().unwrap();
    assert_eq!(fragile_record.status, WorkflowStatus::Failed);
    assert_eq!(sturdy_record.status, WorkflowStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn started_worker_drives_due_workflows_and_stops_cleanly() {
    init_tracing();
    let (store, _clock) = store_at(START);

    let mut registry = WorkflowRegistry::new();
    registry
        .register("instant", |ctx: WorkflowContext, _args: Value| async move {
            ctx.wait("0 seconds").await;
            Ok(Value::Null)
        })
        .unwrap();
    let orchestrator = Orchestrator::new(store.clone(), registry);

    let id = WorkflowId::new("bg-1");
    store.create(&id, "instant", Value::Null).await.unwrap();
    assert_eq!(orchestrator.run(&id).await.unwrap(), RunOutcome::Sleeping);

    let worker = Worker::new(
        orchestrator,
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        },
    );
    let handle = worker.start();

    // Paused tokio time auto-advances: a few ticks happen "instantly".
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.stop().await;

    let record = store.load(&id).await.unwrap().unwrap();
    assert_eq!(record.status, WorkflowStatus::Completed);
}

// =============================================================================
// Batching
// =============================================================================

#[tokio::test]
async fn worker_batch_size_bounds_each_poll() {
    let (store, clock) = store_at(START);

    let mut registry = WorkflowRegistry::new();
    registry
        .register("instant", |ctx: WorkflowContext, _args: Value| async move {
            ctx.wait("1 minutes").await;
            Ok(Value::Null)
        })
        .unwrap();
    let orchestrator = Orchestrator::new(store.clone(), registry);

    for i in 0..5 {
        let id = WorkflowId::new(format!("batch-{i}"));
        store.create(&id, "instant", Value::Null).await.unwrap();
        assert_eq!(orchestrator.run(&id).await.unwrap(), RunOutcome::Sleeping);
    }

    clock.advance(time::Duration::minutes(2));
    let worker = Worker::new(
        orchestrator,
        WorkerConfig {
            batch_size: 2,
            ..Default::default()
        },
    );

    assert_eq!(worker.run_once().await.unwrap(), 2);
    assert_eq!(worker.run_once().await.unwrap(), 2);
    assert_eq!(worker.run_once().await.unwrap(), 1);
    assert_eq!(worker.run_once().await.unwrap(), 0);
}
