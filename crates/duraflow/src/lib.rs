//! Replay-based durable execution engine for long-running processes.
//!
//! Duraflow runs multi-step business processes that can pause for arbitrary
//! wall-clock durations (seconds to months), survive process restarts, and
//! resume at the exact suspension point with all local state intact:
//!
//! - **At-most-once side effects** — each successful activity or side effect
//!   is checkpointed to an append-only history; replays feed back the
//!   recorded result instead of re-executing
//! - **Durable timers** — a workflow parked on a timer holds no memory; a
//!   polling worker wakes it once the persisted wake time passes
//! - **Deterministic replay** — bodies are re-entered many times but observe
//!   a single consistent sequence of results, enforced by checking every
//!   suspension against the recorded history
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                          Orchestrator::run(id)                        │
//! │                                                                       │
//! │   1. Load record; claim the wake if the workflow was sleeping         │
//! │   2. Instantiate body via the registry; read full history             │
//! │   3. Poll the body; each suspension is either                         │
//! │        replayed from history (kind-checked), or                       │
//! │        executed live and appended, or                                 │
//! │        a timer: persist status=sleeping + wake time and return        │
//! │   4. Body returned -> completed; anything raised -> failed            │
//! └───────────────────────────────────────────────────────────────────────┘
//!          ▲ due ids                                      │ events, status
//!   ┌──────┴──────┐                                ┌──────▼──────┐
//!   │   Worker    │ ◄──── poll_ready / interval ── │    Store    │
//!   └─────────────┘                                └─────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use duraflow::{
//!     Activity, MemoryStore, Orchestrator, RunOutcome, WorkflowContext, WorkflowId,
//!     WorkflowRegistry, WorkflowStore,
//! };
//! use async_trait::async_trait;
//! use serde_json::{Value, json};
//!
//! struct SendWelcome;
//!
//! #[async_trait]
//! impl Activity for SendWelcome {
//!     async fn handle(&self) -> anyhow::Result<Value> {
//!         Ok(json!("sent"))
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> duraflow::Result<()> {
//! let mut registry = WorkflowRegistry::new();
//! registry
//!     .register("onboarding", |ctx: WorkflowContext, user: String| async move {
//!         let sent = ctx.execute(SendWelcome).await;
//!         ctx.wait("7 days").await;
//!         Ok(json!({ "user": user, "welcome": sent }))
//!     })
//!     .unwrap();
//!
//! let orchestrator = Orchestrator::new(MemoryStore::new(), registry);
//! let id = WorkflowId::new("user-42");
//! orchestrator.store().create(&id, "onboarding", json!("ada")).await?;
//!
//! // First run executes the activity, then parks on the 7-day timer.
//! assert_eq!(orchestrator.run(&id).await?, RunOutcome::Sleeping);
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//!
//! - `postgres` — Enables [`PgStore`] for production use with PostgreSQL

mod activity;
mod context;
mod duration;
mod error;
mod orchestrator;
mod registry;
mod store;
mod worker;
mod workflow;

pub use activity::Activity;
pub use context::{RequestKind, Suspend, WorkflowContext};
pub use duration::WaitDuration;
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use registry::WorkflowRegistry;
#[cfg(feature = "postgres")]
pub use store::PgStore;
pub use store::{Clock, ManualClock, MemoryStore, SystemClock, WorkflowStore};
pub use worker::{Worker, WorkerConfig, WorkerHandle};
pub use workflow::{EventType, HistoryEvent, WorkflowId, WorkflowRecord, WorkflowStatus};
