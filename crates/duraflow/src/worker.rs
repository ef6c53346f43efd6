//! Worker loop that gives sleeping workflows wall-clock progress.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::store::WorkflowStore;

/// Configuration for a [`Worker`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to poll the store for due workflows.
    ///
    /// Timer precision is limited by this interval. Default: 1 second.
    pub poll_interval: Duration,

    /// Maximum number of due workflow ids fetched per poll. Default: 10.
    pub batch_size: usize,

    /// Worker identifier for logs.
    ///
    /// If `None`, a UUID is generated when the worker is built.
    pub worker_id: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 10,
            worker_id: None,
        }
    }
}

/// A single-threaded polling loop over one orchestrator.
///
/// Every `poll_interval` the worker asks the store for due workflows and
/// hands each to the orchestrator. Per-workflow failures are logged and
/// swallowed so one bad workflow cannot stop the loop. Multiple workers may
/// run against the same store; the orchestrator's wake claim keeps them
/// from re-entering the same workflow concurrently.
///
/// # Example
///
/// ```ignore
/// let worker = Worker::new(orchestrator, WorkerConfig::default());
/// let handle = worker.start();
/// // ... later
/// handle.stop().await;
/// ```
pub struct Worker<S> {
    orchestrator: Orchestrator<S>,
    config: WorkerConfig,
    worker_id: String,
}

impl<S> Worker<S>
where
    S: WorkflowStore,
{
    /// Create a worker over an orchestrator.
    pub fn new(orchestrator: Orchestrator<S>, config: WorkerConfig) -> Self {
        let worker_id = config
            .worker_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self {
            orchestrator,
            config,
            worker_id,
        }
    }

    /// The worker's identifier.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// One poll: drive every due workflow once, without sleeping.
    ///
    /// Returns how many workflows were handed to the orchestrator. Store
    /// errors from the poll itself bubble up; per-workflow errors are
    /// logged and swallowed.
    pub async fn run_once(&self) -> Result<usize> {
        let due = self
            .orchestrator
            .store()
            .poll_ready(self.config.batch_size)
            .await?;
        let count = due.len();

        for id in due {
            match self.orchestrator.run(&id).await {
                Ok(outcome) => {
                    debug!(worker_id = %self.worker_id, workflow_id = %id, ?outcome, "Drove workflow");
                }
                Err(e) => {
                    error!(worker_id = %self.worker_id, workflow_id = %id, error = %e, "Workflow run failed");
                }
            }
        }

        Ok(count)
    }

    /// Run the polling loop until the shutdown receiver signals.
    ///
    /// When the receiver observes `true` the worker finishes the current
    /// poll (if any) and exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut poll_interval = interval(self.config.poll_interval);
        poll_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(worker_id = %self.worker_id, "Worker started");

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(worker_id = %self.worker_id, error = %e, "Error polling for due workflows");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(worker_id = %self.worker_id, "Worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Spawn the polling loop on the current tokio runtime.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        WorkerHandle { shutdown_tx, task }
    }
}

/// Handle to a started [`Worker`].
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}
