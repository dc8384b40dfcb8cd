//! WorkerPoolActor - bounded pool of poll workers with single-flight per device
//!
//! ## Architecture
//!
//! Submissions never block the sender: each accepted submission spawns a
//! worker task that waits for a pool permit inside the task, runs the
//! executor, and reports back over an internal channel. The actor owns the
//! slot table, so all slot mutation is single-writer.
//!
//! ```text
//! Submit → slot table check → spawn worker ─ acquire permit ─ execute
//!             │ (exists: drop)                                   │
//!             │                                Started/Finished ◀┘
//!             ▼
//!       maintenance pass: reap stuck workers, cancel deactivated,
//!       rebalance pool size toward the active fleet
//! ```
//!
//! ## Single-flight
//!
//! At most one worker slot per device id exists at any instant. A submission
//! for a device that already holds a slot is dropped and counted, never
//! queued.
//!
//! ## Reaping
//!
//! A worker whose execution age exceeds the reap budget is aborted. Aborting
//! drops its owned semaphore permit, so the pool slot is reclaimed even if
//! the transport call never returns. The outcome is recorded as a
//! `WorkerTimeout` failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

use crate::registry::DeviceRegistry;
use crate::{FailureReason, HealthObservation};

use super::executor::{PollExecutor, PollOutcome};
use super::messages::{ObservationEvent, WorkerPoolCommand, WorkerPoolStats};

/// Internal messages from worker tasks back to the pool actor
#[derive(Debug)]
enum WorkerMessage {
    /// The worker acquired a permit and began executing
    Started { device_id: String },

    /// The worker finished on its own
    Finished {
        device_id: String,
        outcome: PollOutcome,
    },
}

/// Ephemeral record of an in-flight poll
struct WorkerSlot {
    handle: JoinHandle<()>,

    /// Set once the worker holds a permit; queued workers are never reaped
    executing_since: Option<Instant>,

    display_name: String,
}

/// Actor owning the worker slot table and the pool semaphore
pub struct WorkerPoolActor {
    executor: Arc<PollExecutor>,
    registry: Arc<dyn DeviceRegistry>,

    command_rx: mpsc::Receiver<WorkerPoolCommand>,

    /// Broadcast sender for completed observations
    observation_tx: broadcast::Sender<ObservationEvent>,

    /// Bounds concurrent executions; workers hold owned permits
    semaphore: Arc<Semaphore>,

    /// Current pool size (rebalanced by maintenance)
    pool_size: usize,

    /// Upper bound for rebalancing (the configured pool size)
    max_pool_size: usize,

    /// Execution age past which a worker is reaped
    reap_budget: Duration,

    slots: HashMap<String, WorkerSlot>,

    worker_tx: mpsc::Sender<WorkerMessage>,
    worker_rx: mpsc::Receiver<WorkerMessage>,

    completed_total: u64,
    reaped_total: u64,
    cancelled_total: u64,
    coalesced_total: u64,
}

impl WorkerPoolActor {
    fn new(
        executor: Arc<PollExecutor>,
        registry: Arc<dyn DeviceRegistry>,
        pool_size: usize,
        reap_budget: Duration,
        command_rx: mpsc::Receiver<WorkerPoolCommand>,
        observation_tx: broadcast::Sender<ObservationEvent>,
    ) -> Self {
        let pool_size = pool_size.max(1);
        let (worker_tx, worker_rx) = mpsc::channel(256);

        debug!("creating worker pool (size {pool_size}, reap budget {reap_budget:?})");

        Self {
            executor,
            registry,
            command_rx,
            observation_tx,
            semaphore: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            max_pool_size: pool_size,
            reap_budget,
            slots: HashMap::new(),
            worker_tx,
            worker_rx,
            completed_total: 0,
            reaped_total: 0,
            cancelled_total: 0,
            coalesced_total: 0,
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting worker pool actor");

        loop {
            tokio::select! {
                Some(msg) = self.worker_rx.recv() => {
                    self.handle_worker_message(msg);
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        WorkerPoolCommand::Submit { device_id } => {
                            self.submit(device_id).await;
                        }

                        WorkerPoolCommand::MaintainNow { respond_to } => {
                            let reaped = self.maintain().await;
                            let _ = respond_to.send(reaped);
                        }

                        WorkerPoolCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats());
                        }

                        WorkerPoolCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        // Abort whatever is still in flight; nothing is recorded for them
        for (device_id, slot) in self.slots.drain() {
            trace!("aborting in-flight worker for {device_id} on shutdown");
            slot.handle.abort();
        }

        debug!("worker pool actor stopped");
    }

    /// Accept or coalesce one submission
    async fn submit(&mut self, device_id: String) {
        if let Some(slot) = self.slots.get(&device_id) {
            if !slot.handle.is_finished() {
                trace!("poll already in flight for {device_id}, dropping submission");
                self.coalesced_total += 1;
                return;
            }
            // Finished but its message is still queued; treat as in flight
            // until the slot is cleaned up.
            self.coalesced_total += 1;
            return;
        }

        let Some(device) = self.registry.get(&device_id).await else {
            warn!("submission for unknown device {device_id}, dropping");
            return;
        };

        if !device.config.active {
            trace!("submission for inactive device {device_id}, dropping");
            return;
        }

        let display_name = device.config.display_name().to_string();
        let semaphore = self.semaphore.clone();
        let executor = self.executor.clone();
        let worker_tx = self.worker_tx.clone();
        let task_device_id = device_id.clone();

        let handle = tokio::spawn(async move {
            // Queue here, not in the dispatch path
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };

            let _ = worker_tx
                .send(WorkerMessage::Started {
                    device_id: task_device_id.clone(),
                })
                .await;

            let outcome = executor.execute(&device).await;

            let _ = worker_tx
                .send(WorkerMessage::Finished {
                    device_id: task_device_id,
                    outcome,
                })
                .await;
        });

        self.slots.insert(
            device_id,
            WorkerSlot {
                handle,
                executing_since: None,
                display_name,
            },
        );
    }

    fn handle_worker_message(&mut self, msg: WorkerMessage) {
        match msg {
            WorkerMessage::Started { device_id } => {
                if let Some(slot) = self.slots.get_mut(&device_id) {
                    slot.executing_since = Some(Instant::now());
                }
            }

            WorkerMessage::Finished { device_id, outcome } => {
                let Some(slot) = self.slots.remove(&device_id) else {
                    // Already reaped; the reaper recorded the outcome
                    return;
                };

                match outcome {
                    PollOutcome::Completed(observation) => {
                        self.completed_total += 1;
                        self.publish(observation, slot.display_name);
                    }
                    PollOutcome::Cancelled => {
                        trace!("poll for {device_id} cancelled, nothing recorded");
                        self.cancelled_total += 1;
                    }
                }
            }
        }
    }

    /// Maintenance pass: reap stuck workers, cancel workers for deactivated
    /// devices, rebalance pool size. Returns the number of workers reaped.
    #[instrument(skip(self))]
    async fn maintain(&mut self) -> usize {
        let mut reaped = 0;
        let mut to_remove = Vec::new();

        for (device_id, slot) in &self.slots {
            if slot.handle.is_finished() {
                // Completion message still queued; leave it to the handler
                continue;
            }

            if !self.registry.is_active(device_id).await {
                debug!("cancelling in-flight worker for deactivated device {device_id}");
                slot.handle.abort();
                to_remove.push((device_id.clone(), None));
                continue;
            }

            let stuck = slot
                .executing_since
                .is_some_and(|since| since.elapsed() > self.reap_budget);

            if stuck {
                warn!(
                    "reaping stuck worker for {device_id} (exceeded {:?})",
                    self.reap_budget
                );
                slot.handle.abort();
                to_remove.push((
                    device_id.clone(),
                    Some(HealthObservation::failure(
                        device_id.as_str(),
                        FailureReason::WorkerTimeout,
                    )),
                ));
            }
        }

        for (device_id, observation) in to_remove {
            let Some(slot) = self.slots.remove(&device_id) else {
                continue;
            };

            match observation {
                Some(observation) => {
                    reaped += 1;
                    self.reaped_total += 1;
                    self.publish(observation, slot.display_name);
                }
                None => {
                    self.cancelled_total += 1;
                }
            }
        }

        self.rebalance().await;

        reaped
    }

    /// Resize the pool toward the active fleet size, within [1, configured]
    async fn rebalance(&mut self) {
        let active = match self.registry.list_active().await {
            Ok(devices) => devices.len(),
            Err(e) => {
                warn!("skipping pool rebalance, registry unavailable: {e}");
                return;
            }
        };

        let target = active.clamp(1, self.max_pool_size);

        if target > self.pool_size {
            let grow = target - self.pool_size;
            trace!("growing pool {} -> {target}", self.pool_size);
            self.semaphore.add_permits(grow);
            self.pool_size = target;
        } else if target < self.pool_size {
            let shrink = (self.pool_size - target) as u32;
            // Shrink only what is currently idle; a busy pool keeps its size
            // until workers hand permits back.
            match self.semaphore.clone().try_acquire_many_owned(shrink) {
                Ok(permits) => {
                    trace!("shrinking pool {} -> {target}", self.pool_size);
                    permits.forget();
                    self.pool_size = target;
                }
                Err(_) => {
                    trace!("pool busy, deferring shrink to a later pass");
                }
            }
        }
    }

    fn publish(&self, observation: HealthObservation, display_name: String) {
        let event = ObservationEvent {
            observation,
            display_name,
        };

        // No subscribers is fine; lagging subscribers drop events by design
        if let Err(e) = self.observation_tx.send(event) {
            trace!("no receivers for observation event: {e}");
        }
    }

    fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            pool_size: self.pool_size,
            in_flight: self.slots.len(),
            completed_total: self.completed_total,
            reaped_total: self.reaped_total,
            cancelled_total: self.cancelled_total,
            coalesced_total: self.coalesced_total,
        }
    }
}

/// Handle for controlling the WorkerPoolActor
#[derive(Clone)]
pub struct WorkerPoolHandle {
    sender: mpsc::Sender<WorkerPoolCommand>,
}

impl WorkerPoolHandle {
    /// Spawn a new worker pool actor
    pub fn spawn(
        executor: PollExecutor,
        registry: Arc<dyn DeviceRegistry>,
        pool_size: usize,
        reap_budget: Duration,
        observation_tx: broadcast::Sender<ObservationEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);

        let actor = WorkerPoolActor::new(
            Arc::new(executor),
            registry,
            pool_size,
            reap_budget,
            cmd_rx,
            observation_tx,
        );

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Submit a poll job for one device
    ///
    /// Returns once the pool has accepted the submission; it never waits for
    /// the poll itself.
    pub async fn submit(&self, device_id: impl Into<String>) -> anyhow::Result<()> {
        self.sender
            .send(WorkerPoolCommand::Submit {
                device_id: device_id.into(),
            })
            .await
            .map_err(|_| anyhow::anyhow!("worker pool is not running"))
    }

    /// Run a maintenance pass now, returning the number of workers reaped
    pub async fn maintain_now(&self) -> anyhow::Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WorkerPoolCommand::MaintainNow { respond_to: tx })
            .await
            .map_err(|_| anyhow::anyhow!("worker pool is not running"))?;

        Ok(rx.await?)
    }

    /// Get current pool statistics
    pub async fn get_stats(&self) -> Option<WorkerPoolStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WorkerPoolCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// Shutdown the pool, aborting in-flight workers
    pub async fn shutdown(&self) {
        let _ = self.sender.send(WorkerPoolCommand::Shutdown).await;
    }
}
