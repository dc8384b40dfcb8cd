//! SchedulerActor - periodic fan-out of poll jobs
//!
//! Fires on the fleet interval, reads the due devices from the registry, and
//! submits one poll job per device to the worker pool. Submission is a
//! channel send; the dispatch loop never waits on an individual poll.
//!
//! A second, lower-frequency ticker drives the worker pool's maintenance
//! pass (reaping, rebalancing) independent of poll ticks.
//!
//! Registry failures abort the current tick only. The scheduler logs them
//! and stays alive to retry on the next tick.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, error, instrument, trace, warn};

use crate::registry::DeviceRegistry;

use super::messages::SchedulerCommand;
use super::worker_pool::WorkerPoolHandle;

/// Actor driving the fleet and maintenance tickers
pub struct SchedulerActor {
    registry: Arc<dyn DeviceRegistry>,

    pool: WorkerPoolHandle,

    command_rx: mpsc::Receiver<SchedulerCommand>,

    fleet_interval: Duration,

    maintenance_interval: Duration,
}

impl SchedulerActor {
    fn new(
        registry: Arc<dyn DeviceRegistry>,
        pool: WorkerPoolHandle,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        fleet_interval: Duration,
        maintenance_interval: Duration,
    ) -> Self {
        Self {
            registry,
            pool,
            command_rx,
            fleet_interval,
            maintenance_interval,
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!(
            "starting scheduler (fleet every {:?}, maintenance every {:?})",
            self.fleet_interval, self.maintenance_interval
        );

        let mut fleet_ticker = interval(self.fleet_interval);
        let mut maintenance_ticker = interval(self.maintenance_interval);

        loop {
            tokio::select! {
                _ = fleet_ticker.tick() => {
                    match self.dispatch().await {
                        Ok(submitted) => {
                            trace!("tick complete, {submitted} polls submitted");
                        }
                        Err(e) => {
                            // Contained: retry on the next tick
                            error!("scheduling tick failed: {e:#}");
                        }
                    }
                }

                _ = maintenance_ticker.tick() => {
                    match self.pool.maintain_now().await {
                        Ok(reaped) if reaped > 0 => {
                            debug!("maintenance pass reaped {reaped} workers");
                        }
                        Ok(_) => {
                            trace!("maintenance pass complete");
                        }
                        Err(e) => {
                            error!("maintenance pass failed: {e:#}");
                        }
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SchedulerCommand::TickNow { respond_to } => {
                            debug!("received TickNow command");
                            let result = self.dispatch().await;
                            let _ = respond_to.send(result);
                        }

                        SchedulerCommand::Shutdown => {
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

        debug!("scheduler stopped");
    }

    /// One scheduling tick: submit a poll job for every due active device
    async fn dispatch(&self) -> anyhow::Result<usize> {
        let devices = self
            .registry
            .list_active()
            .await
            .context("failed to list active devices")?;

        let now = Utc::now();
        let mut submitted = 0;

        for device in devices {
            if !device.is_due(now) {
                continue;
            }

            self.pool
                .submit(device.device_id())
                .await
                .context("failed to submit poll job")?;
            submitted += 1;
        }

        Ok(submitted)
    }
}

/// Handle for controlling the SchedulerActor
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn a new scheduler actor
    pub fn spawn(
        registry: Arc<dyn DeviceRegistry>,
        pool: WorkerPoolHandle,
        fleet_interval: Duration,
        maintenance_interval: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = SchedulerActor::new(
            registry,
            pool,
            cmd_rx,
            fleet_interval,
            maintenance_interval,
        );

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Trigger an immediate scheduling tick
    ///
    /// Returns the number of poll jobs submitted.
    pub async fn tick_now(&self) -> anyhow::Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::TickNow { respond_to: tx })
            .await
            .map_err(|_| anyhow::anyhow!("scheduler is not running"))?;

        rx.await.context("scheduler dropped the response")?
    }

    /// Gracefully shut down the scheduler
    pub async fn shutdown(&self) {
        let _ = self.sender.send(SchedulerCommand::Shutdown).await;
    }
}
