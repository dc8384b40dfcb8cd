//! RecorderActor - appends observations and maintains registry bookkeeping
//!
//! The recorder is the single consumer that turns raw poll outcomes into
//! durable state. For every observation it:
//!
//! 1. Updates the device's registry bookkeeping (`last_report_time`,
//!    `last_successful_poll`, the consecutive failure counter)
//! 2. Appends the observation to the storage backend, batched
//! 3. Publishes a [`RecordedEvent`] carrying the updated failure count for
//!    the alert evaluator
//!
//! ## Batching Strategy
//!
//! Writes to the backend are batched for efficiency:
//! - **Size trigger**: flush after 100 observations
//! - **Time trigger**: flush after 5 seconds
//!
//! A final flush runs on shutdown. Retention cleanup deletes observations
//! older than the configured number of days, once per day and once at
//! startup.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time;
use tracing::{debug, error, instrument, trace, warn};

use crate::registry::{DeviceRegistry, RegistryError};
use crate::storage::{ObservationRow, StorageBackend};

use super::messages::{ObservationEvent, RecordedEvent, RecorderCommand, RecorderStats};

/// Batch size trigger - flush after this many observations
const BATCH_SIZE_TRIGGER: usize = 100;

/// Batch time trigger - flush after this duration
const BATCH_TIME_TRIGGER: Duration = Duration::from_secs(5);

/// Retention cleanup interval
const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Actor that records observations and publishes recorded events
pub struct RecorderActor {
    registry: Arc<dyn DeviceRegistry>,

    /// Storage backend; `None` records registry bookkeeping only
    backend: Option<Arc<dyn StorageBackend>>,

    observation_rx: broadcast::Receiver<ObservationEvent>,

    command_rx: mpsc::Receiver<RecorderCommand>,

    /// Broadcast sender for recorded events (alert evaluator subscribes)
    recorded_tx: broadcast::Sender<RecordedEvent>,

    /// Observations waiting for the next flush
    batch: Vec<ObservationRow>,

    /// Retention period in days, if cleanup is enabled
    retention_days: Option<u32>,

    total_recorded: u64,
    flush_count: u64,
    last_cleanup_time: Option<chrono::DateTime<chrono::Utc>>,
    total_deleted: u64,
}

impl RecorderActor {
    fn new(
        registry: Arc<dyn DeviceRegistry>,
        backend: Option<Arc<dyn StorageBackend>>,
        retention_days: Option<u32>,
        observation_rx: broadcast::Receiver<ObservationEvent>,
        command_rx: mpsc::Receiver<RecorderCommand>,
        recorded_tx: broadcast::Sender<RecordedEvent>,
    ) -> Self {
        let mode = if backend.is_some() {
            "persistent"
        } else {
            "registry-only"
        };
        debug!("creating recorder in {mode} mode");

        if let Some(days) = retention_days {
            debug!("retention cleanup enabled: {days} days");
        }

        Self {
            registry,
            backend,
            observation_rx,
            command_rx,
            recorded_tx,
            batch: Vec::with_capacity(BATCH_SIZE_TRIGGER),
            retention_days,
            total_recorded: 0,
            flush_count: 0,
            last_cleanup_time: None,
            total_deleted: 0,
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting recorder actor");

        let has_backend = self.backend.is_some();
        let has_retention = has_backend && self.retention_days.is_some();

        let mut flush_interval = time::interval(BATCH_TIME_TRIGGER);

        // First tick fires immediately, which doubles as the startup cleanup
        let mut cleanup_interval = time::interval(CLEANUP_INTERVAL);

        loop {
            tokio::select! {
                result = self.observation_rx.recv() => {
                    match result {
                        Ok(event) => {
                            self.record(event).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("recorder lagged, skipped {skipped} observations");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("observation channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = flush_interval.tick(), if has_backend => {
                    if !self.batch.is_empty() {
                        trace!("time-based flush triggered ({} observations)", self.batch.len());
                        self.flush().await;
                    }
                }

                _ = cleanup_interval.tick(), if has_retention => {
                    self.run_cleanup().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        RecorderCommand::Flush { respond_to } => {
                            debug!("manual flush requested");
                            self.flush().await;
                            let _ = respond_to.send(Ok(()));
                        }

                        RecorderCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats());
                        }

                        RecorderCommand::Shutdown => {
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

        if !self.batch.is_empty() {
            debug!(
                "final flush before shutdown ({} observations)",
                self.batch.len()
            );
            self.flush().await;
        }

        debug!("recorder actor stopped");
    }

    /// Record one observation
    #[instrument(skip(self, event), fields(device_id = %event.observation.device_id))]
    async fn record(&mut self, event: ObservationEvent) {
        let observation = &event.observation;

        let consecutive_failures = match self
            .registry
            .record_poll_result(
                &observation.device_id,
                observation.timestamp,
                observation.reachable,
            )
            .await
        {
            Ok(count) => count,
            Err(RegistryError::UnknownDevice(id)) => {
                warn!("observation for unknown device {id}, dropping");
                return;
            }
            Err(e) => {
                error!("registry update failed: {e}");
                return;
            }
        };

        let (alert_after_failures, severity) = match self.registry.get(&observation.device_id).await
        {
            Some(device) => (device.config.alert_after_failures, device.config.severity),
            None => {
                warn!("device vanished between record and lookup, dropping");
                return;
            }
        };

        self.total_recorded += 1;

        if self.backend.is_some() {
            self.batch.push(ObservationRow::from_observation(
                observation,
                event.display_name.clone(),
            ));

            if self.batch.len() >= BATCH_SIZE_TRIGGER {
                trace!(
                    "size-based flush triggered ({} observations)",
                    self.batch.len()
                );
                self.flush().await;
            }
        }

        let recorded = RecordedEvent {
            observation: event.observation,
            display_name: event.display_name,
            consecutive_failures,
            alert_after_failures,
            severity,
        };

        if let Err(e) = self.recorded_tx.send(recorded) {
            trace!("no receivers for recorded event: {e}");
        }
    }

    /// Flush the batch buffer to the backend
    async fn flush(&mut self) {
        let Some(backend) = self.backend.as_ref() else {
            self.flush_count += 1;
            trace!("flush #{} (no backend, no-op)", self.flush_count);
            return;
        };

        if self.batch.is_empty() {
            self.flush_count += 1;
            return;
        }

        let batch_size = self.batch.len();
        debug!("flushing {batch_size} observations to backend");

        let batch: Vec<ObservationRow> = self.batch.drain(..).collect();

        match backend.append_observations(batch).await {
            Ok(()) => {
                self.flush_count += 1;
                trace!("flush #{} complete ({batch_size} observations)", self.flush_count);
            }
            Err(e) => {
                // Observations are lost; the next cycle produces fresh ones
                error!("failed to flush batch: {e}");
            }
        }
    }

    /// Delete observations older than the retention period
    async fn run_cleanup(&mut self) {
        let (Some(backend), Some(retention_days)) = (self.backend.as_ref(), self.retention_days)
        else {
            return;
        };

        let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days as i64);
        debug!("running retention cleanup (deleting observations before {cutoff})");

        match backend.cleanup_old_observations(cutoff).await {
            Ok(deleted) => {
                if deleted > 0 {
                    debug!("retention cleanup deleted {deleted} observations");
                } else {
                    trace!("retention cleanup: nothing to delete");
                }
                self.total_deleted += deleted as u64;
                self.last_cleanup_time = Some(chrono::Utc::now());
            }
            Err(e) => {
                // Retried on the next interval
                error!("retention cleanup failed: {e}");
            }
        }
    }

    fn stats(&self) -> RecorderStats {
        RecorderStats {
            total_recorded: self.total_recorded,
            buffered: self.batch.len(),
            flush_count: self.flush_count,
            last_cleanup_time: self.last_cleanup_time,
            total_deleted: self.total_deleted,
        }
    }
}

/// Handle for controlling the RecorderActor
#[derive(Clone)]
pub struct RecorderHandle {
    sender: mpsc::Sender<RecorderCommand>,
}

impl RecorderHandle {
    /// Spawn a new recorder actor
    ///
    /// Returns the handle and the broadcast sender for recorded events;
    /// subscribe before observations start flowing.
    pub fn spawn(
        registry: Arc<dyn DeviceRegistry>,
        backend: Option<Arc<dyn StorageBackend>>,
        retention_days: Option<u32>,
        observation_rx: broadcast::Receiver<ObservationEvent>,
    ) -> (Self, broadcast::Sender<RecordedEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (recorded_tx, _) = broadcast::channel(256);

        let actor = RecorderActor::new(
            registry,
            backend,
            retention_days,
            observation_rx,
            cmd_rx,
            recorded_tx.clone(),
        );

        tokio::spawn(actor.run());

        (Self { sender: cmd_tx }, recorded_tx)
    }

    /// Manually flush the write buffer
    pub async fn flush(&self) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RecorderCommand::Flush { respond_to: tx })
            .await
            .map_err(|_| anyhow::anyhow!("recorder is not running"))?;

        rx.await??;
        Ok(())
    }

    /// Get recorder statistics
    pub async fn get_stats(&self) -> Option<RecorderStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RecorderCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// Shutdown the recorder (flushes pending observations first)
    pub async fn shutdown(&self) {
        let _ = self.sender.send(RecorderCommand::Shutdown).await;
    }
}
