//! AlertActor - per-device consecutive-failure state machine
//!
//! ## State Machine
//!
//! Each device is in one of two states:
//!
//! ```text
//! OK → ALERTING:  consecutive failure count reaches the device threshold
//!                 → open an alert record (idempotent upsert)
//! ALERTING → OK:  the next successful observation
//!                 → resolve the open alert, never delete it
//! ```
//!
//! No other transitions exist. Severity is the device's configured value,
//! never derived from the counter. The transition function is pure and
//! side-effect free; the actor applies its result to the alert store.
//!
//! The open threshold uses `>=`, not `==`, so transitions missed during a
//! mute window are caught up on the next event.
//!
//! At startup the actor restores ALERTING state from open alert records, so
//! an alert opened by a previous run resolves on the next success.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::AlertType;
use crate::storage::{OpenAlert, StorageBackend};

use super::messages::{AlertCommand, AlertStatus, DeviceAlertStatus, RecordedEvent};

/// Transition decided by one recorded observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTransition {
    /// Stay in the current state
    None,

    /// OK → ALERTING
    Open,

    /// ALERTING → OK
    Resolve,
}

impl AlertTransition {
    /// Pure transition function over the two-state machine
    pub fn evaluate(
        status: AlertStatus,
        reachable: bool,
        consecutive_failures: u32,
        threshold: u32,
    ) -> Self {
        let threshold = threshold.max(1);

        match (status, reachable) {
            (AlertStatus::Ok, false) if consecutive_failures >= threshold => AlertTransition::Open,
            (AlertStatus::Alerting, true) => AlertTransition::Resolve,
            _ => AlertTransition::None,
        }
    }
}

/// Per-device alert state
struct DeviceState {
    status: AlertStatus,
    since: DateTime<Utc>,
}

impl DeviceState {
    fn new() -> Self {
        Self {
            status: AlertStatus::Ok,
            since: Utc::now(),
        }
    }
}

/// Actor applying alert transitions to the alert store
pub struct AlertActor {
    /// Per-device state, created lazily on first event
    devices: HashMap<String, DeviceState>,

    /// Alert store; `None` tracks state in memory only
    backend: Option<Arc<dyn StorageBackend>>,

    command_rx: mpsc::Receiver<AlertCommand>,

    recorded_rx: broadcast::Receiver<RecordedEvent>,

    /// Whether transitions are muted (maintenance windows)
    muted: bool,
}

impl AlertActor {
    fn new(
        backend: Option<Arc<dyn StorageBackend>>,
        command_rx: mpsc::Receiver<AlertCommand>,
        recorded_rx: broadcast::Receiver<RecordedEvent>,
    ) -> Self {
        Self {
            devices: HashMap::new(),
            backend,
            command_rx,
            recorded_rx,
            muted: false,
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting alert actor");

        self.rehydrate().await;

        loop {
            tokio::select! {
                result = self.recorded_rx.recv() => {
                    match result {
                        Ok(event) => {
                            if !self.muted {
                                self.handle_recorded_event(event).await;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("alert actor lagged, skipped {skipped} recorded events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("recorded channel closed, shutting down");
                            break;
                        }
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        AlertCommand::GetStatus { device_id, respond_to } => {
                            let status = self.devices.get(&device_id).map(|state| {
                                DeviceAlertStatus {
                                    device_id: device_id.clone(),
                                    status: state.status,
                                    since: state.since,
                                }
                            });
                            let _ = respond_to.send(status);
                        }

                        AlertCommand::Mute => {
                            debug!("muting alert transitions");
                            self.muted = true;
                        }

                        AlertCommand::Unmute => {
                            debug!("unmuting alert transitions");
                            self.muted = false;
                        }

                        AlertCommand::Shutdown => {
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

        debug!("alert actor stopped");
    }

    /// Restore ALERTING state from alert records left open by a previous run
    async fn rehydrate(&mut self) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };

        match backend.open_alerts(None).await {
            Ok(open) => {
                for alert in open {
                    debug!(
                        "restoring alerting state for {} (open since {})",
                        alert.device_id, alert.opened_at
                    );
                    self.devices.insert(
                        alert.device_id,
                        DeviceState {
                            status: AlertStatus::Alerting,
                            since: alert.opened_at,
                        },
                    );
                }
            }
            Err(e) => {
                // Transitions still run; an orphaned open alert stays until
                // the device fails and recovers again
                error!("failed to load open alerts: {e}");
            }
        }
    }

    /// Apply one recorded observation to the device's state machine
    #[instrument(skip(self, event), fields(device_id = %event.observation.device_id))]
    async fn handle_recorded_event(&mut self, event: RecordedEvent) {
        let device_id = event.observation.device_id.clone();
        let state = self
            .devices
            .entry(device_id.clone())
            .or_insert_with(DeviceState::new);

        let transition = AlertTransition::evaluate(
            state.status,
            event.observation.reachable,
            event.consecutive_failures,
            event.alert_after_failures,
        );

        trace!(
            "evaluation: status={:?}, reachable={}, failures={}/{} -> {transition:?}",
            state.status,
            event.observation.reachable,
            event.consecutive_failures,
            event.alert_after_failures
        );

        match transition {
            AlertTransition::None => {}

            AlertTransition::Open => {
                state.status = AlertStatus::Alerting;
                state.since = event.observation.timestamp;

                warn!(
                    "{} is unreachable ({} consecutive failures), opening alert",
                    event.display_name, event.consecutive_failures
                );

                if let Some(backend) = self.backend.as_ref() {
                    let result = backend
                        .open_alert(OpenAlert {
                            device_id,
                            alert_type: AlertType::DeviceUnreachable,
                            severity: event.severity,
                            trigger_failures: event.consecutive_failures,
                            opened_at: event.observation.timestamp,
                        })
                        .await;

                    match result {
                        Ok(true) => trace!("alert record opened"),
                        Ok(false) => trace!("alert record already open"),
                        Err(e) => error!("failed to open alert record: {e}"),
                    }
                }
            }

            AlertTransition::Resolve => {
                state.status = AlertStatus::Ok;
                state.since = event.observation.timestamp;

                info!("{} is reachable again, resolving alert", event.display_name);

                if let Some(backend) = self.backend.as_ref() {
                    let result = backend
                        .resolve_alert(
                            &device_id,
                            AlertType::DeviceUnreachable,
                            event.observation.timestamp,
                        )
                        .await;

                    match result {
                        Ok(true) => trace!("alert record resolved"),
                        Ok(false) => trace!("no open alert record to resolve"),
                        Err(e) => error!("failed to resolve alert record: {e}"),
                    }
                }
            }
        }
    }
}

/// Handle for controlling the AlertActor
#[derive(Clone)]
pub struct AlertHandle {
    sender: mpsc::Sender<AlertCommand>,
}

impl AlertHandle {
    /// Spawn a new alert actor
    pub fn spawn(
        backend: Option<Arc<dyn StorageBackend>>,
        recorded_rx: broadcast::Receiver<RecordedEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = AlertActor::new(backend, cmd_rx, recorded_rx);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Get the current alert status for a device
    pub async fn get_status(&self, device_id: impl Into<String>) -> Option<DeviceAlertStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AlertCommand::GetStatus {
                device_id: device_id.into(),
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Mute alert transitions (maintenance windows)
    pub async fn mute(&self) {
        let _ = self.sender.send(AlertCommand::Mute).await;
    }

    /// Resume alert transitions
    pub async fn unmute(&self) {
        let _ = self.sender.send(AlertCommand::Unmute).await;
    }

    /// Shutdown the alert actor
    pub async fn shutdown(&self) {
        let _ = self.sender.send(AlertCommand::Shutdown).await;
    }
}
