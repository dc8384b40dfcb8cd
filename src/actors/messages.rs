//! Message types for actor communication
//!
//! This module defines all message types used for communication between actors.
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Events**: Broadcast notifications published to multiple subscribers
//! 3. **Immutability**: All messages are cloneable for multi-subscriber patterns

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::{HealthObservation, Severity};

/// Event published when a poll cycle for one device completes
///
/// The worker pool broadcasts one of these per finished worker, whether the
/// poll succeeded, failed, or was reaped. Cancelled polls publish nothing.
#[derive(Debug, Clone)]
pub struct ObservationEvent {
    /// The completed observation
    pub observation: HealthObservation,

    /// Display name for the device (for logging/alerts)
    pub display_name: String,
}

/// Event published by the recorder after an observation has been recorded
///
/// Carries the updated consecutive failure count so downstream consumers see
/// the registry state that resulted from this observation, not a racy
/// re-read.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub observation: HealthObservation,

    pub display_name: String,

    /// Consecutive failure count after this observation was recorded
    pub consecutive_failures: u32,

    /// Device alert threshold at recording time
    pub alert_after_failures: u32,

    /// Configured alert severity for the device
    pub severity: Severity,
}

/// Commands that can be sent to the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Trigger an immediate scheduling tick (bypassing the interval timer)
    ///
    /// Used for testing and manual refresh operations. Responds with the
    /// number of poll jobs submitted.
    TickNow {
        respond_to: oneshot::Sender<anyhow::Result<usize>>,
    },

    /// Gracefully shut down the scheduler
    Shutdown,
}

/// Commands that can be sent to the WorkerPoolActor
#[derive(Debug)]
pub enum WorkerPoolCommand {
    /// Submit a poll job for one device
    ///
    /// A no-op if a worker slot already exists for the device (single-flight).
    Submit { device_id: String },

    /// Run a maintenance pass now (reap stuck workers, rebalance pool size)
    ///
    /// Responds with the number of workers reaped.
    MaintainNow {
        respond_to: oneshot::Sender<usize>,
    },

    /// Get current pool statistics
    GetStats {
        respond_to: oneshot::Sender<WorkerPoolStats>,
    },

    /// Gracefully shut down the pool, aborting in-flight workers
    Shutdown,
}

/// Worker pool statistics
#[derive(Debug, Clone, Default)]
pub struct WorkerPoolStats {
    /// Current pool size (maximum concurrent workers)
    pub pool_size: usize,

    /// Workers currently holding a slot (executing or queued for a permit)
    pub in_flight: usize,

    /// Total polls completed since startup
    pub completed_total: u64,

    /// Total workers reaped for exceeding their time budget
    pub reaped_total: u64,

    /// Total workers cancelled (device deactivated mid-poll)
    pub cancelled_total: u64,

    /// Total submissions dropped because a slot already existed
    pub coalesced_total: u64,
}

/// Commands that can be sent to the RecorderActor
#[derive(Debug)]
pub enum RecorderCommand {
    /// Manually flush the write buffer to storage
    Flush {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    /// Get recorder statistics
    GetStats {
        respond_to: oneshot::Sender<RecorderStats>,
    },

    /// Gracefully shut down the recorder (flushes first)
    Shutdown,
}

/// Recorder statistics
#[derive(Debug, Clone, Default)]
pub struct RecorderStats {
    /// Observations recorded since startup
    pub total_recorded: u64,

    /// Observations currently buffered for the next flush
    pub buffered: usize,

    /// Number of flush operations performed
    pub flush_count: u64,

    /// Last retention cleanup run, if any
    pub last_cleanup_time: Option<DateTime<Utc>>,

    /// Observations deleted by retention cleanup since startup
    pub total_deleted: u64,
}

/// Commands that can be sent to the AlertActor
#[derive(Debug)]
pub enum AlertCommand {
    /// Get the current alert status for a device
    GetStatus {
        device_id: String,
        respond_to: oneshot::Sender<Option<DeviceAlertStatus>>,
    },

    /// Mute alert transitions for maintenance windows
    Mute,

    /// Resume alert transitions
    Unmute,

    /// Gracefully shut down the alert actor
    Shutdown,
}

/// Alert state for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStatus {
    Ok,
    Alerting,
}

/// Current alert status snapshot for a device
#[derive(Debug, Clone)]
pub struct DeviceAlertStatus {
    pub device_id: String,
    pub status: AlertStatus,

    /// When the device entered its current state
    pub since: DateTime<Utc>,
}
