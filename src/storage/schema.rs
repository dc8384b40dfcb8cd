//! Row definitions for the health time series and alert records
//!
//! ## Design Philosophy
//!
//! Observations use a hybrid layout: frequently-queried aggregates
//! (reachability, latency, failure classification) are typed columns, while
//! the full value mapping rides along as JSON. Dashboards and alert queries
//! hit the columns; detailed analysis reads the JSON without schema changes.
//!
//! Observation rows are append-only. Alert rows transition exactly once from
//! open to resolved and are never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AlertType, FailureReason, HealthObservation, PollMetrics, Severity};

/// One health observation as stored in the time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRow {
    /// When the poll cycle completed (always UTC)
    pub timestamp: DateTime<Utc>,

    /// Device identifier (poll address)
    pub device_id: String,

    /// Display name at the time of recording (for UI/logging)
    pub display_name: String,

    /// Whether the device answered with a well-formed response
    pub reachable: bool,

    // === Aggregate columns (frequently queried) ===
    /// Round-trip latency in milliseconds (successful polls only)
    pub latency_ms: Option<u64>,

    /// Failure classification (failed polls only)
    pub failure: Option<FailureReason>,

    // === Detailed values (full mapping) ===
    /// Complete measured values, stored as JSON in persistent backends
    pub metrics: Option<PollMetrics>,
}

impl ObservationRow {
    pub fn from_observation(observation: &HealthObservation, display_name: String) -> Self {
        Self {
            timestamp: observation.timestamp,
            device_id: observation.device_id.clone(),
            display_name,
            reachable: observation.reachable,
            latency_ms: observation.metrics.as_ref().map(|m| m.latency_ms),
            failure: observation.failure,
            metrics: observation.metrics.clone(),
        }
    }
}

/// One alert record
///
/// At most one row per (device, type) has `resolved_at = None` at any time;
/// the backends enforce this with upsert-on-open semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRow {
    pub device_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,

    /// Consecutive failure count that triggered the alert
    pub trigger_failures: u32,

    pub opened_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl AlertRow {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Parameters for opening an alert
#[derive(Debug, Clone)]
pub struct OpenAlert {
    pub device_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub trigger_failures: u32,
    pub opened_at: DateTime<Utc>,
}
