pub mod actors;
pub mod config;
pub mod registry;
pub mod storage;
pub mod transport;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single value read from a device, keyed by metric name in [`PollMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValue {
    Integer(i64),
    Unsigned(u64),
    Text(String),
}

/// Measured values from one successful poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollMetrics {
    /// Round-trip latency of the successful attempt in milliseconds
    pub latency_ms: u64,

    /// Values keyed by the metric name of the polled OID set
    pub values: BTreeMap<String, MetricValue>,
}

/// Terminal failure classification for an unreachable device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Every attempt timed out without a response
    Timeout,

    /// The device rejected the supplied credentials
    Auth,

    /// A response arrived but failed decoding or validation
    Malformed,

    /// The worker exceeded its time budget and was reaped
    WorkerTimeout,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Auth => write!(f, "auth"),
            FailureReason::Malformed => write!(f, "malformed"),
            FailureReason::WorkerTimeout => write!(f, "worker_timeout"),
        }
    }
}

impl std::str::FromStr for FailureReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(FailureReason::Timeout),
            "auth" => Ok(FailureReason::Auth),
            "malformed" => Ok(FailureReason::Malformed),
            "worker_timeout" => Ok(FailureReason::WorkerTimeout),
            other => Err(format!("unknown failure reason: {other}")),
        }
    }
}

/// One immutable health reading for one device.
///
/// Observations are append-only: once recorded they are never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthObservation {
    /// Device identifier (the poll address, e.g. "10.0.0.1:161")
    pub device_id: String,

    /// When the poll cycle completed (always UTC)
    pub timestamp: DateTime<Utc>,

    /// Whether the device answered with a well-formed response
    pub reachable: bool,

    /// Measured values (present iff reachable)
    pub metrics: Option<PollMetrics>,

    /// Failure classification (present iff unreachable)
    pub failure: Option<FailureReason>,
}

impl HealthObservation {
    pub fn success(device_id: impl Into<String>, metrics: PollMetrics) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp: Utc::now(),
            reachable: true,
            metrics: Some(metrics),
            failure: None,
        }
    }

    pub fn failure(device_id: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp: Utc::now(),
            reachable: false,
            metrics: None,
            failure: Some(reason),
        }
    }
}

/// Alert severity, taken verbatim from device configuration.
///
/// Severity is an explicit configuration value. It is never computed from the
/// failure count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Kind of alert, keying the "one open alert per (device, type)" invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Consecutive failed polls reached the device threshold
    DeviceUnreachable,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertType::DeviceUnreachable => write!(f, "device_unreachable"),
        }
    }
}

impl std::str::FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "device_unreachable" => Ok(AlertType::DeviceUnreachable),
            other => Err(format!("unknown alert type: {other}")),
        }
    }
}
