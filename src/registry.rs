//! Device registry
//!
//! Read access to the fleet eligible for polling, plus the single write path
//! the recorder uses to maintain per-device poll bookkeeping. The registry is
//! the only component that mutates `last_report_time`,
//! `last_successful_poll`, and the consecutive failure counter.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::trace;

use crate::config::ResolvedDeviceConfig;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug)]
pub enum RegistryError {
    /// No device with that id is registered
    UnknownDevice(String),

    /// The backing store could not be reached
    Unavailable(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::UnknownDevice(id) => write!(f, "unknown device: {}", id),
            RegistryError::Unavailable(msg) => write!(f, "registry unavailable: {}", msg),
        }
    }
}

impl std::error::Error for RegistryError {}

/// A registered device and its poll bookkeeping
#[derive(Debug, Clone)]
pub struct Device {
    pub config: ResolvedDeviceConfig,

    /// Last time any poll result was recorded. Monotonically non-decreasing.
    pub last_report_time: Option<DateTime<Utc>>,

    /// Last time a successful poll was recorded
    pub last_successful_poll: Option<DateTime<Utc>>,

    /// Failed polls since the last success
    pub consecutive_failures: u32,
}

impl Device {
    pub fn new(config: ResolvedDeviceConfig) -> Self {
        Self {
            config,
            last_report_time: None,
            last_successful_poll: None,
            consecutive_failures: 0,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.config.address
    }

    /// Whether the device's poll interval has elapsed since the last report
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_report_time {
            None => true,
            Some(last) => now - last >= Duration::seconds(self.config.interval as i64),
        }
    }
}

/// Registry seam used by the scheduler, executor, and recorder
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// All devices currently flagged active
    async fn list_active(&self) -> RegistryResult<Vec<Device>>;

    /// Look up one device by id
    async fn get(&self, device_id: &str) -> Option<Device>;

    /// Whether the device exists and is active. The executor checks this
    /// between attempts so a deactivated device cancels instead of polling.
    async fn is_active(&self, device_id: &str) -> bool;

    /// Record a poll result: bumps `last_report_time` unconditionally
    /// (clamped to never decrease), sets `last_successful_poll` and resets
    /// the failure counter on success, increments the counter on failure.
    ///
    /// Returns the updated consecutive failure count.
    async fn record_poll_result(
        &self,
        device_id: &str,
        timestamp: DateTime<Utc>,
        success: bool,
    ) -> RegistryResult<u32>;

    /// Flip a device's active flag
    async fn set_active(&self, device_id: &str, active: bool) -> RegistryResult<()>;
}

/// In-memory registry populated from the resolved config.
///
/// Per-device state lives behind a single `RwLock`; write sections are short
/// and touch exactly one device, so contention stays on the map itself.
pub struct MemoryRegistry {
    devices: RwLock<HashMap<String, Device>>,
}

impl MemoryRegistry {
    pub fn new(configs: Vec<ResolvedDeviceConfig>) -> Self {
        let devices = configs
            .into_iter()
            .map(|config| (config.address.clone(), Device::new(config)))
            .collect();

        Self {
            devices: RwLock::new(devices),
        }
    }
}

#[async_trait]
impl DeviceRegistry for MemoryRegistry {
    async fn list_active(&self) -> RegistryResult<Vec<Device>> {
        let devices = self.devices.read().await;
        Ok(devices
            .values()
            .filter(|d| d.config.active)
            .cloned()
            .collect())
    }

    async fn get(&self, device_id: &str) -> Option<Device> {
        self.devices.read().await.get(device_id).cloned()
    }

    async fn is_active(&self, device_id: &str) -> bool {
        self.devices
            .read()
            .await
            .get(device_id)
            .map(|d| d.config.active)
            .unwrap_or(false)
    }

    async fn record_poll_result(
        &self,
        device_id: &str,
        timestamp: DateTime<Utc>,
        success: bool,
    ) -> RegistryResult<u32> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| RegistryError::UnknownDevice(device_id.to_string()))?;

        // Polls complete out of dispatch order; never move the report time
        // backwards.
        device.last_report_time = Some(match device.last_report_time {
            Some(existing) => existing.max(timestamp),
            None => timestamp,
        });

        if success {
            device.last_successful_poll = Some(timestamp);
            device.consecutive_failures = 0;
        } else {
            device.consecutive_failures += 1;
        }

        trace!(
            "recorded poll result for {device_id}: success={success}, consecutive_failures={}",
            device.consecutive_failures
        );

        Ok(device.consecutive_failures)
    }

    async fn set_active(&self, device_id: &str, active: bool) -> RegistryResult<()> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| RegistryError::UnknownDevice(device_id.to_string()))?;

        device.config.active = active;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Severity;
    use crate::config::{CredentialSet, SnmpAuth};
    use crate::transport::DeviceKind;
    use std::sync::Arc;

    fn test_device(address: &str) -> ResolvedDeviceConfig {
        ResolvedDeviceConfig {
            address: address.to_string(),
            display: None,
            credentials: vec![Arc::new(CredentialSet {
                name: "lab".to_string(),
                auth: SnmpAuth::V2c {
                    community: "public".to_string(),
                },
            })],
            interval: 300,
            active: true,
            alert_after_failures: 3,
            severity: Severity::Warning,
            kind: DeviceKind::Generic,
        }
    }

    #[tokio::test]
    async fn test_last_report_time_monotonic() {
        let registry = MemoryRegistry::new(vec![test_device("10.0.0.1:161")]);
        let now = Utc::now();
        let earlier = now - Duration::seconds(60);

        registry
            .record_poll_result("10.0.0.1:161", now, true)
            .await
            .unwrap();

        // A poll that completed out of order must not move the clock back
        registry
            .record_poll_result("10.0.0.1:161", earlier, false)
            .await
            .unwrap();

        let device = registry.get("10.0.0.1:161").await.unwrap();
        assert_eq!(device.last_report_time, Some(now));
    }

    #[tokio::test]
    async fn test_failure_counter_resets_on_success() {
        let registry = MemoryRegistry::new(vec![test_device("10.0.0.1:161")]);

        for expected in 1..=3 {
            let count = registry
                .record_poll_result("10.0.0.1:161", Utc::now(), false)
                .await
                .unwrap();
            assert_eq!(count, expected);
        }

        let count = registry
            .record_poll_result("10.0.0.1:161", Utc::now(), true)
            .await
            .unwrap();
        assert_eq!(count, 0);

        let device = registry.get("10.0.0.1:161").await.unwrap();
        assert_eq!(device.consecutive_failures, 0);
        assert!(device.last_successful_poll.is_some());
    }

    #[tokio::test]
    async fn test_deactivated_device_not_listed() {
        let registry = MemoryRegistry::new(vec![
            test_device("10.0.0.1:161"),
            test_device("10.0.0.2:161"),
        ]);

        registry.set_active("10.0.0.1:161", false).await.unwrap();

        let active = registry.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].device_id(), "10.0.0.2:161");
        assert!(!registry.is_active("10.0.0.1:161").await);
    }

    #[tokio::test]
    async fn test_unknown_device_is_an_error() {
        let registry = MemoryRegistry::new(vec![]);

        let result = registry
            .record_poll_result("10.9.9.9:161", Utc::now(), true)
            .await;
        assert!(matches!(result, Err(RegistryError::UnknownDevice(_))));
    }

    #[test]
    fn test_is_due_respects_interval() {
        let mut device = Device::new(test_device("10.0.0.1:161"));
        let now = Utc::now();

        assert!(device.is_due(now), "never-polled device is due");

        device.last_report_time = Some(now - Duration::seconds(30));
        assert!(!device.is_due(now), "polled 30s ago with 300s interval");

        device.last_report_time = Some(now - Duration::seconds(301));
        assert!(device.is_due(now));
    }
}
