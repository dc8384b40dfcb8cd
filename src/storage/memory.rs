//! In-memory storage backend (no persistence)
//!
//! This backend keeps observations in per-device ring buffers and alert
//! records in a plain vector. It's useful for:
//! - Testing without database dependencies
//! - Deployments that only care about live state (default if no storage configured)
//! - Low-latency dashboards (recent observations only)
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Limited capacity**: Ring buffer size is fixed
//! - **No historical queries**: Only recent observations available

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::AlertType;

use super::backend::{HealthStatus, QueryRange, StorageBackend};
use super::error::StorageResult;
use super::schema::{AlertRow, ObservationRow, OpenAlert};

/// Maximum observations to keep in memory per device
const MAX_OBSERVATIONS_PER_DEVICE: usize = 1000;

#[derive(Default)]
struct Inner {
    /// Observations grouped by device_id, insertion order
    observations: HashMap<String, VecDeque<ObservationRow>>,

    /// All alert records, open and resolved
    alerts: Vec<AlertRow>,

    /// Total observations stored (across all devices, before eviction)
    total_count: usize,
}

/// In-memory storage backend
///
/// Observations live in a ring buffer with a fixed per-device capacity.
/// When a buffer is full, oldest observations are evicted. Alerts are
/// retained without bound; they are opened rarely and never deleted.
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn append_observations(&self, observations: Vec<ObservationRow>) -> StorageResult<()> {
        let mut inner = self.inner.write().await;

        for row in observations {
            let buffer = inner.observations.entry(row.device_id.clone()).or_default();

            // Append-only: a duplicate (device, timestamp) never overwrites
            if buffer.iter().any(|r| r.timestamp == row.timestamp) {
                continue;
            }

            buffer.push_back(row);
            if buffer.len() > MAX_OBSERVATIONS_PER_DEVICE {
                buffer.pop_front();
            }
            inner.total_count += 1;
        }

        Ok(())
    }

    async fn query_range(&self, query: QueryRange) -> StorageResult<Vec<ObservationRow>> {
        debug!("querying in-memory storage for {}", query.device_id);

        let inner = self.inner.read().await;
        let mut rows: Vec<ObservationRow> = inner
            .observations
            .get(&query.device_id)
            .map(|deque| {
                deque
                    .iter()
                    .filter(|r| r.timestamp >= query.start && r.timestamp <= query.end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by_key(|r| r.timestamp);
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        Ok(rows)
    }

    async fn query_latest(
        &self,
        device_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<ObservationRow>> {
        debug!("querying latest {} observations for {}", limit, device_id);

        let inner = self.inner.read().await;
        let mut rows: Vec<ObservationRow> = inner
            .observations
            .get(device_id)
            .map(|deque| deque.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default();

        // Chronological order (oldest first)
        rows.reverse();
        Ok(rows)
    }

    async fn cleanup_old_observations(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut inner = self.inner.write().await;
        let mut deleted = 0;

        for buffer in inner.observations.values_mut() {
            let before_len = buffer.len();
            buffer.retain(|r| r.timestamp >= before);
            deleted += before_len - buffer.len();
        }

        debug!("cleanup removed {} observations before {}", deleted, before);
        Ok(deleted)
    }

    async fn open_alert(&self, alert: OpenAlert) -> StorageResult<bool> {
        let mut inner = self.inner.write().await;

        let already_open = inner
            .alerts
            .iter()
            .any(|a| a.device_id == alert.device_id && a.alert_type == alert.alert_type && a.is_open());

        if already_open {
            return Ok(false);
        }

        inner.alerts.push(AlertRow {
            device_id: alert.device_id,
            alert_type: alert.alert_type,
            severity: alert.severity,
            trigger_failures: alert.trigger_failures,
            opened_at: alert.opened_at,
            resolved_at: None,
        });

        Ok(true)
    }

    async fn resolve_alert(
        &self,
        device_id: &str,
        alert_type: AlertType,
        resolved_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut inner = self.inner.write().await;

        match inner
            .alerts
            .iter_mut()
            .find(|a| a.device_id == device_id && a.alert_type == alert_type && a.is_open())
        {
            Some(alert) => {
                alert.resolved_at = Some(resolved_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn open_alerts(&self, device_id: Option<&str>) -> StorageResult<Vec<AlertRow>> {
        let inner = self.inner.read().await;
        Ok(inner
            .alerts
            .iter()
            .filter(|a| a.is_open())
            .filter(|a| device_id.is_none_or(|id| a.device_id == id))
            .cloned()
            .collect())
    }

    async fn alert_history(&self, device_id: &str, limit: usize) -> StorageResult<Vec<AlertRow>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<AlertRow> = inner
            .alerts
            .iter()
            .filter(|a| a.device_id == device_id)
            .cloned()
            .collect();

        rows.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let inner = self.inner.read().await;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: std::collections::HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("total_observations".to_string(), inner.total_count.to_string()),
            ]),
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let inner = self.inner.read().await;
        Ok(format!(
            "In-Memory: {} observations across {} devices, {} alert records",
            inner.total_count,
            inner.observations.len(),
            inner.alerts.len()
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
