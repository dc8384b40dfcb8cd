//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement. It covers both stores the
//! scheduler core writes to: the append-only health time series and the
//! alert records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::AlertType;

use super::error::StorageResult;
use super::schema::{AlertRow, ObservationRow, OpenAlert};

/// Query parameters for fetching observations within a time range
#[derive(Debug, Clone)]
pub struct QueryRange {
    /// Device to query (poll address)
    pub device_id: String,

    /// Start of time range (inclusive)
    pub start: DateTime<Utc>,

    /// End of time range (inclusive)
    pub end: DateTime<Utc>,

    /// Maximum number of results to return (for pagination)
    pub limit: Option<usize>,
}

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Trait for storage backends
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`; the recorder and alert evaluator
/// share one instance across tasks.
///
/// ## Semantics
///
/// - `append_observations` is append-only: rows are never updated in place.
/// - `open_alert`/`resolve_alert` are idempotent; re-opening an already-open
///   (device, type) or re-resolving an already-resolved one is a no-op.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Append a batch of observations to the time series
    ///
    /// This is the primary write method. Implementations should use
    /// transactions and batch statements; duplicate (device, timestamp) rows
    /// are ignored, never overwritten.
    async fn append_observations(&self, observations: Vec<ObservationRow>) -> StorageResult<()>;

    /// Query observations within a time range
    ///
    /// Returns observations for one device between start and end times,
    /// ordered by timestamp (oldest first).
    async fn query_range(&self, query: QueryRange) -> StorageResult<Vec<ObservationRow>>;

    /// Get the N most recent observations for a device, oldest first
    async fn query_latest(&self, device_id: &str, limit: usize)
    -> StorageResult<Vec<ObservationRow>>;

    /// Delete observations older than the specified timestamp
    ///
    /// Used for retention policy enforcement. Returns the number of
    /// observations deleted. Alert records are never deleted.
    async fn cleanup_old_observations(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    // ========================================================================
    // Alert Records
    // ========================================================================

    /// Open an alert for (device, type) unless one is already open.
    ///
    /// Returns `true` if a new alert was opened, `false` if an open alert
    /// already existed (idempotent upsert).
    async fn open_alert(&self, alert: OpenAlert) -> StorageResult<bool>;

    /// Resolve the open alert for (device, type), if any.
    ///
    /// Returns `true` if an alert was resolved, `false` if none was open
    /// (idempotent). Resolved alerts are retained as history.
    async fn resolve_alert(
        &self,
        device_id: &str,
        alert_type: AlertType,
        resolved_at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Currently open alerts, optionally filtered by device
    async fn open_alerts(&self, device_id: Option<&str>) -> StorageResult<Vec<AlertRow>>;

    /// Alert history for a device, newest first
    async fn alert_history(&self, device_id: &str, limit: usize) -> StorageResult<Vec<AlertRow>>;

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Check backend health
    ///
    /// Performs a lightweight operation to verify the backend is operational
    /// (e.g., ping database, check file access).
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Get backend-specific statistics
    ///
    /// Returns human-readable stats about the backend
    /// (e.g., "SQLite: 1.2M rows, 450MB on disk").
    async fn get_stats(&self) -> StorageResult<String>;

    /// Close the backend and release resources
    ///
    /// Gracefully shuts down the backend, closing connections
    /// and flushing any pending writes.
    async fn close(&self) -> StorageResult<()>;
}
