//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `StorageBackend`
//! trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Connection pooling**: Efficient resource usage
//! - **Append-only discipline**: duplicate observation rows are ignored,
//!   never overwritten; the "one open alert per (device, type)" invariant
//!   is enforced with a partial unique index
//!
//! ## Limitations
//!
//! - **Concurrency**: Limited concurrent writes (fine for the batched
//!   recorder, wrong for many independent writers)
//! - **Distributed**: Single-machine only

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use crate::{AlertType, FailureReason, PollMetrics, Severity};

use super::backend::{HealthStatus, QueryRange, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{AlertRow, ObservationRow, OpenAlert};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS observations (
        device_id TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        display_name TEXT NOT NULL,
        reachable INTEGER NOT NULL,
        latency_ms INTEGER,
        failure TEXT,
        metrics TEXT,
        PRIMARY KEY (device_id, timestamp)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_observations_timestamp
        ON observations (timestamp)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS alerts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id TEXT NOT NULL,
        alert_type TEXT NOT NULL,
        severity TEXT NOT NULL,
        trigger_failures INTEGER NOT NULL,
        opened_at INTEGER NOT NULL,
        resolved_at INTEGER
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_one_open
        ON alerts (device_id, alert_type) WHERE resolved_at IS NULL
    "#,
];

/// SQLite storage backend
///
/// This backend stores the health time series and alert records in a local
/// SQLite database file. It's ideal for small to medium fleets.
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Create tables and indexes
    /// 3. Configure SQLite for optimal performance (WAL mode, etc.)
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("creating tables");
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        }

        info!("SQLite backend ready");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn observation_from_row(row: &sqlx::sqlite::SqliteRow) -> StorageResult<ObservationRow> {
        let failure = row
            .get::<Option<String>, _>("failure")
            .map(|s| {
                s.parse::<FailureReason>()
                    .map_err(StorageError::SerializationError)
            })
            .transpose()?;

        let metrics = row
            .get::<Option<String>, _>("metrics")
            .map(|s| {
                serde_json::from_str::<PollMetrics>(&s).map_err(|e| {
                    StorageError::SerializationError(format!("failed to deserialize metrics: {e}"))
                })
            })
            .transpose()?;

        Ok(ObservationRow {
            timestamp: Self::millis_to_timestamp(row.get("timestamp")),
            device_id: row.get("device_id"),
            display_name: row.get("display_name"),
            reachable: row.get("reachable"),
            latency_ms: row.get::<Option<i64>, _>("latency_ms").map(|v| v as u64),
            failure,
            metrics,
        })
    }

    fn alert_from_row(row: &sqlx::sqlite::SqliteRow) -> StorageResult<AlertRow> {
        let alert_type = row
            .get::<String, _>("alert_type")
            .parse::<AlertType>()
            .map_err(StorageError::SerializationError)?;
        let severity = row
            .get::<String, _>("severity")
            .parse::<Severity>()
            .map_err(StorageError::SerializationError)?;

        Ok(AlertRow {
            device_id: row.get("device_id"),
            alert_type,
            severity,
            trigger_failures: row.get::<i64, _>("trigger_failures") as u32,
            opened_at: Self::millis_to_timestamp(row.get("opened_at")),
            resolved_at: row
                .get::<Option<i64>, _>("resolved_at")
                .map(Self::millis_to_timestamp),
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, observations), fields(count = observations.len()))]
    async fn append_observations(&self, observations: Vec<ObservationRow>) -> StorageResult<()> {
        if observations.is_empty() {
            return Ok(());
        }

        debug!("appending {} observations", observations.len());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        for observation in observations {
            let metrics_json = observation
                .metrics
                .as_ref()
                .map(|m| {
                    serde_json::to_string(m).map_err(|e| {
                        StorageError::SerializationError(format!(
                            "failed to serialize metrics: {e}"
                        ))
                    })
                })
                .transpose()?;

            // Append-only: an existing (device, timestamp) row wins
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO observations (
                    device_id, timestamp, display_name, reachable,
                    latency_ms, failure, metrics
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&observation.device_id)
            .bind(Self::timestamp_to_millis(&observation.timestamp))
            .bind(&observation.display_name)
            .bind(observation.reachable)
            .bind(observation.latency_ms.map(|v| v as i64))
            .bind(observation.failure.map(|f| f.to_string()))
            .bind(metrics_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        debug!("batch append complete");
        Ok(())
    }

    #[instrument(skip(self), fields(device_id = %query.device_id))]
    async fn query_range(&self, query: QueryRange) -> StorageResult<Vec<ObservationRow>> {
        let limit_clause = query
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();

        let sql = format!(
            r#"
            SELECT device_id, timestamp, display_name, reachable,
                   latency_ms, failure, metrics
            FROM observations
            WHERE device_id = ? AND timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp ASC
            {}
            "#,
            limit_clause
        );

        let rows = sqlx::query(&sql)
            .bind(&query.device_id)
            .bind(Self::timestamp_to_millis(&query.start))
            .bind(Self::timestamp_to_millis(&query.end))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let observations: StorageResult<Vec<ObservationRow>> =
            rows.iter().map(Self::observation_from_row).collect();

        let results = observations?;
        debug!("query returned {} observations", results.len());
        Ok(results)
    }

    #[instrument(skip(self))]
    async fn query_latest(
        &self,
        device_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<ObservationRow>> {
        let rows = sqlx::query(
            r#"
            SELECT device_id, timestamp, display_name, reachable,
                   latency_ms, failure, metrics
            FROM observations
            WHERE device_id = ?
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let observations: StorageResult<Vec<ObservationRow>> =
            rows.iter().map(Self::observation_from_row).collect();

        let mut results = observations?;
        // Reverse to get chronological order (oldest first)
        results.reverse();
        Ok(results)
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_observations(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        info!("cleaning up observations older than {}", before);

        let result = sqlx::query("DELETE FROM observations WHERE timestamp < ?")
            .bind(Self::timestamp_to_millis(&before))
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old observations", deleted);

        Ok(deleted)
    }

    #[instrument(skip(self, alert), fields(device_id = %alert.device_id))]
    async fn open_alert(&self, alert: OpenAlert) -> StorageResult<bool> {
        // The partial unique index on open (device, type) pairs turns a
        // duplicate open into a no-op.
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (
                device_id, alert_type, severity, trigger_failures, opened_at, resolved_at
            )
            VALUES (?, ?, ?, ?, ?, NULL)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&alert.device_id)
        .bind(alert.alert_type.to_string())
        .bind(alert.severity.to_string())
        .bind(alert.trigger_failures as i64)
        .bind(Self::timestamp_to_millis(&alert.opened_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn resolve_alert(
        &self,
        device_id: &str,
        alert_type: AlertType,
        resolved_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET resolved_at = ?
            WHERE device_id = ? AND alert_type = ? AND resolved_at IS NULL
            "#,
        )
        .bind(Self::timestamp_to_millis(&resolved_at))
        .bind(device_id)
        .bind(alert_type.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn open_alerts(&self, device_id: Option<&str>) -> StorageResult<Vec<AlertRow>> {
        let rows = match device_id {
            Some(id) => {
                sqlx::query(
                    r#"
                    SELECT device_id, alert_type, severity, trigger_failures, opened_at, resolved_at
                    FROM alerts
                    WHERE device_id = ? AND resolved_at IS NULL
                    ORDER BY opened_at DESC
                    "#,
                )
                .bind(id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT device_id, alert_type, severity, trigger_failures, opened_at, resolved_at
                    FROM alerts
                    WHERE resolved_at IS NULL
                    ORDER BY opened_at DESC
                    "#,
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(Self::alert_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn alert_history(&self, device_id: &str, limit: usize) -> StorageResult<Vec<AlertRow>> {
        let rows = sqlx::query(
            r#"
            SELECT device_id, alert_type, severity, trigger_failures, opened_at, resolved_at
            FROM alerts
            WHERE device_id = ?
            ORDER BY opened_at DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(Self::alert_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        let observations: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM observations")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let alerts: (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE resolved_at IS NULL) FROM alerts",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(format!(
            "SQLite: {} observations, {} alerts ({} open), {:.2} MB on disk",
            observations.0,
            alerts.0,
            alerts.1,
            file_size as f64 / 1_000_000.0
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
