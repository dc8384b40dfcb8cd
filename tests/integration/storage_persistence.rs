//! Pipeline persistence through the SQLite backend

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use fleetmon::actors::alert::AlertHandle;
use fleetmon::actors::executor::PollExecutor;
use fleetmon::actors::messages::RecordedEvent;
use fleetmon::actors::recorder::RecorderHandle;
use fleetmon::actors::worker_pool::WorkerPoolHandle;
use fleetmon::registry::MemoryRegistry;
use fleetmon::storage::sqlite::SqliteBackend;
use fleetmon::storage::StorageBackend;
use fleetmon::transport::sim::{SimBehavior, SimTransport};
use fleetmon::{AlertType, Severity};

use crate::helpers::{fast_policy, test_device};

const DEVICE: &str = "10.0.0.1:161";

struct SqlitePipeline {
    transport: Arc<SimTransport>,
    pool: WorkerPoolHandle,
    recorder: RecorderHandle,
    alerts: AlertHandle,
    recorded_rx: broadcast::Receiver<RecordedEvent>,
}

impl SqlitePipeline {
    fn spawn(backend: Arc<SqliteBackend>) -> Self {
        let transport = Arc::new(SimTransport::new());
        let registry = Arc::new(MemoryRegistry::new(vec![test_device(DEVICE, 3)]));

        let (observation_tx, _) = broadcast::channel(256);

        let (recorder, recorded_tx) = RecorderHandle::spawn(
            registry.clone(),
            Some(backend.clone() as Arc<dyn StorageBackend>),
            Some(30),
            observation_tx.subscribe(),
        );
        let recorded_rx = recorded_tx.subscribe();

        let alerts = AlertHandle::spawn(
            Some(backend as Arc<dyn StorageBackend>),
            recorded_tx.subscribe(),
        );

        let executor = PollExecutor::new(transport.clone(), registry.clone(), fast_policy());
        let pool = WorkerPoolHandle::spawn(
            executor,
            registry,
            4,
            Duration::from_secs(60),
            observation_tx,
        );

        Self {
            transport,
            pool,
            recorder,
            alerts,
            recorded_rx,
        }
    }

    async fn poll_once(&mut self) -> RecordedEvent {
        self.pool.submit(DEVICE).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), self.recorded_rx.recv())
            .await
            .expect("timed out waiting for recorded event")
            .expect("recorded channel closed");

        // Give the alert actor time to apply its transition
        tokio::time::sleep(Duration::from_millis(50)).await;
        event
    }

    async fn shutdown(&self) {
        self.pool.shutdown().await;
        self.recorder.flush().await.unwrap();
        self.recorder.shutdown().await;
        self.alerts.shutdown().await;
    }
}

#[tokio::test]
async fn test_observations_and_alerts_survive_backend_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("health.db");

    let backend = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
    let mut p = SqlitePipeline::spawn(backend.clone());

    p.transport.set_behavior(DEVICE, SimBehavior::Unreachable);
    for expected in 1..=3u32 {
        let event = p.poll_once().await;
        assert_eq!(event.consecutive_failures, expected);
    }

    p.shutdown().await;
    backend.close().await.unwrap();

    // A fresh backend over the same file sees everything
    let reopened = SqliteBackend::new(&db_path).await.unwrap();

    let rows = reopened.query_latest(DEVICE, 10).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| !r.reachable));

    let open = reopened.open_alerts(Some(DEVICE)).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].alert_type, AlertType::DeviceUnreachable);
    assert_eq!(open[0].severity, Severity::Critical);
    assert_eq!(open[0].trigger_failures, 3);

    reopened.close().await.unwrap();
}

#[tokio::test]
async fn test_alert_opened_before_restart_resolves_after() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("health.db");

    // First run: drive the device into an open alert, then stop everything
    let backend = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
    let mut p = SqlitePipeline::spawn(backend.clone());

    p.transport.set_behavior(DEVICE, SimBehavior::Unreachable);
    for _ in 0..3 {
        p.poll_once().await;
    }
    assert_eq!(backend.open_alerts(Some(DEVICE)).await.unwrap().len(), 1);

    p.shutdown().await;
    backend.close().await.unwrap();

    // Second run: the device answers again and the old alert resolves
    let backend = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
    let mut p = SqlitePipeline::spawn(backend.clone());

    let event = p.poll_once().await;
    assert!(event.observation.reachable);

    assert!(backend.open_alerts(Some(DEVICE)).await.unwrap().is_empty());
    let history = backend.alert_history(DEVICE, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(!history[0].is_open());

    p.shutdown().await;
    backend.close().await.unwrap();
}

#[tokio::test]
async fn test_resolution_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("health.db");

    let backend = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
    let mut p = SqlitePipeline::spawn(backend.clone());

    p.transport.set_behavior(DEVICE, SimBehavior::Unreachable);
    for _ in 0..3 {
        p.poll_once().await;
    }

    p.transport.set_behavior(
        DEVICE,
        SimBehavior::Healthy {
            latency: Duration::from_millis(1),
        },
    );
    let event = p.poll_once().await;
    assert!(event.observation.reachable);

    p.shutdown().await;

    assert!(backend.open_alerts(Some(DEVICE)).await.unwrap().is_empty());

    let history = backend.alert_history(DEVICE, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(!history[0].is_open());

    let rows = backend.query_latest(DEVICE, 10).await.unwrap();
    assert_eq!(rows.len(), 4);
    assert!(rows.last().unwrap().reachable);

    backend.close().await.unwrap();
}
