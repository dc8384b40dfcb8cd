//! Helper functions for integration tests

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use fleetmon::Severity;
use fleetmon::actors::alert::AlertHandle;
use fleetmon::actors::executor::{PollExecutor, RetryPolicy};
use fleetmon::actors::messages::RecordedEvent;
use fleetmon::actors::recorder::RecorderHandle;
use fleetmon::actors::scheduler::SchedulerHandle;
use fleetmon::actors::worker_pool::WorkerPoolHandle;
use fleetmon::config::{CredentialFailover, CredentialSet, ResolvedDeviceConfig, SnmpAuth};
use fleetmon::registry::MemoryRegistry;
use fleetmon::storage::{MemoryBackend, StorageBackend};
use fleetmon::transport::DeviceKind;
use fleetmon::transport::sim::SimTransport;

/// Device config due on every tick (interval 0) with the given alert threshold
pub fn test_device(address: &str, alert_after_failures: u32) -> ResolvedDeviceConfig {
    ResolvedDeviceConfig {
        address: address.to_string(),
        display: Some(format!("Test {address}")),
        credentials: vec![Arc::new(CredentialSet {
            name: "lab".to_string(),
            auth: SnmpAuth::V2c {
                community: "public".to_string(),
            },
        })],
        interval: 0,
        active: true,
        alert_after_failures,
        severity: Severity::Critical,
        kind: DeviceKind::Generic,
    }
}

/// Fast retry tuning so failure scenarios finish in milliseconds
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        timeout: Duration::from_millis(40),
        retry_spacing: Duration::from_millis(10),
        credential_failover: CredentialFailover::FailFast,
    }
}

/// A fully wired pipeline over simulated transport and in-memory storage
pub struct Pipeline {
    pub transport: Arc<SimTransport>,
    pub registry: Arc<MemoryRegistry>,
    pub backend: Arc<MemoryBackend>,
    pub scheduler: SchedulerHandle,
    pub pool: WorkerPoolHandle,
    pub recorder: RecorderHandle,
    pub alerts: AlertHandle,
    pub recorded_rx: broadcast::Receiver<RecordedEvent>,
}

impl Pipeline {
    pub fn spawn(devices: Vec<ResolvedDeviceConfig>, pool_size: usize) -> Self {
        Self::spawn_with_reap_budget(devices, pool_size, Duration::from_secs(60))
    }

    pub fn spawn_with_reap_budget(
        devices: Vec<ResolvedDeviceConfig>,
        pool_size: usize,
        reap_budget: Duration,
    ) -> Self {
        let transport = Arc::new(SimTransport::new());
        let registry = Arc::new(MemoryRegistry::new(devices));
        let backend = Arc::new(MemoryBackend::new());

        let (observation_tx, _) = broadcast::channel(2048);

        let (recorder, recorded_tx) = RecorderHandle::spawn(
            registry.clone(),
            Some(backend.clone() as Arc<dyn StorageBackend>),
            None,
            observation_tx.subscribe(),
        );
        let recorded_rx = recorded_tx.subscribe();

        let alerts = AlertHandle::spawn(
            Some(backend.clone() as Arc<dyn StorageBackend>),
            recorded_tx.subscribe(),
        );

        let executor = PollExecutor::new(transport.clone(), registry.clone(), fast_policy());
        let pool = WorkerPoolHandle::spawn(
            executor,
            registry.clone(),
            pool_size,
            reap_budget,
            observation_tx,
        );

        // Long intervals; tests drive ticks explicitly
        let scheduler = SchedulerHandle::spawn(
            registry.clone(),
            pool.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );

        Self {
            transport,
            registry,
            backend,
            scheduler,
            pool,
            recorder,
            alerts,
            recorded_rx,
        }
    }

    /// Wait for the next recorded event, with a timeout
    pub async fn next_recorded(&mut self) -> RecordedEvent {
        tokio::time::timeout(Duration::from_secs(5), self.recorded_rx.recv())
            .await
            .expect("timed out waiting for recorded event")
            .expect("recorded channel closed")
    }

    /// Run one scheduling tick and wait for `expected` recorded events
    pub async fn tick_and_settle(&mut self, expected: usize) -> Vec<RecordedEvent> {
        self.scheduler.tick_now().await.expect("tick failed");

        let mut events = Vec::with_capacity(expected);
        for _ in 0..expected {
            events.push(self.next_recorded().await);
        }

        // Give the alert actor time to apply its transitions
        tokio::time::sleep(Duration::from_millis(50)).await;
        events
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.pool.shutdown().await;
        self.recorder.shutdown().await;
        self.alerts.shutdown().await;
    }
}
