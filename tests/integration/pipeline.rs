//! End-to-end tests through the full actor chain:
//! scheduler → worker pool → recorder → alert evaluator

use std::time::Duration;

use assert_matches::assert_matches;

use fleetmon::actors::messages::AlertStatus;
use fleetmon::registry::DeviceRegistry;
use fleetmon::storage::StorageBackend;
use fleetmon::transport::sim::SimBehavior;
use fleetmon::{FailureReason, Severity};

use crate::helpers::{Pipeline, test_device};

const DEVICE: &str = "10.0.0.1:161";

#[tokio::test]
async fn test_healthy_device_end_to_end() {
    let mut p = Pipeline::spawn(vec![test_device(DEVICE, 3)], 4);

    let events = p.tick_and_settle(1).await;

    assert_eq!(events[0].observation.device_id, DEVICE);
    assert!(events[0].observation.reachable);
    assert_eq!(events[0].consecutive_failures, 0);
    let metrics = assert_matches!(&events[0].observation.metrics, Some(m) => m);
    assert!(metrics.values.contains_key("sys_uptime"));

    p.recorder.flush().await.unwrap();
    let rows = p.backend.query_latest(DEVICE, 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].reachable);
    assert_eq!(rows[0].display_name, format!("Test {DEVICE}"));

    p.shutdown().await;
}

#[tokio::test]
async fn test_three_consecutive_failures_open_exactly_one_alert() {
    let mut p = Pipeline::spawn(vec![test_device(DEVICE, 3)], 4);
    p.transport.set_behavior(DEVICE, SimBehavior::Unreachable);

    for expected in 1..=2u32 {
        let events = p.tick_and_settle(1).await;
        assert_eq!(events[0].consecutive_failures, expected);
        assert_eq!(events[0].observation.failure, Some(FailureReason::Timeout));

        // Below the threshold nothing opens
        assert!(p.backend.open_alerts(Some(DEVICE)).await.unwrap().is_empty());
    }

    let events = p.tick_and_settle(1).await;
    assert_eq!(events[0].consecutive_failures, 3);

    let status = p.alerts.get_status(DEVICE).await.unwrap();
    assert_eq!(status.status, AlertStatus::Alerting);

    let open = p.backend.open_alerts(Some(DEVICE)).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].trigger_failures, 3);
    assert_eq!(open[0].severity, Severity::Critical);

    // A fourth failure does not open a second alert
    p.tick_and_settle(1).await;

    assert_eq!(p.backend.open_alerts(Some(DEVICE)).await.unwrap().len(), 1);
    assert_eq!(p.backend.alert_history(DEVICE, 10).await.unwrap().len(), 1);

    p.shutdown().await;
}

#[tokio::test]
async fn test_recovery_resolves_alert_and_resets_counter() {
    let mut p = Pipeline::spawn(vec![test_device(DEVICE, 3)], 4);
    p.transport.set_behavior(DEVICE, SimBehavior::Unreachable);

    for _ in 0..3 {
        p.tick_and_settle(1).await;
    }
    assert_eq!(p.backend.open_alerts(Some(DEVICE)).await.unwrap().len(), 1);

    p.transport.set_behavior(
        DEVICE,
        SimBehavior::Healthy {
            latency: Duration::from_millis(1),
        },
    );

    let events = p.tick_and_settle(1).await;
    assert!(events[0].observation.reachable);
    assert_eq!(events[0].consecutive_failures, 0);

    let status = p.alerts.get_status(DEVICE).await.unwrap();
    assert_eq!(status.status, AlertStatus::Ok);

    assert!(p.backend.open_alerts(Some(DEVICE)).await.unwrap().is_empty());

    // Resolved, never deleted
    let history = p.backend.alert_history(DEVICE, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(!history[0].is_open());

    let device = p.registry.get(DEVICE).await.unwrap();
    assert_eq!(device.consecutive_failures, 0);

    p.shutdown().await;
}

#[tokio::test]
async fn test_deactivation_mid_flight_records_nothing() {
    let mut p = Pipeline::spawn(vec![test_device(DEVICE, 3)], 4);
    p.transport.set_behavior(DEVICE, SimBehavior::Hang);

    let submitted = p.scheduler.tick_now().await.unwrap();
    assert_eq!(submitted, 1);

    // Let the worker start executing, then pull the device out
    tokio::time::sleep(Duration::from_millis(50)).await;
    p.registry.set_active(DEVICE, false).await.unwrap();

    let reaped = p.pool.maintain_now().await.unwrap();
    assert_eq!(reaped, 0, "cancellation is not reaping");

    tokio::time::sleep(Duration::from_millis(50)).await;

    // No observation, no counter movement, no alert transition
    assert_matches!(
        p.recorded_rx.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    );

    p.recorder.flush().await.unwrap();
    assert!(p.backend.query_latest(DEVICE, 10).await.unwrap().is_empty());
    assert!(p.alerts.get_status(DEVICE).await.is_none());

    let device = p.registry.get(DEVICE).await.unwrap();
    assert_eq!(device.consecutive_failures, 0);

    // Reactivation puts the device back into rotation
    p.registry.set_active(DEVICE, true).await.unwrap();
    p.transport.set_behavior(
        DEVICE,
        SimBehavior::Healthy {
            latency: Duration::from_millis(1),
        },
    );

    let events = p.tick_and_settle(1).await;
    assert!(events[0].observation.reachable);

    p.shutdown().await;
}

#[tokio::test]
async fn test_devices_alert_independently() {
    let flaky = "10.0.0.1:161";
    let steady = "10.0.0.2:161";
    let mut p = Pipeline::spawn(vec![test_device(flaky, 2), test_device(steady, 2)], 4);
    p.transport.set_behavior(flaky, SimBehavior::Unreachable);

    for _ in 0..2 {
        p.tick_and_settle(2).await;
    }

    assert_eq!(p.backend.open_alerts(Some(flaky)).await.unwrap().len(), 1);
    assert!(p.backend.open_alerts(Some(steady)).await.unwrap().is_empty());
    assert_eq!(
        p.alerts.get_status(steady).await.unwrap().status,
        AlertStatus::Ok
    );

    p.shutdown().await;
}
