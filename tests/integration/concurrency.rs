//! Pool concurrency behavior: single-flight, reaping, large-fleet dispatch

use std::time::{Duration, Instant};

use fleetmon::FailureReason;
use fleetmon::transport::sim::SimBehavior;

use crate::helpers::{Pipeline, test_device};

const DEVICE: &str = "10.0.0.1:161";

#[tokio::test]
async fn test_overlapping_ticks_keep_one_poll_in_flight() {
    let p = Pipeline::spawn(vec![test_device(DEVICE, 3)], 4);
    p.transport.set_behavior(DEVICE, SimBehavior::Hang);

    p.scheduler.tick_now().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    // The poll is still hanging; further ticks must not stack workers
    p.scheduler.tick_now().await.unwrap();
    p.scheduler.tick_now().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let stats = p.pool.get_stats().await.unwrap();
    assert_eq!(stats.in_flight, 1);
    assert_eq!(stats.coalesced_total, 2);
    assert_eq!(p.transport.calls(DEVICE), 1, "one transport call, not three");

    p.shutdown().await;
}

#[tokio::test]
async fn test_reaped_device_records_timeout_and_polls_again() {
    let mut p = Pipeline::spawn_with_reap_budget(
        vec![test_device(DEVICE, 3)],
        1,
        Duration::from_millis(50),
    );
    p.transport.set_behavior(DEVICE, SimBehavior::Hang);

    p.scheduler.tick_now().await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    let reaped = p.pool.maintain_now().await.unwrap();
    assert_eq!(reaped, 1);

    let event = p.next_recorded().await;
    assert_eq!(
        event.observation.failure,
        Some(FailureReason::WorkerTimeout)
    );
    assert_eq!(event.consecutive_failures, 1);

    // The abort returned the only permit; the device polls again
    p.transport.set_behavior(
        DEVICE,
        SimBehavior::Healthy {
            latency: Duration::from_millis(1),
        },
    );

    let events = p.tick_and_settle(1).await;
    assert!(events[0].observation.reachable);
    assert_eq!(events[0].consecutive_failures, 0);

    let stats = p.pool.get_stats().await.unwrap();
    assert_eq!(stats.reaped_total, 1);
    assert_eq!(stats.completed_total, 1);

    p.shutdown().await;
}

#[tokio::test]
async fn test_large_fleet_dispatch_never_waits_on_polls() {
    let devices: Vec<_> = (0..1000)
        .map(|i| test_device(&format!("10.1.{}.{}:161", i / 250, i % 250), 3))
        .collect();
    let addresses: Vec<String> = devices.iter().map(|d| d.address.clone()).collect();

    let p = Pipeline::spawn(devices, 50);

    // None of these polls will ever finish
    for address in &addresses {
        p.transport.set_behavior(address.clone(), SimBehavior::Hang);
    }

    let started = Instant::now();
    let submitted = p.scheduler.tick_now().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(submitted, 1000);
    assert!(
        elapsed < Duration::from_secs(2),
        "dispatch took {elapsed:?}, it must not wait for poll completion"
    );

    let stats = p.pool.get_stats().await.unwrap();
    assert_eq!(stats.in_flight, 1000, "every device holds a slot");
    assert_eq!(stats.pool_size, 50, "only the pool bounds execution");

    p.shutdown().await;
}
