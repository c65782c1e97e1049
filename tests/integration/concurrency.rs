//! Concurrency tests: parallel pulls, periodic ticks, shared handles and stop

use std::sync::Arc;
use std::time::Duration;

use sbems::SensorKind;
use sbems::actors::messages::MonitorEvent;
use sbems::error::MonitorError;
use sbems::sinks::MemorySink;
use sbems::system::{MonitoringSystem, SystemState};
use tokio::sync::Notify;

use crate::helpers::*;

#[tokio::test]
async fn test_sensors_are_pulled_concurrently() {
    let entered_a = Arc::new(Notify::new());
    let entered_b = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let mut system = MonitoringSystem::new(test_config());
    system
        .register_sensor(arc(FakeSensor::gated(
            "occ-1",
            "lobby",
            SensorKind::Occupancy,
            5.0,
            entered_a.clone(),
            release.clone(),
        )))
        .unwrap();
    system
        .register_sensor(arc(FakeSensor::gated(
            "energy-1",
            "lobby",
            SensorKind::Energy,
            3.0,
            entered_b.clone(),
            release.clone(),
        )))
        .unwrap();

    let handle = system.start().unwrap();
    let tick = tokio::spawn({
        let handle = handle.clone();
        async move { handle.tick_now().await }
    });

    // both pulls are in flight before either is released
    tokio::time::timeout(Duration::from_secs(2), async {
        entered_a.notified().await;
        entered_b.notified().await;
    })
    .await
    .expect("both sensors entered pull");

    release.notify_waiters();

    let summary = tick.await.unwrap().unwrap();
    assert_eq!(summary.accepted, 2);
    assert!(!summary.cancelled);

    system.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_drops_in_flight_readings() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let sink = Arc::new(MemorySink::new(64));

    let mut system = MonitoringSystem::new(test_config());
    system
        .register_sensor(arc(FakeSensor::gated(
            "light-1",
            "lobby",
            SensorKind::Lighting,
            250.0,
            entered.clone(),
            release.clone(),
        )))
        .unwrap();
    system.register_sink(sink.clone()).unwrap();

    let handle = system.start().unwrap();
    let tick = tokio::spawn({
        let handle = handle.clone();
        async move { handle.tick_now().await }
    });
    entered.notified().await;

    let stopping = tokio::spawn(async move {
        system.stop().await.unwrap();
        system
    });

    // let stop() raise the flag before the pull completes
    tokio::time::sleep(Duration::from_millis(50)).await;
    release.notify_one();

    let summary = tick.await.unwrap().unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.accepted, 0);
    assert!(summary.alerts.is_empty());

    let system = stopping.await.unwrap();
    assert_eq!(system.state(), SystemState::Stopped);

    let readings = sink
        .events()
        .await
        .into_iter()
        .filter(|event| matches!(event, MonitorEvent::Reading(_)))
        .count();
    assert_eq!(readings, 0);

    assert!(matches!(handle.status().await, Err(MonitorError::NotRunning)));
}

#[tokio::test]
async fn test_periodic_ticks_run_without_requests() {
    let mut config = test_config();
    config.interval_ms = 20;

    let values: Vec<f64> = (0..500).map(|i| 20.0 + (i % 4) as f64 * 0.1).collect();

    let mut system = MonitoringSystem::new(config);
    system
        .register_sensor(arc(FakeSensor::scripted("hvac-1", "lobby", SensorKind::Hvac, &values)))
        .unwrap();

    let handle = system.start().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let status = handle.status().await.unwrap();
    assert!(status.ticks >= 2, "only {} ticks", status.ticks);
    assert_eq!(status.total_readings, status.ticks);
    assert_eq!(status.state, SystemState::Running);

    system.stop().await.unwrap();
}

#[tokio::test]
async fn test_handles_are_shared_across_tasks() {
    let (occupancy, energy) = consistent_pair(30);

    let mut system = MonitoringSystem::new(test_config());
    register_lobby_pair(&mut system, &occupancy, &energy);

    let handle = system.start().unwrap();

    let tickers: Vec<_> = (0..3)
        .map(|_| {
            let handle = handle.clone();
            tokio::spawn(async move {
                for _ in 0..10 {
                    handle.tick_now().await.unwrap();
                }
            })
        })
        .collect();

    let observer = tokio::spawn({
        let handle = handle.clone();
        async move {
            for _ in 0..20 {
                let status = handle.status().await.unwrap();
                assert!(status.ticks <= 30);
                tokio::task::yield_now().await;
            }
        }
    });

    for ticker in tickers {
        ticker.await.unwrap();
    }
    observer.await.unwrap();

    // ticks are serialized by the actor, every scripted value was consumed once
    let status = handle.status().await.unwrap();
    assert_eq!(status.ticks, 30);
    assert_eq!(status.total_readings, 60);

    let snapshot = handle.snapshot("occ-1").await.unwrap().unwrap();
    assert!(
        snapshot
            .readings()
            .windows(2)
            .all(|pair| pair[0].timestamp < pair[1].timestamp)
    );

    system.stop().await.unwrap();
}

#[tokio::test]
async fn test_dropping_the_system_stops_sampling() {
    let mut config = test_config();
    config.interval_ms = 20;

    let values: Vec<f64> = (0..500).map(|i| 300.0 + (i % 5) as f64).collect();
    let sensor = Arc::new(FakeSensor::scripted("light-1", "lobby", SensorKind::Lighting, &values));

    let mut system = MonitoringSystem::new(config);
    system.register_sensor(sensor.clone()).unwrap();

    let handle = system.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sensor.pulls() > 0);

    // a clone outlives the system, the actor still has to stop sampling
    let kept = handle.clone();
    drop(handle);
    drop(system);

    tokio::time::sleep(Duration::from_millis(60)).await;
    let pulls = sensor.pulls();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sensor.pulls(), pulls);

    assert!(matches!(kept.status().await, Err(MonitorError::NotRunning)));
}
