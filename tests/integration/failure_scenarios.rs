//! Failure tests: broken sensors, bad data and misbehaving sinks
//!
//! A single faulty component must never stall or abort a tick.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sbems::SensorKind;
use sbems::actors::messages::{MonitorEvent, WarningKind};
use sbems::error::MonitorError;
use sbems::sinks::{MemorySink, Sink};
use sbems::system::MonitoringSystem;

use crate::helpers::*;

#[tokio::test]
async fn test_failing_sensor_does_not_block_others() {
    let values = [21.0, 21.2, 21.1];
    let healthy = Arc::new(FakeSensor::scripted("hvac-1", "lobby", SensorKind::Hvac, &values));

    let mut system = MonitoringSystem::new(test_config());
    system.register_sensor(healthy.clone()).unwrap();
    system
        .register_sensor(arc(FakeSensor::failing("occ-1", "lobby", SensorKind::Occupancy)))
        .unwrap();
    let mut events = system.subscribe();

    let handle = system.start().unwrap();
    for _ in 0..3 {
        let summary = handle.tick_now().await.unwrap();
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.skipped, 1);
    }
    assert_eq!(healthy.pulls(), 3);

    let mut warnings = 0;
    while let Ok(event) = events.try_recv() {
        if let MonitorEvent::Warning(warning) = event {
            assert_eq!(warning.sensor_id, "occ-1");
            assert_eq!(warning.kind, WarningKind::SensorUnavailable);
            assert!(warning.message.contains("hardware fault"));
            warnings += 1;
        }
    }
    assert_eq!(warnings, 3);

    let status = handle.status().await.unwrap();
    assert_eq!(status.skipped_readings, 3);
    assert_eq!(status.total_readings, 3);

    system.stop().await.unwrap();
}

#[tokio::test]
async fn test_hanging_sensor_times_out() {
    let mut system = MonitoringSystem::new(test_config());
    system
        .register_sensor(arc(FakeSensor::scripted(
            "light-1",
            "lobby",
            SensorKind::Lighting,
            &[300.0],
        )))
        .unwrap();
    system
        .register_sensor(arc(FakeSensor::hanging("energy-1", "lobby", SensorKind::Energy)))
        .unwrap();

    let handle = system.start().unwrap();

    let started = Instant::now();
    let summary = handle.tick_now().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.skipped, 1);
    assert!(elapsed >= Duration::from_millis(200), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "returned after {elapsed:?}");

    system.stop().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_timestamps_are_rejected() {
    let sensor = FakeSensor::scripted("occ-1", "lobby", SensorKind::Occupancy, &[4.0, 5.0, 6.0])
        .with_step(chrono::Duration::zero());

    let mut system = MonitoringSystem::new(test_config());
    system.register_sensor(arc(sensor)).unwrap();
    let mut events = system.subscribe();

    let handle = system.start().unwrap();

    // the first reading of an empty window is always in order
    let first = handle.tick_now().await.unwrap();
    assert_eq!(first.accepted, 1);

    let second = handle.tick_now().await.unwrap();
    assert_eq!(second.accepted, 0);
    assert_eq!(second.rejected, 1);

    let snapshot = handle.snapshot("occ-1").await.unwrap().unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.stats().latest, 4.0);

    let warning = loop {
        match events.recv().await.unwrap() {
            MonitorEvent::Warning(warning) => break warning,
            _ => continue,
        }
    };
    assert_eq!(warning.kind, WarningKind::OutOfOrder);

    system.stop().await.unwrap();
}

#[tokio::test]
async fn test_non_finite_values_are_rejected() {
    let mut system = MonitoringSystem::new(test_config());
    system
        .register_sensor(arc(FakeSensor::scripted(
            "hvac-1",
            "lobby",
            SensorKind::Hvac,
            &[21.0, f64::NAN, f64::INFINITY, 21.5],
        )))
        .unwrap();

    let handle = system.start().unwrap();
    let mut rejected = 0;
    for _ in 0..4 {
        rejected += handle.tick_now().await.unwrap().rejected;
    }
    assert_eq!(rejected, 2);

    let snapshot = handle.snapshot("hvac-1").await.unwrap().unwrap();
    let values: Vec<f64> = snapshot
        .readings()
        .iter()
        .filter_map(|r| r.primary_value())
        .collect();
    assert_eq!(values, vec![21.0, 21.5]);

    let status = handle.status().await.unwrap();
    assert_eq!(status.rejected_readings, 2);

    system.stop().await.unwrap();
}

#[tokio::test]
async fn test_stalled_and_broken_sinks_are_skipped() {
    let (occupancy, energy) = consistent_pair(3);
    let memory = Arc::new(MemorySink::new(64));
    let sinks = vec![
        Arc::new(StalledSink) as Arc<dyn Sink>,
        Arc::new(BrokenSink) as Arc<dyn Sink>,
        memory.clone() as Arc<dyn Sink>,
    ];

    let mut config = test_config();
    config.sink_timeout_ms = 50;

    let mut system = MonitoringSystem::new(config);
    register_lobby_pair(&mut system, &occupancy, &energy);
    for sink in sinks {
        system.register_sink(sink).unwrap();
    }

    let handle = system.start().unwrap();

    let started = Instant::now();
    for _ in 0..3 {
        handle.tick_now().await.unwrap();
    }
    assert!(started.elapsed() < Duration::from_millis(500));

    system.stop().await.unwrap();
    assert_eq!(memory.len().await, 6);
}

#[tokio::test]
async fn test_stalled_sink_does_not_slow_ticks() {
    let mut config = test_config();
    config.interval_ms = 20;
    config.sink_timeout_ms = 100;
    config.sink_queue_size = 8;

    let mut system = MonitoringSystem::new(config);
    for i in 0..8 {
        let values: Vec<f64> = (0..200).map(|j| 21.0 + (j % 4) as f64 * 0.1).collect();
        system
            .register_sensor(arc(FakeSensor::scripted(
                &format!("hvac-{i}"),
                "lobby",
                SensorKind::Hvac,
                &values,
            )))
            .unwrap();
    }
    system.register_sink(Arc::new(StalledSink)).unwrap();

    let handle = system.start().unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let asked = Instant::now();
    let status = handle.status().await.unwrap();
    assert!(
        asked.elapsed() < Duration::from_millis(100),
        "status took {:?}",
        asked.elapsed()
    );

    // 25 intervals fit into the sleep
    assert!(status.ticks >= 10, "only {} ticks", status.ticks);
    assert!(status.dropped_events > 0);
    assert_eq!(status.total_readings, status.ticks * 8);

    system.stop().await.unwrap();
}

#[tokio::test]
async fn test_register_after_start_is_refused() {
    let mut system = MonitoringSystem::new(test_config());
    system
        .register_sensor(arc(FakeSensor::scripted("occ-1", "lobby", SensorKind::Occupancy, &[1.0])))
        .unwrap();
    system.start().unwrap();

    let late = FakeSensor::scripted("occ-2", "lobby", SensorKind::Occupancy, &[1.0]);
    let late = system.register_sensor(arc(late));
    assert!(matches!(late, Err(MonitorError::AlreadyRunning)));

    system.stop().await.unwrap();

    // registration reopens once stopped
    system
        .register_sensor(arc(FakeSensor::scripted("occ-2", "lobby", SensorKind::Occupancy, &[1.0])))
        .unwrap();
}
