//! End-to-end tests of the tick pipeline through the public system API

use std::sync::Arc;

use sbems::actors::messages::MonitorEvent;
use sbems::alerts::{EntityId, Severity};
use sbems::sinks::{JsonLinesSink, MemorySink, Sink};
use sbems::system::{MonitoringSystem, SystemState};

use crate::helpers::*;

/// 40 consistent ticks, then occupancy jumps while energy collapses
fn diverging_zone() -> (Vec<f64>, Vec<f64>) {
    let (mut occupancy, mut energy) = consistent_pair(40);
    occupancy.push(100.0);
    energy.push(0.0);
    (occupancy, energy)
}

#[tokio::test]
async fn test_consistent_zone_raises_no_zone_alerts() {
    let (occupancy, energy) = consistent_pair(40);

    let mut system = MonitoringSystem::new(test_config());
    register_lobby_pair(&mut system, &occupancy, &energy);

    let handle = system.start().unwrap();

    let mut zones_analyzed = 0;
    for _ in 0..40 {
        let summary = handle.tick_now().await.unwrap();
        zones_analyzed += summary.zones_analyzed;
        assert!(
            summary
                .alerts
                .iter()
                .all(|alert| !matches!(alert.entity, EntityId::Zone(_))),
            "unexpected zone alert in tick {}",
            summary.tick
        );
    }

    // warm from the fifth reading on
    assert_eq!(zones_analyzed, 36);

    let status = handle.status().await.unwrap();
    assert_eq!(status.total_readings, 80);
    assert_eq!(status.zones, 1);
    assert!(status.sensors.iter().all(|s| s.model_trained));

    system.stop().await.unwrap();
}

#[tokio::test]
async fn test_diverging_zone_raises_critical_alert() {
    let (occupancy, energy) = diverging_zone();
    let sink = Arc::new(MemorySink::new(1024));

    let mut system = MonitoringSystem::new(test_config());
    register_lobby_pair(&mut system, &occupancy, &energy);
    system.register_sink(sink.clone()).unwrap();
    let mut events = system.subscribe();

    let handle = system.start().unwrap();
    for _ in 0..40 {
        handle.tick_now().await.unwrap();
    }

    let summary = handle.tick_now().await.unwrap();
    let zone_alert = summary
        .alerts
        .iter()
        .find(|alert| alert.entity == EntityId::Zone("lobby".to_string()))
        .expect("zone alert");

    assert_eq!(zone_alert.severity, Severity::Critical);
    assert!(zone_alert.score > 0.99);
    assert!(zone_alert.message.contains("energy-1"));
    assert!(zone_alert.message.contains("occ-1"));
    assert!(!zone_alert.features.is_empty());

    // the same alert went to subscribers and sinks
    let mut broadcast_alerts = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let MonitorEvent::Alert(alert) = event {
            broadcast_alerts.push(alert.id);
        }
    }
    assert!(broadcast_alerts.contains(&zone_alert.id));

    // stopping drains the sink queues
    system.stop().await.unwrap();
    assert!(sink.alerts().await.iter().any(|a| a.id == zone_alert.id));
}

#[tokio::test]
async fn test_acknowledge_and_summary() {
    let (occupancy, energy) = diverging_zone();

    let mut system = MonitoringSystem::new(test_config());
    register_lobby_pair(&mut system, &occupancy, &energy);

    let handle = system.start().unwrap();
    for _ in 0..41 {
        handle.tick_now().await.unwrap();
    }

    let recent = handle.recent_alerts(100).await.unwrap();
    let zone_alert = recent
        .iter()
        .find(|alert| matches!(alert.entity, EntityId::Zone(_)))
        .expect("zone alert in history")
        .clone();

    let before = handle.anomaly_summary().await.unwrap();
    assert_eq!(before.total, recent.len());
    assert_eq!(before.unacknowledged, recent.len());
    assert!(before.critical_entities.contains(&EntityId::Zone("lobby".to_string())));

    let acked = handle
        .acknowledge(zone_alert.id, "facility-manager")
        .await
        .unwrap()
        .expect("alert is known");
    assert!(acked.is_acknowledged());
    assert_eq!(
        acked.acknowledgement.as_ref().map(|a| a.by.as_str()),
        Some("facility-manager")
    );

    let after = handle.anomaly_summary().await.unwrap();
    assert_eq!(after.unacknowledged, before.unacknowledged - 1);

    let unknown = handle.acknowledge(uuid::Uuid::new_v4(), "nobody").await.unwrap();
    assert!(unknown.is_none());

    system.stop().await.unwrap();
}

#[tokio::test]
async fn test_recent_alerts_are_newest_first_and_limited() {
    let (occupancy, energy) = diverging_zone();

    let mut system = MonitoringSystem::new(test_config());
    register_lobby_pair(&mut system, &occupancy, &energy);

    let handle = system.start().unwrap();
    for _ in 0..41 {
        handle.tick_now().await.unwrap();
    }

    let all = handle.recent_alerts(usize::MAX).await.unwrap();
    assert!(!all.is_empty());
    assert!(all.windows(2).all(|pair| pair[0].timestamp >= pair[1].timestamp));

    let one = handle.recent_alerts(1).await.unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].id, all[0].id);

    system.stop().await.unwrap();
}

#[tokio::test]
async fn test_json_export_of_a_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    let (occupancy, energy) = consistent_pair(6);

    let mut system = MonitoringSystem::new(test_config());
    register_lobby_pair(&mut system, &occupancy, &energy);
    let sink: Arc<dyn Sink> = Arc::new(JsonLinesSink::create(&path).await.unwrap());
    system.register_sink(sink).unwrap();

    let handle = system.start().unwrap();
    for _ in 0..6 {
        handle.tick_now().await.unwrap();
    }
    system.stop().await.unwrap();
    assert_eq!(system.state(), SystemState::Stopped);

    let content = tokio::fs::read_to_string(&path).await.unwrap();
    let readings = content
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap())
        .filter(|value| value["event"] == "reading")
        .count();
    assert_eq!(readings, 12);
}
