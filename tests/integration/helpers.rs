//! Helper sensors, sinks and configs for integration tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sbems::actors::messages::MonitorEvent;
use sbems::config::MonitorConfig;
use sbems::error::SensorError;
use sbems::sensors::Sensor;
use sbems::sinks::Sink;
use sbems::system::MonitoringSystem;
use sbems::{Reading, SensorKind};
use tokio::sync::Notify;

/// Monday morning, the start of every scripted clock
pub fn monday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
}

/// Small, fast configuration; ticks only run when requested
pub fn test_config() -> MonitorConfig {
    let mut config = MonitorConfig {
        interval_ms: 3_600_000,
        min_samples: 10,
        sensor_timeout_ms: 200,
        sink_timeout_ms: 200,
        ..MonitorConfig::default()
    };
    config.window.capacity = Some(50);
    config.window.warmup_samples = 5;
    config.model.n_trees = 25;
    config
}

enum Behavior {
    Script(Mutex<VecDeque<f64>>),
    Fail,
    Hang,
    Gated {
        value: f64,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    },
}

/// Sensor with scripted behavior and a clock advancing by `step` per pull
pub struct FakeSensor {
    id: String,
    zone: String,
    kind: SensorKind,
    behavior: Behavior,
    clock: Mutex<DateTime<Utc>>,
    step: chrono::Duration,
    pulls: AtomicUsize,
}

impl FakeSensor {
    fn build(id: &str, zone: &str, kind: SensorKind, behavior: Behavior) -> Self {
        Self {
            id: id.to_string(),
            zone: zone.to_string(),
            kind,
            behavior,
            clock: Mutex::new(monday_morning()),
            step: chrono::Duration::seconds(60),
            pulls: AtomicUsize::new(0),
        }
    }

    pub fn scripted(id: &str, zone: &str, kind: SensorKind, values: &[f64]) -> Self {
        Self::build(
            id,
            zone,
            kind,
            Behavior::Script(Mutex::new(values.iter().copied().collect())),
        )
    }

    pub fn failing(id: &str, zone: &str, kind: SensorKind) -> Self {
        Self::build(id, zone, kind, Behavior::Fail)
    }

    pub fn hanging(id: &str, zone: &str, kind: SensorKind) -> Self {
        Self::build(id, zone, kind, Behavior::Hang)
    }

    /// Blocks inside `pull` until `release` is notified
    pub fn gated(
        id: &str,
        zone: &str,
        kind: SensorKind,
        value: f64,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    ) -> Self {
        Self::build(
            id,
            zone,
            kind,
            Behavior::Gated {
                value,
                entered,
                release,
            },
        )
    }

    /// Clock step between pulls; zero makes every reading a duplicate timestamp
    pub fn with_step(mut self, step: chrono::Duration) -> Self {
        self.step = step;
        self
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    fn next_reading(&self, value: f64) -> Reading {
        let mut clock = self.clock.lock().unwrap();
        *clock += self.step;
        Reading::new(&self.id, &self.zone, self.kind, *clock)
            .with_metric(self.kind.primary_metric(), value)
    }
}

#[async_trait]
impl Sensor for FakeSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn zone_id(&self) -> &str {
        &self.zone
    }

    fn kind(&self) -> SensorKind {
        self.kind
    }

    async fn pull(&self) -> Result<Reading, SensorError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);

        match &self.behavior {
            Behavior::Script(values) => {
                let value = values
                    .lock()
                    .unwrap()
                    .pop_front()
                    .ok_or_else(|| SensorError::Unavailable("script exhausted".to_string()))?;
                Ok(self.next_reading(value))
            }
            Behavior::Fail => Err(SensorError::Failed("hardware fault".to_string())),
            Behavior::Hang => std::future::pending().await,
            Behavior::Gated {
                value,
                entered,
                release,
            } => {
                entered.notify_one();
                release.notified().await;
                Ok(self.next_reading(*value))
            }
        }
    }
}

/// Sink that never finishes publishing
pub struct StalledSink;

#[async_trait]
impl Sink for StalledSink {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn publish(&self, _event: &MonitorEvent) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

/// Sink that rejects every event
pub struct BrokenSink;

#[async_trait]
impl Sink for BrokenSink {
    fn name(&self) -> &str {
        "broken"
    }

    async fn publish(&self, _event: &MonitorEvent) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }
}

/// Occupancy and energy values that move in lockstep
pub fn consistent_pair(ticks: usize) -> (Vec<f64>, Vec<f64>) {
    let occupancy = (0..ticks).map(|i| 10.0 + (i % 3) as f64).collect();
    let energy = (0..ticks).map(|i| 5.0 + 0.5 * (i % 3) as f64).collect();
    (occupancy, energy)
}

pub fn arc(sensor: FakeSensor) -> Arc<dyn Sensor> {
    Arc::new(sensor)
}

/// Register `occ-1` and `energy-1` in the lobby
pub fn register_lobby_pair(system: &mut MonitoringSystem, occupancy: &[f64], energy: &[f64]) {
    let occ = FakeSensor::scripted("occ-1", "lobby", SensorKind::Occupancy, occupancy);
    let energy = FakeSensor::scripted("energy-1", "lobby", SensorKind::Energy, energy);
    system.register_sensor(arc(occ)).unwrap();
    system.register_sensor(arc(energy)).unwrap();
}
