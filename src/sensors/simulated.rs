use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use super::Sensor;
use crate::error::SensorError;
use crate::{Reading, SensorKind};

const WEEKDAY_LEVELS: [f64; 24] = [
    0.01, 0.01, 0.01, 0.01, 0.01, 0.01, // 00-05
    0.1, 0.3, 0.7, 0.9, 0.95, 0.9, // 06-11
    0.7, 0.85, 0.9, 0.95, 0.9, 0.8, // 12-17
    0.4, 0.2, 0.1, 0.05, 0.02, 0.01, // 18-23
];

const WEEKEND_LEVELS: [f64; 24] = [
    0.05, 0.05, 0.05, 0.05, 0.05, 0.05, // 00-05
    0.05, 0.05, 0.05, 0.1, 0.3, 0.4, // 06-11
    0.5, 0.4, 0.6, 0.5, 0.4, 0.3, // 12-17
    0.2, 0.15, 0.1, 0.05, 0.05, 0.05, // 18-23
];

/// Time-of-day occupancy shared by all simulated sensors of a zone
///
/// Sensors of one zone derive their values from the same level, which is
/// what makes a healthy simulated zone internally consistent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OccupancyProfile {
    /// People in the zone at full occupancy
    pub capacity: u32,

    pub utc_offset: FixedOffset,
}

impl OccupancyProfile {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            utc_offset: Utc.fix(),
        }
    }

    pub fn with_utc_offset(mut self, utc_offset: FixedOffset) -> Self {
        self.utc_offset = utc_offset;
        self
    }

    /// Expected fraction of capacity present at `at`, in [0, 1]
    pub fn level(&self, at: DateTime<Utc>) -> f64 {
        let local = at.with_timezone(&self.utc_offset);
        let hour = local.hour() as usize;

        match local.weekday() {
            Weekday::Sat | Weekday::Sun => WEEKEND_LEVELS[hour],
            _ => WEEKDAY_LEVELS[hour],
        }
    }
}

/// Sensor that synthesizes plausible readings from an occupancy profile
#[derive(Debug)]
pub struct SimulatedSensor {
    id: String,
    zone_id: String,
    kind: SensorKind,
    profile: OccupancyProfile,
    failure_probability: f64,
    spike_probability: f64,
    rng: Mutex<StdRng>,
}

impl SimulatedSensor {
    pub fn new(
        id: impl Into<String>,
        zone_id: impl Into<String>,
        kind: SensorKind,
        profile: OccupancyProfile,
        seed: u64,
    ) -> Self {
        Self {
            id: id.into(),
            zone_id: zone_id.into(),
            kind,
            profile,
            failure_probability: 0.0,
            spike_probability: 0.0,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn with_failure_probability(mut self, probability: f64) -> Self {
        self.failure_probability = probability.clamp(0.0, 1.0);
        self
    }

    /// Probability of an injected anomalous spike per sample
    pub fn with_spike_probability(mut self, probability: f64) -> Self {
        self.spike_probability = probability.clamp(0.0, 1.0);
        self
    }

    /// Produce the reading this sensor would report at `at`
    pub fn sample_at(&self, at: DateTime<Utc>) -> Result<Reading, SensorError> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if rng.gen_bool(self.failure_probability) {
            return Err(SensorError::Failed(format!(
                "simulated fault on {}",
                self.id
            )));
        }

        let level = self.profile.level(at);
        let spike = if rng.gen_bool(self.spike_probability) {
            rng.gen_range(3.0..6.0)
        } else {
            1.0
        };

        let reading = Reading::new(&self.id, &self.zone_id, self.kind, at);
        let reading = match self.kind {
            SensorKind::Occupancy => {
                let expected = f64::from(self.profile.capacity) * level;
                let count = (expected + gaussian(&mut rng, 0.1 * expected + 0.3)).round();
                reading.with_metric("people_count", (count * spike).max(0.0))
            }
            SensorKind::Energy => {
                let base_kw = 2.0;
                let peak_kw = 2.0 + 0.8 * f64::from(self.profile.capacity);
                let expected = base_kw + (peak_kw - base_kw) * level;
                let power = expected + gaussian(&mut rng, 0.05 * expected);
                reading
                    .with_metric("power_kw", (power * spike).max(0.0))
                    .with_metric("voltage_v", 230.0 + gaussian(&mut rng, 1.0))
            }
            SensorKind::Lighting => {
                let expected = 50.0 + 450.0 * level;
                let lux = expected + gaussian(&mut rng, 0.05 * expected);
                reading
                    .with_metric("illuminance_lux", (lux * spike).max(0.0))
                    .with_metric("power_w", lux * 0.05)
            }
            SensorKind::Hvac => {
                let hour = f64::from(at.with_timezone(&self.profile.utc_offset).hour());
                let daily = 1.5 * (std::f64::consts::TAU * (hour - 14.0) / 24.0).cos();
                let temperature = 21.0 + 2.0 * level + daily + gaussian(&mut rng, 0.3);
                let humidity = 55.0 - (temperature - 20.0) * 2.0 + gaussian(&mut rng, 2.0);
                reading
                    .with_metric("temperature_c", temperature * spike)
                    .with_metric("humidity_pct", humidity.clamp(0.0, 100.0))
            }
        };

        trace!(sensor = %self.id, value = ?reading.primary_value(), "simulated sample");
        Ok(reading)
    }
}

/// Normal sample via Box-Muller
fn gaussian(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }

    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos() * std_dev
}

#[async_trait]
impl Sensor for SimulatedSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn zone_id(&self) -> &str {
        &self.zone_id
    }

    fn kind(&self) -> SensorKind {
        self.kind
    }

    async fn pull(&self) -> Result<Reading, SensorError> {
        self.sample_at(Utc::now())
    }
}
