//! Healthy simulated zones must look consistent to the correlation analyzer

use chrono::{DateTime, Duration, Utc};
use sbems::SensorKind;
use sbems::correlation::{CorrelationAnalyzer, CorrelationRule};
use sbems::features::{FeatureContext, FeatureExtractor, ZoneMember};
use sbems::sensors::{OccupancyProfile, Sensor, SimulatedSensor};
use sbems::window::RollingWindow;

use crate::helpers::monday_morning;

const THRESHOLD: f64 = 0.8;

struct SimulatedZone {
    members: Vec<(SimulatedSensor, RollingWindow)>,
}

impl SimulatedZone {
    fn new(zone: &str, capacity: u32, seed: u64) -> Self {
        let profile = OccupancyProfile::new(capacity);
        let members = SensorKind::ALL
            .into_iter()
            .enumerate()
            .map(|(i, kind)| {
                let id = format!("{zone}-{kind}");
                let sensor = SimulatedSensor::new(&id, zone, kind, profile, seed + i as u64);
                (sensor, RollingWindow::new(id, 60, 10))
            })
            .collect();
        Self { members }
    }

    /// Sample every member at `at` and score the zone, None while cold
    fn score_at(&mut self, at: DateTime<Utc>, analyzer: &CorrelationAnalyzer) -> Option<f64> {
        let extractor = FeatureExtractor::new(true);
        let context = FeatureContext::default();

        let mut zone_members = Vec::new();
        for (sensor, window) in &mut self.members {
            let reading = sensor.sample_at(at).unwrap();
            window.append(reading).unwrap();
            zone_members.push(ZoneMember {
                sensor_id: window.sensor_id().to_string(),
                kind: sensor.kind(),
                vector: Some(extractor.extract(&window.snapshot(), &context)),
            });
        }

        if zone_members.iter().any(|m| m.warm_vector().is_none()) {
            return None;
        }
        Some(analyzer.analyze("zone", &zone_members))
    }
}

fn steady_state_ratio(capacity: u32, seed: u64, start: DateTime<Utc>, steps: usize) -> f64 {
    let analyzer = CorrelationAnalyzer::new(CorrelationRule::defaults(), 6.0);
    let mut zone = SimulatedZone::new("zone", capacity, seed);

    let mut scored = 0;
    let mut below = 0;
    for step in 0..steps {
        let at = start + Duration::minutes(2 * step as i64);
        if let Some(score) = zone.score_at(at, &analyzer) {
            scored += 1;
            if score < THRESHOLD {
                below += 1;
            }
        }
    }

    assert!(scored > 0);
    below as f64 / scored as f64
}

#[test]
fn test_working_day_stays_below_threshold() {
    let ratio = steady_state_ratio(20, 7, monday_morning(), 240);
    assert!(ratio >= 0.95, "only {:.1}% of ticks below threshold", ratio * 100.0);
}

#[test]
fn test_large_zone_over_a_full_day_stays_below_threshold() {
    let midnight = monday_morning() - Duration::hours(9);
    let ratio = steady_state_ratio(80, 99, midnight, 720);
    assert!(ratio >= 0.95, "only {:.1}% of ticks below threshold", ratio * 100.0);
}
