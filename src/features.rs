//! Feature extraction from window snapshots
//!
//! Per-sensor vectors always have [`FEATURE_COUNT`] entries in the order of
//! [`FEATURE_NAMES`]. A cold window still yields a vector: its statistical
//! features are zero and `sufficiency` is 0, so callers never have to handle
//! a failure for an expected warm-up state.

use std::f64::consts::TAU;

use chrono::{FixedOffset, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::SensorKind;
use crate::error::{MonitorError, MonitorResult};
use crate::window::WindowSnapshot;

pub const FEATURE_NAMES: [&str; 7] = [
    "value",
    "z_score",
    "rate_of_change",
    "range_position",
    "hour_sin",
    "hour_cos",
    "sufficiency",
];

pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

/// Names of the ratios appended to zone vectors
pub const ZONE_RATIO_NAMES: [&str; 2] = ["energy_per_occupant", "lighting_per_occupant"];

/// Index of a per-sensor feature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Value = 0,
    ZScore = 1,
    RateOfChange = 2,
    RangePosition = 3,
    HourSin = 4,
    HourCos = 5,
    Sufficiency = 6,
}

// Below this the window is treated as constant
const MIN_STD_DEV: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f64>,

    /// False when derived from a cold window (or a zone with cold members)
    pub sufficient: bool,
}

impl FeatureVector {
    pub fn new(values: Vec<f64>, sufficient: bool) -> Self {
        Self { values, sufficient }
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.values
            .get(feature as usize)
            .copied()
            .unwrap_or_default()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Inputs to extraction that do not come from the window itself
#[derive(Debug, Clone, Copy)]
pub struct FeatureContext {
    /// Building-local offset used for the time-of-day features
    pub utc_offset: FixedOffset,
}

impl Default for FeatureContext {
    fn default() -> Self {
        Self {
            utc_offset: Utc.fix(),
        }
    }
}

/// One zone member's contribution to zone extraction and correlation
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneMember {
    pub sensor_id: String,
    pub kind: SensorKind,

    /// None when the sensor produced nothing usable this tick
    pub vector: Option<FeatureVector>,
}

impl ZoneMember {
    /// The member's vector, if it came from a warm window
    pub fn warm_vector(&self) -> Option<&FeatureVector> {
        self.vector.as_ref().filter(|v| v.sufficient)
    }
}

#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    require_complete_zone: bool,
}

impl FeatureExtractor {
    pub fn new(require_complete_zone: bool) -> Self {
        Self {
            require_complete_zone,
        }
    }

    /// Derive the per-sensor feature vector of a snapshot
    pub fn extract(&self, snapshot: &WindowSnapshot, context: &FeatureContext) -> FeatureVector {
        let mut values = vec![0.0; FEATURE_COUNT];

        let Some(latest) = snapshot.latest() else {
            return FeatureVector::new(values, false);
        };

        let stats = snapshot.stats();
        values[Feature::Value as usize] = stats.latest;

        let local = latest.timestamp.with_timezone(&context.utc_offset);
        let hour = f64::from(local.hour())
            + f64::from(local.minute()) / 60.0
            + f64::from(local.second()) / 3600.0;
        values[Feature::HourSin as usize] = (TAU * hour / 24.0).sin();
        values[Feature::HourCos as usize] = (TAU * hour / 24.0).cos();

        if !snapshot.is_warm() {
            return FeatureVector::new(values, false);
        }

        values[Feature::ZScore as usize] = if stats.std_dev > MIN_STD_DEV {
            (stats.latest - stats.mean) / stats.std_dev
        } else {
            0.0
        };
        values[Feature::RateOfChange as usize] = stats.rate_of_change;
        values[Feature::RangePosition as usize] = if stats.max > stats.min {
            (stats.latest - stats.min) / (stats.max - stats.min)
        } else {
            0.5
        };
        values[Feature::Sufficiency as usize] = 1.0;

        FeatureVector::new(values, true)
    }

    /// Concatenate member vectors (sorted by sensor id) and append zone ratios
    ///
    /// With `require_complete_zone` any missing or cold member fails the
    /// extraction. Otherwise missing members contribute zeros, and only a zone
    /// without a single usable member fails.
    pub fn extract_zone(
        &self,
        zone_id: &str,
        members: &[ZoneMember],
    ) -> MonitorResult<FeatureVector> {
        let mut sorted: Vec<&ZoneMember> = members.iter().collect();
        sorted.sort_by(|a, b| a.sensor_id.cmp(&b.sensor_id));

        let missing: Vec<String> = sorted
            .iter()
            .filter(|m| m.warm_vector().is_none())
            .map(|m| m.sensor_id.clone())
            .collect();

        let incomplete = |missing: Vec<String>| MonitorError::IncompleteZone {
            zone_id: zone_id.to_string(),
            missing,
        };

        if sorted.is_empty() {
            return Err(incomplete(Vec::new()));
        }
        if missing.len() == sorted.len() || (self.require_complete_zone && !missing.is_empty()) {
            return Err(incomplete(missing));
        }

        let mut values = Vec::with_capacity(sorted.len() * FEATURE_COUNT + ZONE_RATIO_NAMES.len());
        let mut energy = 0.0;
        let mut lighting = 0.0;
        let mut occupants = 0.0;

        for member in &sorted {
            match member.vector.as_ref() {
                Some(vector) => {
                    values.extend_from_slice(vector.as_slice());
                    let value = vector.get(Feature::Value);
                    match member.kind {
                        SensorKind::Energy => energy += value,
                        SensorKind::Lighting => lighting += value,
                        SensorKind::Occupancy => occupants += value,
                        SensorKind::Hvac => {}
                    }
                }
                None => values.extend_from_slice(&[0.0; FEATURE_COUNT]),
            }
        }

        // an empty room still has a baseline load, divide by at least one person
        let occupants = occupants.max(1.0);
        values.push(energy / occupants);
        values.push(lighting / occupants);

        Ok(FeatureVector::new(values, missing.is_empty()))
    }
}
