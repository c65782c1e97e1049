pub mod actors;
pub mod alerts;
pub mod config;
pub mod correlation;
pub mod error;
pub mod features;
pub mod model;
pub mod sensors;
pub mod sinks;
pub mod system;
pub mod window;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four families of building sensors.
///
/// Kind-specific measurements live in [`Reading::metrics`]; the kind only
/// decides which metric is the primary one used for windowed statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Hvac,
    Lighting,
    Occupancy,
    Energy,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Hvac,
        SensorKind::Lighting,
        SensorKind::Occupancy,
        SensorKind::Energy,
    ];

    /// Name of the metric that drives windows, features and scoring
    pub fn primary_metric(self) -> &'static str {
        match self {
            SensorKind::Hvac => "temperature_c",
            SensorKind::Lighting => "illuminance_lux",
            SensorKind::Occupancy => "people_count",
            SensorKind::Energy => "power_kw",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensorKind::Hvac => "hvac",
            SensorKind::Lighting => "lighting",
            SensorKind::Occupancy => "occupancy",
            SensorKind::Energy => "energy",
        };
        f.write_str(name)
    }
}

/// One timestamped measurement set from a sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor_id: String,
    pub zone_id: String,
    pub kind: SensorKind,
    pub timestamp: DateTime<Utc>,
    pub metrics: BTreeMap<String, f64>,

    /// Set to false by sources that know the measurement is unreliable
    pub valid: bool,
}

impl Reading {
    pub fn new(
        sensor_id: impl Into<String>,
        zone_id: impl Into<String>,
        kind: SensorKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            zone_id: zone_id.into(),
            kind,
            timestamp,
            metrics: BTreeMap::new(),
            valid: true,
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_validity(mut self, valid: bool) -> Self {
        self.valid = valid;
        self
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// The primary metric, if present and finite
    pub fn primary_value(&self) -> Option<f64> {
        self.metric(self.kind.primary_metric())
            .filter(|value| value.is_finite())
    }

    /// Why this reading cannot enter a window, if it cannot
    pub fn quality_issue(&self) -> Option<String> {
        if !self.valid {
            return Some("reading flagged invalid by source".to_string());
        }

        match self.metric(self.kind.primary_metric()) {
            None => Some(format!(
                "missing primary metric `{}`",
                self.kind.primary_metric()
            )),
            Some(value) if !value.is_finite() => Some(format!(
                "non-finite primary metric `{}` ({value})",
                self.kind.primary_metric()
            )),
            Some(_) => None,
        }
    }
}
