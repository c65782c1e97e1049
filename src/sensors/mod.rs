//! Sensor sources
//!
//! The engine only needs one capability from a sensor: produce a [`Reading`]
//! when asked. Timeouts are imposed by the driver, not by implementations.

mod simulated;

use std::sync::Arc;

use async_trait::async_trait;

pub use simulated::{OccupancyProfile, SimulatedSensor};

use crate::config::MonitorConfig;
use crate::error::{MonitorResult, SensorError};
use crate::{Reading, SensorKind};

#[async_trait]
pub trait Sensor: Send + Sync {
    fn id(&self) -> &str;

    fn zone_id(&self) -> &str;

    fn kind(&self) -> SensorKind;

    /// Take one sample
    async fn pull(&self) -> Result<Reading, SensorError>;
}

/// Build one [`SimulatedSensor`] per configured sensor
///
/// Seeds are derived from `model.seed` and the sensor's position in the
/// configuration, so a given file always simulates the same building.
pub fn simulated_from_config(config: &MonitorConfig) -> MonitorResult<Vec<Arc<dyn Sensor>>> {
    let utc_offset = config.utc_offset()?;
    let mut sensors: Vec<Arc<dyn Sensor>> = Vec::new();

    for zone in &config.zones {
        let profile = OccupancyProfile::new(zone.capacity).with_utc_offset(utc_offset);

        for sensor in &zone.sensors {
            let seed = config.model.seed.wrapping_add(sensors.len() as u64);
            let simulated = SimulatedSensor::new(&sensor.id, &zone.id, sensor.kind, profile, seed)
                .with_failure_probability(sensor.failure_probability)
                .with_spike_probability(sensor.spike_probability);
            sensors.push(Arc::new(simulated));
        }
    }

    Ok(sensors)
}
