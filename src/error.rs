//! Error types for the monitoring engine
//!
//! Errors fall into a small taxonomy:
//! - data quality (`OutOfOrder`, `InvalidReading`): the reading is dropped
//! - `SensorUnavailable`: the sensor is skipped for the tick
//! - `ModelNotTrained`, `IncompleteZone`: expected states, scoring is skipped
//! - configuration and lifecycle errors, which only surface from `start()`
//!   and the registration calls

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for monitoring operations
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors that can occur inside the monitoring pipeline
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Reading timestamp did not advance past the sensor's last reading
    #[error("out-of-order reading for sensor {sensor_id}: {timestamp} is not after {last}")]
    OutOfOrder {
        sensor_id: String,
        timestamp: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    /// Reading is malformed or flagged invalid
    #[error("invalid reading from sensor {sensor_id}: {reason}")]
    InvalidReading { sensor_id: String, reason: String },

    /// Sensor pull timed out or failed
    #[error("sensor {sensor_id} unavailable: {source}")]
    SensorUnavailable {
        sensor_id: String,
        #[source]
        source: SensorError,
    },

    /// Not enough observations to fit the model yet
    #[error("model not trained: {population}/{required} samples observed")]
    ModelNotTrained { population: usize, required: usize },

    /// Vector length does not match the length the model was fit on
    #[error("feature vector has {actual} dimensions, model expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// One or more zone members have no usable features this tick
    #[error("zone {zone_id} incomplete, missing features for: {}", missing.join(", "))]
    IncompleteZone {
        zone_id: String,
        missing: Vec<String>,
    },

    /// Configuration attempted after `start()`
    #[error("monitoring system is already running")]
    AlreadyRunning,

    /// Lifecycle call that needs a running system
    #[error("monitoring system is not running")]
    NotRunning,

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors produced by sensor sources
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    /// The pull did not complete within the per-sensor timeout
    #[error("pull timed out after {0:?}")]
    Timeout(Duration),

    /// Sensor is offline or in maintenance
    #[error("sensor offline: {0}")]
    Unavailable(String),

    /// Sensor hardware or simulation failure
    #[error("sensor failure: {0}")]
    Failed(String),
}
