//! Message types for the monitor actor
//!
//! ## Design Principles
//!
//! 1. **Commands**: request/response messages sent to the driver via mpsc
//! 2. **Events**: broadcast notifications, also delivered to every registered sink
//! 3. **Immutability**: events are cloneable for multi-subscriber fan-out

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::alerts::{Alert, AnomalySummary};
use crate::window::{WindowSnapshot, WindowStats};
use crate::{Reading, SensorKind};

/// Event published by the monitor on every tick
///
/// The broadcast channel may lag or drop events for slow subscribers; sinks
/// are fed directly by the driver and do not depend on it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A reading accepted into its window
    Reading(Reading),

    /// An alert emitted by the alert policy
    Alert(Alert),

    /// A reading that was dropped or a sensor that was skipped
    Warning(DataQualityWarning),
}

impl MonitorEvent {
    pub fn as_alert(&self) -> Option<&Alert> {
        match self {
            MonitorEvent::Alert(alert) => Some(alert),
            _ => None,
        }
    }

    pub fn as_warning(&self) -> Option<&DataQualityWarning> {
        match self {
            MonitorEvent::Warning(warning) => Some(warning),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    OutOfOrder,
    InvalidReading,
    SensorUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataQualityWarning {
    pub sensor_id: String,
    pub kind: WarningKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Commands that can be sent to the MonitorActor
#[derive(Debug)]
pub enum MonitorCommand {
    /// Run one tick immediately, bypassing the interval timer
    TickNow {
        respond_to: oneshot::Sender<TickSummary>,
    },

    GetStatus {
        respond_to: oneshot::Sender<MonitorStatus>,
    },

    /// Most recent alerts, newest first
    RecentAlerts {
        limit: usize,
        respond_to: oneshot::Sender<Vec<Alert>>,
    },

    /// Acknowledge an alert from the history
    ///
    /// Responds with the updated alert, or `None` if it is unknown.
    Acknowledge {
        alert_id: Uuid,
        by: String,
        respond_to: oneshot::Sender<Option<Alert>>,
    },

    GetSnapshot {
        sensor_id: String,
        respond_to: oneshot::Sender<Option<WindowSnapshot>>,
    },

    GetAnomalySummary {
        respond_to: oneshot::Sender<AnomalySummary>,
    },

    /// Finish the current tick and exit
    Shutdown,
}

/// Outcome of a single tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickSummary {
    pub tick: u64,

    /// Readings accepted into windows
    pub accepted: usize,

    /// Sensors that timed out or failed
    pub skipped: usize,

    /// Readings dropped as out-of-order or invalid
    pub rejected: usize,

    /// Vectors scored by a trained model
    pub scored: usize,

    /// Zones whose correlation was analyzed
    pub zones_analyzed: usize,

    pub alerts: Vec<Alert>,

    /// Whether the tick was abandoned because of a stop request
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemState {
    Stopped,
    Running,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorStatus {
    pub sensor_id: String,
    pub zone_id: String,
    pub kind: SensorKind,
    pub window_len: usize,
    pub warm: bool,
    pub model_population: usize,
    pub model_trained: bool,
    pub last_score: Option<f64>,
    pub stats: WindowStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorStatus {
    pub state: SystemState,
    pub started_at: Option<DateTime<Utc>>,
    pub ticks: u64,
    pub total_readings: u64,
    pub skipped_readings: u64,
    pub rejected_readings: u64,
    pub total_alerts: u64,

    /// Events a full sink queue had to drop
    pub dropped_events: u64,

    pub zones: usize,
    pub sensors: Vec<SensorStatus>,
}
