//! Turning scores into alerts
//!
//! [`AlertPolicy`] runs one small state machine per entity:
//!
//! ```text
//!            score >= threshold
//!   Quiet ─────────────────────────▶ (emit one Alert) ──▶ Suppressed
//!     ▲                                                     │
//!     └──────────────── reset condition (ResetMode) ────────┘
//! ```
//!
//! The triggered state is transient: an entity that crosses the threshold
//! emits exactly one alert and is suppressed in the same evaluation.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::features::FeatureVector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    /// Grade a score by how far it exceeds the threshold
    ///
    /// The range from the threshold to 1.0 is split into four equal bands.
    pub fn from_score(score: f64, threshold: f64) -> Severity {
        let headroom = 1.0 - threshold;
        let excess = if headroom > f64::EPSILON {
            (score - threshold) / headroom
        } else {
            1.0
        };

        match excess {
            e if e >= 0.75 => Severity::Critical,
            e if e >= 0.5 => Severity::High,
            e if e >= 0.25 => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// What an alert is about
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum EntityId {
    Sensor(String),
    Zone(String),
}

impl EntityId {
    pub fn id(&self) -> &str {
        match self {
            EntityId::Sensor(id) | EntityId::Zone(id) => id,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Sensor(id) => write!(f, "sensor {id}"),
            EntityId::Zone(id) => write!(f, "zone {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub by: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub entity: EntityId,
    pub severity: Severity,
    pub score: f64,

    /// Feature vector that triggered the alert
    pub features: FeatureVector,

    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub acknowledgement: Option<Acknowledgement>,
}

impl Alert {
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledgement.is_some()
    }

    /// Mark as acknowledged; returns false if it already was
    pub fn acknowledge(&mut self, by: impl Into<String>, at: DateTime<Utc>) -> bool {
        if self.acknowledgement.is_some() {
            return false;
        }

        self.acknowledgement = Some(Acknowledgement { by: by.into(), at });
        true
    }

    /// Append context to the message
    pub fn with_detail(mut self, detail: impl AsRef<str>) -> Self {
        self.message.push_str(" (");
        self.message.push_str(detail.as_ref());
        self.message.push(')');
        self
    }
}

/// When a suppressed entity becomes eligible to alert again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetMode {
    /// The cooldown has elapsed
    Cooldown,

    /// The score dropped below the threshold
    Recovery,

    /// Both of the above
    #[default]
    RecoveryAndCooldown,
}

/// How per-sensor anomaly scores and zone correlation scores feed alerts
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScoreCombination {
    /// Sensors alert on their model score, zones on their correlation score
    #[default]
    Independent,

    /// Sensors alert on the larger of their model score and their zone's score
    Max,

    /// Sensors alert on `w * anomaly + (1 - w) * correlation`
    Weighted { anomaly_weight: f64 },
}

impl ScoreCombination {
    /// Whether zones are evaluated as entities of their own
    pub fn alerts_zones(&self) -> bool {
        matches!(self, ScoreCombination::Independent)
    }

    /// Score a sensor is evaluated on
    ///
    /// Without a model score there is nothing to combine and the sensor is
    /// not evaluated. A missing zone score leaves the model score unchanged.
    pub fn sensor_score(&self, anomaly: Option<f64>, correlation: Option<f64>) -> Option<f64> {
        let anomaly = anomaly?;

        let combined = match (self, correlation) {
            (ScoreCombination::Independent, _) | (_, None) => anomaly,
            (ScoreCombination::Max, Some(zone)) => anomaly.max(zone),
            (ScoreCombination::Weighted { anomaly_weight }, Some(zone)) => {
                anomaly_weight * anomaly + (1.0 - anomaly_weight) * zone
            }
        };

        Some(combined.clamp(0.0, 1.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertPhase {
    Quiet,
    Suppressed {
        since: DateTime<Utc>,

        /// Score has been below the threshold at least once since `since`
        recovered: bool,
    },
}

#[derive(Debug)]
pub struct AlertPolicy {
    threshold: f64,
    cooldown: TimeDelta,
    reset: ResetMode,
    phases: DashMap<EntityId, AlertPhase>,
}

impl AlertPolicy {
    pub fn new(threshold: f64, cooldown: Duration, reset: ResetMode) -> Self {
        Self {
            threshold,
            cooldown: TimeDelta::from_std(cooldown).unwrap_or(TimeDelta::MAX),
            reset,
            phases: DashMap::new(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn phase(&self, entity: &EntityId) -> AlertPhase {
        self.phases
            .get(entity)
            .map(|phase| *phase)
            .unwrap_or(AlertPhase::Quiet)
    }

    /// Feed one score for an entity, returning an alert if one is due
    ///
    /// Evaluations of the same entity are serialized on its map entry;
    /// different entities can be evaluated concurrently.
    pub fn evaluate(
        &self,
        entity: &EntityId,
        score: f64,
        features: &FeatureVector,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let above = score >= self.threshold;
        let mut phase = self
            .phases
            .entry(entity.clone())
            .or_insert(AlertPhase::Quiet);

        if let AlertPhase::Suppressed { since, recovered } = *phase {
            let recovered = recovered || !above;
            let cooled = now - since >= self.cooldown;

            let reset = match self.reset {
                ResetMode::Cooldown => cooled,
                ResetMode::Recovery => recovered,
                ResetMode::RecoveryAndCooldown => recovered && cooled,
            };

            if reset {
                debug!(%entity, "alert state reset");
                *phase = AlertPhase::Quiet;
            } else {
                *phase = AlertPhase::Suppressed { since, recovered };
                trace!(%entity, score, "alert suppressed");
                return None;
            }
        }

        if !above {
            return None;
        }

        *phase = AlertPhase::Suppressed {
            since: now,
            recovered: false,
        };

        let severity = Severity::from_score(score, self.threshold);
        Some(Alert {
            id: Uuid::new_v4(),
            entity: entity.clone(),
            severity,
            score,
            features: features.clone(),
            timestamp: now,
            message: format!(
                "{severity} anomaly on {entity}: score {score:.3} exceeds threshold {:.3}",
                self.threshold
            ),
            acknowledgement: None,
        })
    }
}

/// Counts of recent alerts by severity plus the entities with critical alerts
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AnomalySummary {
    pub total: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub unacknowledged: usize,
    pub critical_entities: Vec<EntityId>,
}

impl AnomalySummary {
    pub fn from_alerts<'a>(alerts: impl IntoIterator<Item = &'a Alert>) -> Self {
        let mut summary = AnomalySummary {
            by_severity: Severity::ALL.iter().map(|s| (*s, 0)).collect(),
            ..Default::default()
        };

        for alert in alerts {
            summary.total += 1;
            *summary.by_severity.entry(alert.severity).or_default() += 1;
            if !alert.is_acknowledged() {
                summary.unacknowledged += 1;
            }
            if alert.severity == Severity::Critical
                && !summary.critical_entities.contains(&alert.entity)
            {
                summary.critical_entities.push(alert.entity.clone());
            }
        }

        summary.critical_entities.sort();
        summary
    }
}
