//! Cross-sensor consistency checks within a zone
//!
//! Each [`CorrelationRule`] states how the z-scores of two sensor kinds are
//! expected to move together. A zone scores as inconsistent as its worst
//! applicable pair.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::SensorKind;
use crate::features::{Feature, ZoneMember};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    Positive,
    Negative,
}

impl Relation {
    fn sign(self) -> f64 {
        match self {
            Relation::Positive => 1.0,
            Relation::Negative => -1.0,
        }
    }
}

/// Expected relationship between two sensor kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRule {
    pub a: SensorKind,
    pub b: SensorKind,
    pub relation: Relation,

    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl CorrelationRule {
    pub fn new(a: SensorKind, b: SensorKind, relation: Relation, weight: f64) -> Self {
        Self {
            a,
            b,
            relation,
            weight,
        }
    }

    /// Occupancy drives energy, lighting and (more loosely) HVAC; lighting drives energy
    pub fn defaults() -> Vec<CorrelationRule> {
        use SensorKind::*;

        vec![
            CorrelationRule::new(Occupancy, Energy, Relation::Positive, 1.0),
            CorrelationRule::new(Occupancy, Lighting, Relation::Positive, 1.0),
            CorrelationRule::new(Occupancy, Hvac, Relation::Positive, 0.5),
            CorrelationRule::new(Lighting, Energy, Relation::Positive, 1.0),
        ]
    }

    fn applies(&self, x: SensorKind, y: SensorKind) -> bool {
        (self.a == x && self.b == y) || (self.a == y && self.b == x)
    }
}

/// Most inconsistent pair of a zone
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationFinding {
    pub score: f64,
    pub sensor_a: String,
    pub sensor_b: String,
    pub relation: Relation,
}

#[derive(Debug, Clone)]
pub struct CorrelationAnalyzer {
    rules: Vec<CorrelationRule>,
    z_span: f64,
}

impl CorrelationAnalyzer {
    pub fn new(rules: Vec<CorrelationRule>, z_span: f64) -> Self {
        Self {
            rules,
            z_span: if z_span > 0.0 { z_span } else { 1.0 },
        }
    }

    /// Zone inconsistency score in [0, 1]; 0 when no pair applies
    pub fn analyze(&self, zone_id: &str, members: &[ZoneMember]) -> f64 {
        self.worst_pair(zone_id, members)
            .map(|finding| finding.score)
            .unwrap_or(0.0)
    }

    /// The applicable pair with the highest inconsistency, if any pair applies
    pub fn worst_pair(&self, zone_id: &str, members: &[ZoneMember]) -> Option<CorrelationFinding> {
        let mut worst: Option<CorrelationFinding> = None;

        for (i, x) in members.iter().enumerate() {
            let Some(vx) = x.warm_vector() else { continue };

            for y in &members[i + 1..] {
                let Some(vy) = y.warm_vector() else { continue };

                for rule in self.rules.iter().filter(|r| r.applies(x.kind, y.kind)) {
                    // orient so that z_a belongs to the rule's `a` kind
                    let (zx, zy) = (vx.get(Feature::ZScore), vy.get(Feature::ZScore));
                    let (za, zb, ida, idb) = if rule.a == x.kind {
                        (zx, zy, &x.sensor_id, &y.sensor_id)
                    } else {
                        (zy, zx, &y.sensor_id, &x.sensor_id)
                    };

                    let distance = (za - rule.relation.sign() * zb).abs() / self.z_span;
                    let score = rule.weight * distance.clamp(0.0, 1.0);

                    if worst.as_ref().is_none_or(|w| score > w.score) {
                        worst = Some(CorrelationFinding {
                            score,
                            sensor_a: ida.clone(),
                            sensor_b: idb.clone(),
                            relation: rule.relation,
                        });
                    }
                }
            }
        }

        if let Some(finding) = &worst {
            trace!(zone = zone_id, score = finding.score, "zone correlation scored");
        }

        worst
    }
}
