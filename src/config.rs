use std::collections::HashSet;
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::SensorKind;
use crate::alerts::{ResetMode, ScoreCombination};
use crate::correlation::CorrelationRule;
use crate::error::{MonitorError, MonitorResult};

/// Top-level configuration of a monitoring system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Tick period of the driver
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_retention_days")]
    pub data_retention_days: u32,

    #[serde(default = "default_max_sensors_per_zone")]
    pub max_sensors_per_zone: usize,

    /// Expected fraction of anomalous observations
    #[serde(default = "default_contamination")]
    pub contamination: f64,

    /// Observations required before the model is fit
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,

    #[serde(default)]
    pub window: WindowConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub alerts: AlertConfig,

    #[serde(default)]
    pub correlation: CorrelationConfig,

    #[serde(default = "default_timeout_ms")]
    pub sensor_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub sink_timeout_ms: u64,

    /// Events buffered per sink before new ones are dropped
    #[serde(default = "default_sink_queue_size")]
    pub sink_queue_size: usize,

    /// Building-local offset from UTC, used for time-of-day features
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// Simulated building layout, only used by the `sbems-monitor` binary
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            data_retention_days: default_retention_days(),
            max_sensors_per_zone: default_max_sensors_per_zone(),
            contamination: default_contamination(),
            min_samples: default_min_samples(),
            alert_threshold: default_alert_threshold(),
            window: WindowConfig::default(),
            model: ModelConfig::default(),
            alerts: AlertConfig::default(),
            correlation: CorrelationConfig::default(),
            sensor_timeout_ms: default_timeout_ms(),
            sink_timeout_ms: default_timeout_ms(),
            sink_queue_size: default_sink_queue_size(),
            utc_offset_minutes: 0,
            zones: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Explicit capacity, overrides the retention-derived one
    pub capacity: Option<usize>,

    #[serde(default = "default_min_window")]
    pub min_capacity: usize,

    #[serde(default = "default_max_window")]
    pub max_capacity: usize,

    #[serde(default = "default_warmup_samples")]
    pub warmup_samples: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            min_capacity: default_min_window(),
            max_capacity: default_max_window(),
            warmup_samples: default_warmup_samples(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_n_trees")]
    pub n_trees: usize,

    #[serde(default = "default_max_population")]
    pub max_population: usize,

    #[serde(default = "default_retrain_every")]
    pub retrain_every: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_trees: default_n_trees(),
            max_population: default_max_population(),
            retrain_every: default_retrain_every(),
            seed: default_seed(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    #[serde(default)]
    pub reset: ResetMode,

    #[serde(default)]
    pub combination: ScoreCombination,

    /// Number of alerts kept for `recent_alerts` and the anomaly summary
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            reset: ResetMode::default(),
            combination: ScoreCombination::default(),
            history_size: default_history_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    #[serde(default = "CorrelationRule::defaults")]
    pub rules: Vec<CorrelationRule>,

    /// Z-score distance at which a pair counts as fully inconsistent
    #[serde(default = "default_z_span")]
    pub z_span: f64,

    #[serde(default = "default_true")]
    pub require_complete_zone: bool,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            rules: CorrelationRule::defaults(),
            z_span: default_z_span(),
            require_complete_zone: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub id: String,
    pub name: Option<String>,

    /// Nominal capacity used to scale simulated occupancy
    #[serde(default = "default_zone_capacity")]
    pub capacity: u32,

    pub sensors: Vec<SensorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    pub id: String,
    pub kind: SensorKind,

    #[serde(default)]
    pub failure_probability: f64,

    #[serde(default)]
    pub spike_probability: f64,
}

fn default_interval_ms() -> u64 {
    5_000
}

fn default_retention_days() -> u32 {
    1
}

fn default_max_sensors_per_zone() -> usize {
    16
}

fn default_contamination() -> f64 {
    0.05
}

fn default_min_samples() -> usize {
    20
}

fn default_alert_threshold() -> f64 {
    0.8
}

fn default_timeout_ms() -> u64 {
    2_000
}

fn default_sink_queue_size() -> usize {
    256
}

fn default_min_window() -> usize {
    32
}

fn default_max_window() -> usize {
    4_096
}

fn default_warmup_samples() -> usize {
    10
}

fn default_n_trees() -> usize {
    100
}

fn default_max_population() -> usize {
    1_000
}

fn default_retrain_every() -> usize {
    50
}

fn default_seed() -> u64 {
    42
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_history_size() -> usize {
    500
}

fn default_z_span() -> f64 {
    6.0
}

fn default_true() -> bool {
    true
}

fn default_zone_capacity() -> u32 {
    20
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.alerts.cooldown_secs)
    }

    pub fn utc_offset(&self) -> MonitorResult<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                MonitorError::InvalidConfig(format!(
                    "utc_offset_minutes out of range: {}",
                    self.utc_offset_minutes
                ))
            })
    }

    /// Number of readings each sensor window keeps
    pub fn window_capacity(&self) -> usize {
        if let Some(capacity) = self.window.capacity {
            return capacity.max(1);
        }

        let retention_ms = u64::from(self.data_retention_days) * 86_400_000;
        let derived = retention_ms / self.interval_ms.max(1);
        let derived = usize::try_from(derived).unwrap_or(usize::MAX);

        let min = self.window.min_capacity.max(1);
        let max = self.window.max_capacity.max(min);
        derived.clamp(min, max)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> MonitorResult<()> {
        let invalid = |msg: String| Err(MonitorError::InvalidConfig(msg));

        self.utc_offset()?;

        if self.interval_ms == 0 {
            return invalid("interval_ms must be greater than zero".into());
        }
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return invalid(format!(
                "contamination must be in (0, 0.5], got {}",
                self.contamination
            ));
        }
        if !(0.0..=1.0).contains(&self.alert_threshold) {
            return invalid(format!(
                "alert_threshold must be in [0, 1], got {}",
                self.alert_threshold
            ));
        }
        if self.min_samples < 2 {
            return invalid(format!(
                "min_samples must be at least 2, got {}",
                self.min_samples
            ));
        }
        if self.max_sensors_per_zone == 0 {
            return invalid("max_sensors_per_zone must be greater than zero".into());
        }
        if self.sink_queue_size == 0 {
            return invalid("sink_queue_size must be greater than zero".into());
        }
        if self.model.n_trees == 0 {
            return invalid("model.n_trees must be greater than zero".into());
        }
        if self.model.max_population < self.min_samples {
            return invalid(format!(
                "model.max_population ({}) is smaller than min_samples ({})",
                self.model.max_population, self.min_samples
            ));
        }
        if self.correlation.z_span <= 0.0 {
            return invalid("correlation.z_span must be positive".into());
        }
        if let Some(rule) = self
            .correlation
            .rules
            .iter()
            .find(|rule| !(0.0..=1.0).contains(&rule.weight))
        {
            return invalid(format!(
                "correlation weight for {}/{} must be in [0, 1], got {}",
                rule.a, rule.b, rule.weight
            ));
        }
        if let ScoreCombination::Weighted { anomaly_weight } = self.alerts.combination
            && !(0.0..=1.0).contains(&anomaly_weight)
        {
            return invalid(format!(
                "alerts.combination.anomaly_weight must be in [0, 1], got {anomaly_weight}"
            ));
        }

        let mut seen = HashSet::new();
        for zone in &self.zones {
            if zone.sensors.len() > self.max_sensors_per_zone {
                return invalid(format!(
                    "zone {} has {} sensors, maximum is {}",
                    zone.id,
                    zone.sensors.len(),
                    self.max_sensors_per_zone
                ));
            }
            for sensor in &zone.sensors {
                if !seen.insert(sensor.id.as_str()) {
                    return invalid(format!("duplicate sensor id {}", sensor.id));
                }
            }
        }

        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<MonitorConfig> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
