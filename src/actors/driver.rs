//! MonitorActor - owns the sensor slots and runs the tick pipeline
//!
//! ## Tick Flow
//!
//! ```text
//! Timer tick / TickNow
//!   → per sensor, concurrently: pull → window.append → extract → score → observe
//!   → per zone: extract_zone → correlation
//!   → alert policy (per sensor, per zone)
//!   → publish Reading / Warning / Alert events to broadcast + sink queues
//! ```
//!
//! Each sensor future gets `&mut` to exactly one slot, so slots never need
//! locks. A stop request is checked before every pull and again before the
//! slot is mutated; work abandoned at that point leaves no trace.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use super::messages::{
    DataQualityWarning, MonitorCommand, MonitorEvent, MonitorStatus, SensorStatus, SystemState,
    TickSummary, WarningKind,
};
use crate::Reading;
use crate::alerts::{Alert, AlertPolicy, AnomalySummary, EntityId, ScoreCombination};
use crate::config::MonitorConfig;
use crate::correlation::{CorrelationAnalyzer, CorrelationFinding};
use crate::error::{MonitorError, MonitorResult, SensorError};
use crate::features::{FeatureContext, FeatureExtractor, FeatureVector, ZoneMember};
use crate::model::{AnomalyModel, ModelSettings};
use crate::sensors::Sensor;
use crate::sinks::{Sink, SinkWorker};
use crate::window::{RollingWindow, WindowSnapshot, WindowStats};

/// Everything the driver keeps for one sensor
struct SensorSlot {
    sensor: Arc<dyn Sensor>,
    zone_id: String,
    window: RollingWindow,
    model: AnomalyModel,
    last_score: Option<f64>,
}

/// Read-only inputs shared by all slot futures of a tick
struct SlotContext<'a> {
    extractor: &'a FeatureExtractor,
    features: FeatureContext,
    pull_timeout: Duration,
    cancel: &'a AtomicBool,
}

enum SlotOutcome {
    Cancelled,
    Skipped(SensorError),
    Rejected(MonitorError),
    Accepted {
        reading: Reading,
        vector: FeatureVector,
        score: Option<f64>,
        stats: WindowStats,
    },
}

impl SlotOutcome {
    fn vector(&self) -> Option<&FeatureVector> {
        match self {
            SlotOutcome::Accepted { vector, .. } => Some(vector),
            _ => None,
        }
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            SlotOutcome::Accepted { reading, .. } => Some(reading.timestamp),
            _ => None,
        }
    }
}

struct ZoneScore {
    score: f64,
    vector: FeatureVector,
    finding: Option<CorrelationFinding>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Counters {
    ticks: u64,
    total_readings: u64,
    skipped_readings: u64,
    rejected_readings: u64,
    total_alerts: u64,
    dropped_events: u64,
}

/// Pull, score and alert for one sensor slot
#[instrument(skip_all, fields(sensor = %slot.sensor.id()))]
async fn process_slot(slot: &mut SensorSlot, ctx: &SlotContext<'_>) -> SlotOutcome {
    if ctx.cancel.load(Ordering::Acquire) {
        return SlotOutcome::Cancelled;
    }

    let reading = match timeout(ctx.pull_timeout, slot.sensor.pull()).await {
        Ok(Ok(reading)) => reading,
        Ok(Err(e)) => return SlotOutcome::Skipped(e),
        Err(_) => return SlotOutcome::Skipped(SensorError::Timeout(ctx.pull_timeout)),
    };

    // nothing has been mutated yet, a stop request can still drop the reading
    if ctx.cancel.load(Ordering::Acquire) {
        return SlotOutcome::Cancelled;
    }

    if let Err(e) = slot.window.append(reading.clone()) {
        return SlotOutcome::Rejected(e);
    }

    let snapshot = slot.window.snapshot();
    let vector = ctx.extractor.extract(&snapshot, &ctx.features);

    let score = if vector.sufficient {
        let score = match slot.model.score(&vector) {
            Ok(score) => Some(score),
            Err(MonitorError::ModelNotTrained {
                population,
                required,
            }) => {
                trace!("model not trained yet ({population}/{required})");
                None
            }
            Err(e) => {
                warn!("scoring failed: {e}");
                None
            }
        };

        if let Err(e) = slot.model.observe(&vector) {
            warn!("observation rejected: {e}");
        }

        score
    } else {
        trace!(len = snapshot.len(), "window still warming up");
        None
    };

    slot.last_score = score;

    SlotOutcome::Accepted {
        reading,
        vector,
        score,
        stats: *snapshot.stats(),
    }
}

/// Actor that drives the whole monitoring pipeline
///
/// It runs until a Shutdown command arrives, a stop is requested, or every
/// handle is dropped. Sinks are fed through [`SinkWorker`] queues, so
/// delivery never holds up a tick.
pub struct MonitorActor {
    config: Arc<MonitorConfig>,
    slots: Vec<SensorSlot>,

    /// Zone id to slot indices, in registration order
    zones: BTreeMap<String, Vec<usize>>,

    extractor: FeatureExtractor,
    features: FeatureContext,
    correlation: CorrelationAnalyzer,
    policy: AlertPolicy,
    sinks: Vec<SinkWorker>,
    event_tx: broadcast::Sender<MonitorEvent>,
    command_rx: mpsc::Receiver<MonitorCommand>,
    cancel: Arc<AtomicBool>,
    history: VecDeque<Alert>,
    counters: Counters,
    started_at: DateTime<Utc>,
}

impl MonitorActor {
    /// Build the actor; must be called inside a tokio runtime since every
    /// sink gets its delivery task here
    pub fn new(
        config: Arc<MonitorConfig>,
        sensors: Vec<Arc<dyn Sensor>>,
        sinks: Vec<Arc<dyn Sink>>,
        event_tx: broadcast::Sender<MonitorEvent>,
        command_rx: mpsc::Receiver<MonitorCommand>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        let capacity = config.window_capacity();
        let settings = ModelSettings::from_config(&config);

        let mut zones: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let slots = sensors
            .into_iter()
            .enumerate()
            .map(|(index, sensor)| {
                let zone_id = sensor.zone_id().to_string();
                zones.entry(zone_id.clone()).or_default().push(index);

                SensorSlot {
                    window: RollingWindow::new(sensor.id(), capacity, config.window.warmup_samples),
                    model: AnomalyModel::new(settings.clone()),
                    zone_id,
                    sensor,
                    last_score: None,
                }
            })
            .collect();

        let sinks = sinks
            .into_iter()
            .map(|sink| SinkWorker::spawn(sink, config.sink_queue_size, config.sink_timeout()))
            .collect();

        Self {
            extractor: FeatureExtractor::new(config.correlation.require_complete_zone),
            features: FeatureContext {
                utc_offset: config.utc_offset().unwrap_or(FeatureContext::default().utc_offset),
            },
            correlation: CorrelationAnalyzer::new(
                config.correlation.rules.clone(),
                config.correlation.z_span,
            ),
            policy: AlertPolicy::new(
                config.alert_threshold,
                config.cooldown(),
                config.alerts.reset,
            ),
            history: VecDeque::with_capacity(config.alerts.history_size),
            config,
            slots,
            zones,
            sinks,
            event_tx,
            command_rx,
            cancel,
            counters: Counters::default(),
            started_at: Utc::now(),
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self), fields(sensors = self.slots.len(), zones = self.zones.len()))]
    pub async fn run(mut self) {
        debug!("starting monitor actor");

        let period = self.config.interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.cancel.load(Ordering::Acquire) {
                        debug!("stop requested, skipping tick");
                        break;
                    }
                    self.tick().await;
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("every handle dropped, shutting down");
                        break;
                    };

                    match cmd {
                        MonitorCommand::TickNow { respond_to } => {
                            debug!("received TickNow command");
                            let summary = self.tick().await;
                            let _ = respond_to.send(summary);
                        }

                        MonitorCommand::GetStatus { respond_to } => {
                            let _ = respond_to.send(self.status());
                        }

                        MonitorCommand::RecentAlerts { limit, respond_to } => {
                            let alerts = self.history.iter().rev().take(limit).cloned().collect();
                            let _ = respond_to.send(alerts);
                        }

                        MonitorCommand::Acknowledge { alert_id, by, respond_to } => {
                            let _ = respond_to.send(self.acknowledge(alert_id, by));
                        }

                        MonitorCommand::GetSnapshot { sensor_id, respond_to } => {
                            let snapshot = self
                                .slots
                                .iter()
                                .find(|slot| slot.sensor.id() == sensor_id)
                                .map(|slot| slot.window.snapshot());
                            let _ = respond_to.send(snapshot);
                        }

                        MonitorCommand::GetAnomalySummary { respond_to } => {
                            let _ = respond_to.send(AnomalySummary::from_alerts(&self.history));
                        }

                        MonitorCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }
            }
        }

        let grace = self.config.sink_timeout();
        join_all(self.sinks.drain(..).map(|worker| worker.close(grace))).await;

        debug!(ticks = self.counters.ticks, "monitor actor stopped");
    }

    /// Run one pass of the pipeline over every sensor and zone
    #[instrument(skip(self), fields(tick = self.counters.ticks + 1))]
    async fn tick(&mut self) -> TickSummary {
        self.counters.ticks += 1;
        let mut summary = TickSummary {
            tick: self.counters.ticks,
            ..TickSummary::default()
        };

        let ctx = SlotContext {
            extractor: &self.extractor,
            features: self.features,
            pull_timeout: self.config.sensor_timeout(),
            cancel: &self.cancel,
        };
        let outcomes: Vec<SlotOutcome> =
            join_all(self.slots.iter_mut().map(|slot| process_slot(slot, &ctx))).await;

        let now = Utc::now();
        let mut events = Vec::with_capacity(outcomes.len());

        for (slot, outcome) in self.slots.iter().zip(&outcomes) {
            let sensor_id = slot.sensor.id();
            match outcome {
                SlotOutcome::Accepted { reading, score, .. } => {
                    summary.accepted += 1;
                    if score.is_some() {
                        summary.scored += 1;
                    }
                    events.push(MonitorEvent::Reading(reading.clone()));
                }
                SlotOutcome::Skipped(e) => {
                    summary.skipped += 1;
                    warn!(sensor = sensor_id, "sensor skipped: {e}");
                    events.push(MonitorEvent::Warning(DataQualityWarning {
                        sensor_id: sensor_id.to_string(),
                        kind: WarningKind::SensorUnavailable,
                        message: MonitorError::SensorUnavailable {
                            sensor_id: sensor_id.to_string(),
                            source: e.clone(),
                        }
                        .to_string(),
                        timestamp: now,
                    }));
                }
                SlotOutcome::Rejected(e) => {
                    summary.rejected += 1;
                    warn!(sensor = sensor_id, "reading dropped: {e}");
                    let kind = match e {
                        MonitorError::OutOfOrder { .. } => WarningKind::OutOfOrder,
                        _ => WarningKind::InvalidReading,
                    };
                    events.push(MonitorEvent::Warning(DataQualityWarning {
                        sensor_id: sensor_id.to_string(),
                        kind,
                        message: e.to_string(),
                        timestamp: now,
                    }));
                }
                SlotOutcome::Cancelled => summary.cancelled = true,
            }
        }

        if self.cancel.load(Ordering::Acquire) {
            summary.cancelled = true;
        }

        // alert state is left untouched once a stop was requested
        if !summary.cancelled {
            let zone_scores = self.score_zones(&outcomes, now, &mut summary);
            summary.alerts = self.evaluate_alerts(&outcomes, &zone_scores);
            events.extend(summary.alerts.iter().cloned().map(MonitorEvent::Alert));
        }

        for alert in &summary.alerts {
            if self.history.len() >= self.config.alerts.history_size {
                self.history.pop_front();
            }
            if self.config.alerts.history_size > 0 {
                self.history.push_back(alert.clone());
            }
        }

        self.counters.total_readings += summary.accepted as u64;
        self.counters.skipped_readings += summary.skipped as u64;
        self.counters.rejected_readings += summary.rejected as u64;
        self.counters.total_alerts += summary.alerts.len() as u64;

        self.publish(events);

        debug!(
            accepted = summary.accepted,
            skipped = summary.skipped,
            rejected = summary.rejected,
            alerts = summary.alerts.len(),
            "tick complete"
        );

        summary
    }

    fn score_zones(
        &self,
        outcomes: &[SlotOutcome],
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) -> HashMap<String, ZoneScore> {
        let mut scores = HashMap::new();

        for (zone_id, members) in &self.zones {
            let zone_members: Vec<ZoneMember> = members
                .iter()
                .map(|&i| ZoneMember {
                    sensor_id: self.slots[i].sensor.id().to_string(),
                    kind: self.slots[i].sensor.kind(),
                    vector: outcomes[i].vector().cloned(),
                })
                .collect();

            let vector = match self.extractor.extract_zone(zone_id, &zone_members) {
                Ok(vector) => vector,
                Err(e) => {
                    debug!(zone = %zone_id, "zone correlation skipped: {e}");
                    continue;
                }
            };

            let finding = self.correlation.worst_pair(zone_id, &zone_members);
            let timestamp = members
                .iter()
                .filter_map(|&i| outcomes[i].timestamp())
                .max()
                .unwrap_or(now);

            summary.zones_analyzed += 1;
            scores.insert(
                zone_id.clone(),
                ZoneScore {
                    score: finding.as_ref().map_or(0.0, |f| f.score),
                    vector,
                    finding,
                    timestamp,
                },
            );
        }

        scores
    }

    fn evaluate_alerts(
        &self,
        outcomes: &[SlotOutcome],
        zone_scores: &HashMap<String, ZoneScore>,
    ) -> Vec<Alert> {
        let combination: ScoreCombination = self.config.alerts.combination;
        let mut alerts = Vec::new();

        for (slot, outcome) in self.slots.iter().zip(outcomes) {
            let SlotOutcome::Accepted {
                reading,
                vector,
                score,
                stats,
            } = outcome
            else {
                continue;
            };

            let zone_score = zone_scores.get(&slot.zone_id).map(|z| z.score);
            let Some(combined) = combination.sensor_score(*score, zone_score) else {
                continue;
            };

            let entity = EntityId::Sensor(slot.sensor.id().to_string());
            if let Some(alert) = self
                .policy
                .evaluate(&entity, combined, vector, reading.timestamp)
            {
                let (low, high) = stats.expected_range();
                alerts.push(alert.with_detail(format!(
                    "{} = {:.2}, expected {low:.2}..{high:.2}",
                    reading.kind.primary_metric(),
                    stats.latest
                )));
            }
        }

        if combination.alerts_zones() {
            for (zone_id, zone) in zone_scores {
                let entity = EntityId::Zone(zone_id.clone());
                let Some(alert) =
                    self.policy
                        .evaluate(&entity, zone.score, &zone.vector, zone.timestamp)
                else {
                    continue;
                };

                let alert = match &zone.finding {
                    Some(f) => alert.with_detail(format!(
                        "{} and {} disagree",
                        f.sensor_a, f.sensor_b
                    )),
                    None => alert,
                };
                alerts.push(alert);
            }
        }

        alerts
    }

    /// Hand events to broadcast subscribers and every sink queue
    fn publish(&mut self, events: Vec<MonitorEvent>) {
        for event in events {
            for worker in &self.sinks {
                if !worker.offer(&event) {
                    self.counters.dropped_events += 1;
                }
            }

            if let Err(e) = self.event_tx.send(event) {
                trace!("no subscribers for event ({e})");
            }
        }
    }

    fn acknowledge(&mut self, alert_id: Uuid, by: String) -> Option<Alert> {
        let alert = self.history.iter_mut().find(|alert| alert.id == alert_id)?;
        if alert.acknowledge(by, Utc::now()) {
            debug!(%alert_id, "alert acknowledged");
        }
        Some(alert.clone())
    }

    fn status(&self) -> MonitorStatus {
        let state = if self.cancel.load(Ordering::Acquire) {
            SystemState::Stopping
        } else {
            SystemState::Running
        };

        MonitorStatus {
            state,
            started_at: Some(self.started_at),
            ticks: self.counters.ticks,
            total_readings: self.counters.total_readings,
            skipped_readings: self.counters.skipped_readings,
            rejected_readings: self.counters.rejected_readings,
            total_alerts: self.counters.total_alerts,
            dropped_events: self.counters.dropped_events,
            zones: self.zones.len(),
            sensors: self
                .slots
                .iter()
                .map(|slot| SensorStatus {
                    sensor_id: slot.sensor.id().to_string(),
                    zone_id: slot.zone_id.clone(),
                    kind: slot.sensor.kind(),
                    window_len: slot.window.len(),
                    warm: slot.window.is_warm(),
                    model_population: slot.model.population(),
                    model_trained: slot.model.is_trained(),
                    last_score: slot.last_score,
                    stats: slot.window.stats(),
                })
                .collect(),
        }
    }
}

/// Handle for controlling a running MonitorActor
///
/// Cloneable; every method fails with `NotRunning` once the actor has exited.
#[derive(Clone, Debug)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
}

impl MonitorHandle {
    /// Spawn the actor as a tokio task
    pub fn spawn(
        config: Arc<MonitorConfig>,
        sensors: Vec<Arc<dyn Sensor>>,
        sinks: Vec<Arc<dyn Sink>>,
        event_tx: broadcast::Sender<MonitorEvent>,
        cancel: Arc<AtomicBool>,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = MonitorActor::new(config, sensors, sinks, event_tx, cmd_rx, cancel);

        let task = tokio::spawn(actor.run());

        (Self { sender: cmd_tx }, task)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> MonitorCommand,
    ) -> MonitorResult<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(command(tx))
            .await
            .map_err(|_| MonitorError::NotRunning)?;
        rx.await.map_err(|_| MonitorError::NotRunning)
    }

    /// Run one tick immediately and wait for it to finish
    pub async fn tick_now(&self) -> MonitorResult<TickSummary> {
        self.request(|respond_to| MonitorCommand::TickNow { respond_to })
            .await
    }

    pub async fn status(&self) -> MonitorResult<MonitorStatus> {
        self.request(|respond_to| MonitorCommand::GetStatus { respond_to })
            .await
    }

    /// Up to `limit` alerts, newest first
    pub async fn recent_alerts(&self, limit: usize) -> MonitorResult<Vec<Alert>> {
        self.request(|respond_to| MonitorCommand::RecentAlerts { limit, respond_to })
            .await
    }

    pub async fn acknowledge(
        &self,
        alert_id: Uuid,
        by: impl Into<String>,
    ) -> MonitorResult<Option<Alert>> {
        let by = by.into();
        self.request(|respond_to| MonitorCommand::Acknowledge {
            alert_id,
            by,
            respond_to,
        })
        .await
    }

    pub async fn snapshot(
        &self,
        sensor_id: impl Into<String>,
    ) -> MonitorResult<Option<WindowSnapshot>> {
        let sensor_id = sensor_id.into();
        self.request(|respond_to| MonitorCommand::GetSnapshot {
            sensor_id,
            respond_to,
        })
        .await
    }

    pub async fn anomaly_summary(&self) -> MonitorResult<AnomalySummary> {
        self.request(|respond_to| MonitorCommand::GetAnomalySummary { respond_to })
            .await
    }

    /// Ask the actor to exit after the current tick
    pub async fn shutdown(&self) -> MonitorResult<()> {
        self.sender
            .send(MonitorCommand::Shutdown)
            .await
            .map_err(|_| MonitorError::NotRunning)
    }
}
