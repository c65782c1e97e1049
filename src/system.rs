//! The monitoring system: registration, lifecycle and the actor handle
//!
//! ```text
//! stopped ──start()──▶ running ──stop()──▶ stopping ──(tick drained)──▶ stopped
//! ```
//!
//! Sensors and sinks can only be registered while stopped. Configuration is
//! validated by `start()`; a system that fails to start stays stopped.
//! Dropping a running system cancels its tick driver.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

pub use crate::actors::driver::MonitorHandle;
pub use crate::actors::messages::SystemState;

use crate::actors::messages::MonitorEvent;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::sensors::Sensor;
use crate::sinks::Sink;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

struct Running {
    handle: MonitorHandle,
    task: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
    started_at: DateTime<Utc>,
}

pub struct MonitoringSystem {
    config: Arc<MonitorConfig>,
    sensors: Vec<Arc<dyn Sensor>>,
    sinks: Vec<Arc<dyn Sink>>,
    event_tx: broadcast::Sender<MonitorEvent>,
    state: SystemState,
    running: Option<Running>,
}

impl MonitoringSystem {
    pub fn new(config: MonitorConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            config: Arc::new(config),
            sensors: Vec::new(),
            sinks: Vec::new(),
            event_tx,
            state: SystemState::Stopped,
            running: None,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.running.as_ref().map(|running| running.started_at)
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    /// Add a sensor; its zone is taken from [`Sensor::zone_id`]
    pub fn register_sensor(&mut self, sensor: Arc<dyn Sensor>) -> MonitorResult<()> {
        if self.state != SystemState::Stopped {
            return Err(MonitorError::AlreadyRunning);
        }

        if self.sensors.iter().any(|s| s.id() == sensor.id()) {
            return Err(MonitorError::InvalidConfig(format!(
                "sensor {} is already registered",
                sensor.id()
            )));
        }

        let zone_size = self
            .sensors
            .iter()
            .filter(|s| s.zone_id() == sensor.zone_id())
            .count();
        if zone_size >= self.config.max_sensors_per_zone {
            return Err(MonitorError::InvalidConfig(format!(
                "zone {} already has {} sensors",
                sensor.zone_id(),
                zone_size
            )));
        }

        debug!(
            sensor = sensor.id(),
            zone = sensor.zone_id(),
            kind = %sensor.kind(),
            "sensor registered"
        );
        self.sensors.push(sensor);
        Ok(())
    }

    pub fn register_sink(&mut self, sink: Arc<dyn Sink>) -> MonitorResult<()> {
        if self.state != SystemState::Stopped {
            return Err(MonitorError::AlreadyRunning);
        }

        debug!(sink = sink.name(), "sink registered");
        self.sinks.push(sink);
        Ok(())
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.event_tx.subscribe()
    }

    /// Handle to the running actor, if any
    pub fn handle(&self) -> Option<MonitorHandle> {
        self.running.as_ref().map(|running| running.handle.clone())
    }

    /// Number of sensors per zone
    pub fn zones(&self) -> HashMap<String, usize> {
        let mut zones = HashMap::new();
        for sensor in &self.sensors {
            *zones.entry(sensor.zone_id().to_string()).or_insert(0) += 1;
        }
        zones
    }

    /// Validate the configuration and spawn the tick driver
    #[instrument(skip(self), fields(sensors = self.sensors.len(), sinks = self.sinks.len()))]
    pub fn start(&mut self) -> MonitorResult<MonitorHandle> {
        if self.state != SystemState::Stopped {
            return Err(MonitorError::AlreadyRunning);
        }

        self.config.validate()?;

        let cancel = Arc::new(AtomicBool::new(false));
        let (handle, task) = MonitorHandle::spawn(
            self.config.clone(),
            self.sensors.clone(),
            self.sinks.clone(),
            self.event_tx.clone(),
            cancel.clone(),
        );

        self.running = Some(Running {
            handle: handle.clone(),
            task,
            cancel,
            started_at: Utc::now(),
        });
        self.state = SystemState::Running;

        info!(
            interval = ?self.config.interval(),
            "monitoring started"
        );
        Ok(handle)
    }

    /// Stop gracefully: the in-flight tick drains, no further tick starts
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> MonitorResult<()> {
        let Some(running) = self.running.take() else {
            return Err(MonitorError::NotRunning);
        };

        self.state = SystemState::Stopping;
        running.cancel.store(true, Ordering::Release);

        // the actor may already be gone, in which case there is nothing to tell it
        let _ = running.handle.shutdown().await;

        if let Err(e) = running.task.await {
            error!("monitor task ended abnormally: {e}");
        }

        self.state = SystemState::Stopped;
        info!("monitoring stopped");
        Ok(())
    }
}

impl Drop for MonitoringSystem {
    fn drop(&mut self) {
        // handles cloned by callers keep the actor alive; the flag ends its ticks
        if let Some(running) = &self.running {
            debug!("dropped while running, cancelling the monitor task");
            running.cancel.store(true, Ordering::Release);
        }
    }
}
