use async_trait::async_trait;
use tracing::{info, trace, warn};

use super::Sink;
use crate::actors::messages::MonitorEvent;

/// Writes alerts and warnings to the tracing log
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn publish(&self, event: &MonitorEvent) -> anyhow::Result<()> {
        match event {
            MonitorEvent::Alert(alert) => {
                info!(
                    alert_id = %alert.id,
                    "ALERT [{}] {}",
                    alert.severity,
                    alert.message
                );
            }
            MonitorEvent::Warning(warning) => {
                warn!(sensor = %warning.sensor_id, kind = ?warning.kind, "{}", warning.message);
            }
            MonitorEvent::Reading(reading) => {
                trace!(sensor = %reading.sensor_id, value = ?reading.primary_value(), "reading");
            }
        }

        Ok(())
    }
}
