use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::Sink;
use crate::actors::messages::MonitorEvent;

/// Appends every event as one JSON object per line
pub struct JsonLinesSink {
    path: PathBuf,
    include_readings: bool,
    file: Mutex<File>,
}

impl JsonLinesSink {
    /// Open (or create) `path` for appending
    pub async fn create(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open export file {}", path.display()))?;

        debug!("exporting events to {}", path.display());

        Ok(Self {
            path,
            include_readings: true,
            file: Mutex::new(file),
        })
    }

    /// Only export alerts and warnings
    pub fn without_readings(mut self) -> Self {
        self.include_readings = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sink for JsonLinesSink {
    fn name(&self) -> &str {
        "json-lines"
    }

    async fn publish(&self, event: &MonitorEvent) -> anyhow::Result<()> {
        if !self.include_readings && matches!(event, MonitorEvent::Reading(_)) {
            return Ok(());
        }

        let mut line = serde_json::to_vec(event).context("failed to serialize event")?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .with_context(|| format!("failed to write to {}", self.path.display()))?;
        file.flush().await.context("failed to flush export file")?;

        Ok(())
    }
}
