//! Per-sink delivery tasks
//!
//! Every registered sink gets its own bounded queue and a task draining it,
//! so the tick driver only ever does a non-blocking `try_send`. A slow sink
//! fills its own queue and loses events; it never delays a tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::Sink;
use crate::actors::messages::MonitorEvent;

pub struct SinkWorker {
    name: String,
    sender: mpsc::Sender<MonitorEvent>,
    task: JoinHandle<()>,
}

impl SinkWorker {
    /// Spawn the delivery task; each publish is cut off after `publish_timeout`
    pub fn spawn(sink: Arc<dyn Sink>, queue_size: usize, publish_timeout: Duration) -> Self {
        let (sender, mut receiver) = mpsc::channel::<MonitorEvent>(queue_size.max(1));
        let name = sink.name().to_string();

        let task = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                match timeout(publish_timeout, sink.publish(&event)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(sink = sink.name(), "sink failed: {e:#}"),
                    Err(_) => warn!(
                        sink = sink.name(),
                        "sink timed out after {publish_timeout:?}"
                    ),
                }
            }
            trace!(sink = sink.name(), "sink queue closed");
        });

        Self { name, sender, task }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue an event without waiting; false if it had to be dropped
    pub fn offer(&self, event: &MonitorEvent) -> bool {
        match self.sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(sink = %self.name, "sink queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(sink = %self.name, "sink worker is gone, dropping event");
                false
            }
        }
    }

    /// Let the queue drain for at most `grace`, then abandon what is left
    pub async fn close(self, grace: Duration) {
        let SinkWorker {
            name,
            sender,
            mut task,
        } = self;
        drop(sender);

        if timeout(grace, &mut task).await.is_err() {
            debug!(sink = %name, "sink still busy after {grace:?}, aborting delivery");
            task.abort();
        }
    }
}
