//! Event sinks
//!
//! Sinks receive every [`MonitorEvent`] of a tick through their own
//! [`SinkWorker`] queue. A failing or slow sink is logged and loses events;
//! events are never retried.

mod json;
mod logger;
mod queue;

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::RwLock;

pub use json::JsonLinesSink;
pub use logger::LogSink;
pub use queue::SinkWorker;

use crate::actors::messages::MonitorEvent;
use crate::alerts::Alert;

#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, event: &MonitorEvent) -> anyhow::Result<()>;
}

/// Keeps the most recent events in memory
pub struct MemorySink {
    capacity: usize,
    events: RwLock<VecDeque<MonitorEvent>>,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Events oldest first
    pub async fn events(&self) -> Vec<MonitorEvent> {
        self.events.read().await.iter().cloned().collect()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.events
            .read()
            .await
            .iter()
            .filter_map(MonitorEvent::as_alert)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, event: &MonitorEvent) -> anyhow::Result<()> {
        let mut events = self.events.write().await;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        Ok(())
    }
}
