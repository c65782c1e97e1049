//! Bounded per-sensor history of readings
//!
//! A [`RollingWindow`] keeps the last `capacity` readings of one sensor in
//! insertion order and maintains running mean/variance of the primary metric
//! with Welford's method, including the inverse update on eviction, so an
//! append never rescans the window. Min and max come from monotonic deques.
//!
//! Readers never touch the live window: [`RollingWindow::snapshot`] hands out
//! an immutable list of shared readings that stays valid while the window
//! keeps evicting.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Reading;
use crate::error::{MonitorError, MonitorResult};

/// Running mean and variance with support for removing samples
#[derive(Debug, Clone, Copy, Default)]
struct Welford {
    count: usize,
    mean: f64,
    m2: f64,
}

impl Welford {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn pop(&mut self, value: f64) {
        if self.count <= 1 {
            *self = Welford::default();
            return;
        }

        let old_mean = self.mean;
        self.count -= 1;
        self.mean = (old_mean * (self.count + 1) as f64 - value) / self.count as f64;
        self.m2 -= (value - old_mean) * (value - self.mean);

        // rounding can push m2 slightly below zero after many evictions
        if self.m2 < 0.0 {
            self.m2 = 0.0;
        }
    }

    fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }
}

/// Sliding minimum and maximum, keyed by the position of each reading
#[derive(Debug, Clone, Default)]
struct Extremes {
    min: VecDeque<(u64, f64)>,
    max: VecDeque<(u64, f64)>,
}

impl Extremes {
    fn push(&mut self, position: u64, value: f64) {
        while self.min.back().is_some_and(|&(_, v)| v >= value) {
            self.min.pop_back();
        }
        self.min.push_back((position, value));

        while self.max.back().is_some_and(|&(_, v)| v <= value) {
            self.max.pop_back();
        }
        self.max.push_back((position, value));
    }

    fn evict(&mut self, position: u64) {
        if self.min.front().is_some_and(|&(p, _)| p == position) {
            self.min.pop_front();
        }
        if self.max.front().is_some_and(|&(p, _)| p == position) {
            self.max.pop_front();
        }
    }

    fn min(&self) -> f64 {
        self.min.front().map_or(0.0, |&(_, v)| v)
    }

    fn max(&self) -> f64 {
        self.max.front().map_or(0.0, |&(_, v)| v)
    }
}

/// Aggregate statistics over the primary metric of a window
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct WindowStats {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,

    /// Change of the primary metric per second between the two latest readings
    pub rate_of_change: f64,

    pub latest: f64,
}

impl WindowStats {
    /// `mean ± 2σ`, the band readings are expected to stay in
    pub fn expected_range(&self) -> (f64, f64) {
        (self.mean - 2.0 * self.std_dev, self.mean + 2.0 * self.std_dev)
    }
}

/// Immutable, ordered copy of a window at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSnapshot {
    sensor_id: String,
    readings: Arc<[Arc<Reading>]>,
    stats: WindowStats,
    warm: bool,
}

impl WindowSnapshot {
    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    /// Readings oldest first
    pub fn readings(&self) -> &[Arc<Reading>] {
        &self.readings
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.readings.last().map(|r| &**r)
    }

    pub fn stats(&self) -> &WindowStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Whether the window held enough readings for meaningful statistics
    pub fn is_warm(&self) -> bool {
        self.warm
    }
}

/// Fixed-capacity FIFO of one sensor's readings
#[derive(Debug, Clone)]
pub struct RollingWindow {
    sensor_id: String,
    capacity: usize,
    warmup: usize,
    readings: VecDeque<Arc<Reading>>,
    running: Welford,
    extremes: Extremes,

    /// Readings evicted so far; the position of the front reading
    evicted: u64,
}

impl RollingWindow {
    /// Create an empty window
    ///
    /// `capacity` is raised to at least 1; `warmup` is the number of readings
    /// needed before [`is_warm`](Self::is_warm) reports true.
    pub fn new(sensor_id: impl Into<String>, capacity: usize, warmup: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sensor_id: sensor_id.into(),
            capacity,
            warmup: warmup.max(1),
            readings: VecDeque::with_capacity(capacity),
            running: Welford::default(),
            extremes: Extremes::default(),
            evicted: 0,
        }
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn is_warm(&self) -> bool {
        self.readings.len() >= self.warmup
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.readings.back().map(|r| r.timestamp)
    }

    /// Append a reading, evicting the oldest one when full
    ///
    /// Rejected readings leave the window untouched: readings for another
    /// sensor, invalid readings, and readings whose timestamp does not advance
    /// strictly past the last appended one.
    pub fn append(&mut self, reading: Reading) -> MonitorResult<()> {
        if reading.sensor_id != self.sensor_id {
            return Err(MonitorError::InvalidReading {
                sensor_id: self.sensor_id.clone(),
                reason: format!("reading belongs to sensor {}", reading.sensor_id),
            });
        }

        if let Some(reason) = reading.quality_issue() {
            return Err(MonitorError::InvalidReading {
                sensor_id: self.sensor_id.clone(),
                reason,
            });
        }

        if let Some(last) = self.last_timestamp()
            && reading.timestamp <= last
        {
            return Err(MonitorError::OutOfOrder {
                sensor_id: self.sensor_id.clone(),
                timestamp: reading.timestamp,
                last,
            });
        }

        let Some(value) = reading.primary_value() else {
            return Err(MonitorError::InvalidReading {
                sensor_id: self.sensor_id.clone(),
                reason: "missing primary metric".to_string(),
            });
        };

        if self.readings.len() == self.capacity
            && let Some(evicted) = self.readings.pop_front()
        {
            if let Some(old) = evicted.primary_value() {
                self.running.pop(old);
            }
            self.extremes.evict(self.evicted);
            self.evicted += 1;
        }

        let position = self.evicted + self.readings.len() as u64;
        self.running.push(value);
        self.extremes.push(position, value);
        self.readings.push_back(Arc::new(reading));

        Ok(())
    }

    /// Current aggregate statistics
    pub fn stats(&self) -> WindowStats {
        if self.readings.is_empty() {
            return WindowStats::default();
        }

        let latest = self.readings.back().and_then(|r| r.primary_value());
        let rate_of_change = match (self.readings.len(), latest) {
            (n, Some(latest)) if n >= 2 => {
                let previous = &self.readings[n - 2];
                let current = &self.readings[n - 1];
                let seconds = (current.timestamp - previous.timestamp).num_milliseconds() as f64
                    / 1000.0;
                match previous.primary_value() {
                    Some(prev) if seconds > 0.0 => (latest - prev) / seconds,
                    _ => 0.0,
                }
            }
            _ => 0.0,
        };

        WindowStats {
            count: self.readings.len(),
            mean: self.running.mean,
            std_dev: self.running.variance().sqrt(),
            min: self.extremes.min(),
            max: self.extremes.max(),
            rate_of_change,
            latest: latest.unwrap_or_default(),
        }
    }

    /// Immutable view for feature extraction; readings are shared, not copied
    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            sensor_id: self.sensor_id.clone(),
            readings: self.readings.iter().cloned().collect(),
            stats: self.stats(),
            warm: self.is_warm(),
        }
    }
}
