use std::collections::VecDeque;
use std::ops::RangeInclusive;

use serde::Serialize;
use uuid::Uuid;

use gaitwatch_protocol::Sample;

/// Point-in-time counters for one device buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferMetrics {
    pub buffer_id: Uuid,
    pub device_id: String,
    pub len: usize,
    pub capacity: usize,
    pub utilization_percent: f64,
    pub memory_bytes: usize,
    /// Samples accepted since creation or the last clear.
    pub total_pushed: u64,
    /// Samples dropped because the per-device cap was reached.
    pub dropped: u64,
    /// Samples evicted to bring the registry back under its memory budget.
    pub evicted: u64,
    /// Samples dropped by the retention window.
    pub expired: u64,
    pub oldest_timestamp: Option<u64>,
    pub newest_timestamp: Option<u64>,
}

/// Fixed-capacity FIFO history of one device's samples.
///
/// Backed by a `VecDeque`. When the buffer is full, the oldest sample is
/// dropped on each push. Iteration order is arrival order, oldest → newest.
/// Samples are never modified once stored; they are only ever removed from
/// the front.
#[derive(Debug, Clone)]
pub struct TelemetryBuffer {
    id: Uuid,
    device_id: String,
    samples: VecDeque<Sample>,
    capacity: usize,
    bytes: usize,
    total_pushed: u64,
    dropped: u64,
    evicted: u64,
    expired: u64,
    last_activity: u64,
}

impl TelemetryBuffer {
    /// Create an empty buffer for `device_id` holding at most `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(device_id: impl Into<String>, capacity: usize) -> Self {
        assert!(capacity > 0, "TelemetryBuffer capacity must be > 0");
        Self {
            id: Uuid::new_v4(),
            device_id: device_id.into(),
            samples: VecDeque::new(),
            capacity,
            bytes: 0,
            total_pushed: 0,
            dropped: 0,
            evicted: 0,
            expired: 0,
            last_activity: 0,
        }
    }

    /// Append a sample, dropping the oldest entries while over capacity.
    ///
    /// Returns how many samples were dropped. Never fails.
    pub fn push(&mut self, sample: Sample) -> usize {
        self.bytes += sample.estimated_size();
        self.samples.push_back(sample);
        self.total_pushed += 1;

        let mut dropped = 0;
        while self.samples.len() > self.capacity {
            self.pop_oldest();
            dropped += 1;
        }
        self.dropped += dropped as u64;
        dropped
    }

    /// Evict oldest samples until at least `target` bytes are freed or the
    /// buffer is empty. Returns the bytes actually freed.
    pub fn evict_bytes(&mut self, target: usize) -> usize {
        let mut freed = 0;
        while freed < target {
            match self.pop_oldest() {
                Some(size) => {
                    freed += size;
                    self.evicted += 1;
                }
                None => break,
            }
        }
        freed
    }

    /// Drop samples whose device timestamp is more than `retention_ms`
    /// behind the newest stored sample. Returns how many were dropped.
    pub fn expire_older_than(&mut self, retention_ms: u64) -> usize {
        let Some(newest) = self.samples.back().map(|s| s.timestamp) else {
            return 0;
        };
        let cutoff = newest.saturating_sub(retention_ms);
        let mut expired = 0;
        while self.samples.front().is_some_and(|s| s.timestamp < cutoff) {
            self.pop_oldest();
            expired += 1;
        }
        self.expired += expired as u64;
        expired
    }

    fn pop_oldest(&mut self) -> Option<usize> {
        let sample = self.samples.pop_front()?;
        let size = sample.estimated_size();
        self.bytes = self.bytes.saturating_sub(size);
        Some(size)
    }

    /// Copy of the current contents, optionally restricted to samples whose
    /// device timestamp lies in `window` (inclusive).
    pub fn snapshot(&self, window: Option<RangeInclusive<u64>>) -> Vec<Sample> {
        match window {
            Some(range) => self
                .samples
                .iter()
                .filter(|s| range.contains(&s.timestamp))
                .cloned()
                .collect(),
            None => self.samples.iter().cloned().collect(),
        }
    }

    /// The newest `count` samples, oldest first.
    pub fn latest(&self, count: usize) -> Vec<Sample> {
        let skip = self.samples.len().saturating_sub(count);
        self.samples.iter().skip(skip).cloned().collect()
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// The most recently pushed sample, if any.
    pub fn last(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// Change the per-device cap. Shrinking drops the oldest samples;
    /// returns how many were dropped.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn set_capacity(&mut self, capacity: usize) -> usize {
        assert!(capacity > 0, "TelemetryBuffer capacity must be > 0");
        self.capacity = capacity;
        let mut dropped = 0;
        while self.samples.len() > self.capacity {
            self.pop_oldest();
            dropped += 1;
        }
        self.dropped += dropped as u64;
        dropped
    }

    /// Empty the buffer and reset its memory accounting and counters.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.bytes = 0;
        self.total_pushed = 0;
        self.dropped = 0;
        self.evicted = 0;
        self.expired = 0;
    }

    /// Stable identity of this buffer instance.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// Estimated bytes held by the stored samples.
    pub fn memory_bytes(&self) -> usize {
        self.bytes
    }

    pub fn utilization(&self) -> f64 {
        self.samples.len() as f64 / self.capacity as f64
    }

    /// Registry activity tick of the last push (higher is more recent).
    pub fn last_activity(&self) -> u64 {
        self.last_activity
    }

    pub(crate) fn touch(&mut self, tick: u64) {
        self.last_activity = tick;
    }

    pub fn metrics(&self) -> BufferMetrics {
        BufferMetrics {
            buffer_id: self.id,
            device_id: self.device_id.clone(),
            len: self.samples.len(),
            capacity: self.capacity,
            utilization_percent: self.utilization() * 100.0,
            memory_bytes: self.bytes,
            total_pushed: self.total_pushed,
            dropped: self.dropped,
            evicted: self.evicted,
            expired: self.expired,
            oldest_timestamp: self.samples.front().map(|s| s.timestamp),
            newest_timestamp: self.samples.back().map(|s| s.timestamp),
        }
    }
}
