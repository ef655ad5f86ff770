use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use gaitwatch_protocol::Sample;
use gaitwatch_protocol::constants::{
    DEFAULT_DEVICE_CAPACITY, DEFAULT_MAX_DEVICES, DEFAULT_MAX_MEMORY_BYTES, DEFAULT_RETENTION,
};

use crate::buffer::{BufferMetrics, TelemetryBuffer};
use crate::error::TelemetryError;

/// Limits applied by the [`BufferRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    /// Samples kept per device.
    pub per_device_capacity: usize,
    /// Estimated bytes allowed across all buffers.
    pub max_memory_bytes: usize,
    /// Devices that may hold a buffer at the same time.
    pub max_devices: usize,
    /// Device-time span kept behind each buffer's newest sample. `None`
    /// keeps samples until the cap or the memory budget removes them.
    pub retention: Option<Duration>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            per_device_capacity: DEFAULT_DEVICE_CAPACITY,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            max_devices: DEFAULT_MAX_DEVICES,
            retention: Some(DEFAULT_RETENTION),
        }
    }
}

/// What happened to a pushed sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    /// The push created the device's buffer.
    pub registered: bool,
    /// Samples dropped from this device by the per-device cap.
    pub dropped: usize,
    /// Samples evicted registry-wide to satisfy the memory budget.
    pub evicted: usize,
}

/// Aggregate usage across every registered buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryStats {
    pub device_count: usize,
    pub total_samples: usize,
    pub total_memory_bytes: usize,
    pub max_memory_bytes: usize,
    pub average_utilization: f64,
    pub highest_utilization_device: Option<String>,
    pub total_dropped: u64,
    pub total_evicted: u64,
    pub total_expired: u64,
}

/// Owns one [`TelemetryBuffer`] per device and enforces the global memory
/// budget.
///
/// When the aggregate estimate exceeds the budget, samples are evicted
/// oldest-first from the least recently active device's buffer, then the
/// next least recent, until the registry is back under budget.
#[derive(Debug, Clone)]
pub struct BufferRegistry {
    buffers: HashMap<String, TelemetryBuffer>,
    config: BufferConfig,
    tick: u64,
}

impl BufferRegistry {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            buffers: HashMap::new(),
            config,
            tick: 0,
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Create an empty buffer for `device_id` unless one already exists.
    ///
    /// Idempotent: registering a known device returns its existing buffer
    /// untouched. Fails only when a new device would exceed `max_devices`.
    pub fn register_device(
        &mut self,
        device_id: &str,
    ) -> Result<&TelemetryBuffer, TelemetryError> {
        let at_limit = self.buffers.len() >= self.config.max_devices;
        if at_limit && !self.buffers.contains_key(device_id) {
            return Err(TelemetryError::CapacityExceeded {
                max_devices: self.config.max_devices,
            });
        }

        let capacity = self.config.per_device_capacity;
        let buffer = self.buffers.entry(device_id.to_owned()).or_insert_with(|| {
            info!(device = %device_id, capacity, "buffer registered");
            TelemetryBuffer::new(device_id, capacity)
        });
        Ok(buffer)
    }

    /// Dispose of a device's buffer. Returns `true` if it existed.
    pub fn unregister_device(&mut self, device_id: &str) -> bool {
        let removed = self.buffers.remove(device_id);
        if let Some(buffer) = &removed {
            info!(
                device = %device_id,
                released_bytes = buffer.memory_bytes(),
                "buffer unregistered"
            );
        }
        removed.is_some()
    }

    /// Route a sample to its device's buffer, registering the device if it
    /// has not been seen before, then enforce the memory budget.
    pub fn push(&mut self, sample: Sample) -> Result<PushReport, TelemetryError> {
        let registered = !self.buffers.contains_key(&sample.device_id);
        if registered {
            self.register_device(&sample.device_id)?;
        }

        self.tick += 1;
        let tick = self.tick;
        let buffer = self
            .buffers
            .get_mut(&sample.device_id)
            .ok_or_else(|| TelemetryError::UnknownDevice(sample.device_id.clone()))?;

        buffer.touch(tick);
        let dropped = buffer.push(sample);
        if dropped > 0 {
            debug!(device = %buffer.device_id(), dropped, "device buffer full, dropped oldest");
        }

        let evicted = self.enforce_memory_budget();
        Ok(PushReport {
            registered,
            dropped,
            evicted,
        })
    }

    /// Sum of every buffer's estimated byte usage.
    pub fn aggregate_memory_estimate(&self) -> usize {
        self.buffers.values().map(TelemetryBuffer::memory_bytes).sum()
    }

    /// Evict until the aggregate estimate is within budget, least recently
    /// active device first. Returns the number of samples evicted.
    pub fn enforce_memory_budget(&mut self) -> usize {
        let budget = self.config.max_memory_bytes;
        let mut total = self.aggregate_memory_estimate();
        if total <= budget {
            return 0;
        }

        let mut order: Vec<(u64, String)> = self
            .buffers
            .iter()
            .filter(|(_, b)| !b.is_empty())
            .map(|(id, b)| (b.last_activity(), id.clone()))
            .collect();
        order.sort_unstable();

        let mut evicted = 0;
        for (_, device_id) in order {
            if total <= budget {
                break;
            }
            let Some(buffer) = self.buffers.get_mut(&device_id) else {
                continue;
            };
            let before = buffer.len();
            let freed = buffer.evict_bytes(total - budget);
            total -= freed;
            let count = before - buffer.len();
            evicted += count;
            debug!(device = %device_id, evicted = count, freed, "memory budget eviction");
        }
        evicted
    }

    /// Drop samples older than the retention window from every buffer.
    /// Returns the number of samples dropped.
    pub fn expire_old_samples(&mut self) -> usize {
        let Some(retention) = self.config.retention else {
            return 0;
        };
        let retention_ms = u64::try_from(retention.as_millis()).unwrap_or(u64::MAX);

        let mut expired = 0;
        for (device_id, buffer) in &mut self.buffers {
            let count = buffer.expire_older_than(retention_ms);
            if count > 0 {
                debug!(device = %device_id, expired = count, "retention window applied");
            }
            expired += count;
        }
        expired
    }

    pub fn get(&self, device_id: &str) -> Option<&TelemetryBuffer> {
        self.buffers.get(device_id)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.buffers.contains_key(device_id)
    }

    /// Copy of a device's samples, optionally limited to a timestamp window.
    pub fn snapshot(
        &self,
        device_id: &str,
        window: Option<RangeInclusive<u64>>,
    ) -> Option<Vec<Sample>> {
        self.buffers.get(device_id).map(|b| b.snapshot(window))
    }

    /// The newest `count` samples of a device, oldest first.
    pub fn latest(&self, device_id: &str, count: usize) -> Option<Vec<Sample>> {
        self.buffers.get(device_id).map(|b| b.latest(count))
    }

    /// Change one device's cap. Returns the number of samples dropped.
    pub fn resize_device(
        &mut self,
        device_id: &str,
        capacity: usize,
    ) -> Result<usize, TelemetryError> {
        if capacity == 0 {
            return Err(TelemetryError::InvalidCapacity);
        }
        let buffer = self
            .buffers
            .get_mut(device_id)
            .ok_or_else(|| TelemetryError::UnknownDevice(device_id.to_owned()))?;
        let dropped = buffer.set_capacity(capacity);
        info!(device = %device_id, capacity, dropped, "buffer resized");
        Ok(dropped)
    }

    /// Empty one device's buffer, keeping its registration and cap.
    /// Returns the number of samples discarded.
    pub fn clear_device(&mut self, device_id: &str) -> Result<usize, TelemetryError> {
        let buffer = self
            .buffers
            .get_mut(device_id)
            .ok_or_else(|| TelemetryError::UnknownDevice(device_id.to_owned()))?;
        let cleared = buffer.len();
        buffer.clear();
        info!(device = %device_id, cleared, "buffer cleared");
        Ok(cleared)
    }

    /// Empty every buffer and reset all memory accounting in one step.
    pub fn clear_all(&mut self) {
        for buffer in self.buffers.values_mut() {
            buffer.clear();
        }
        self.tick = 0;
        for buffer in self.buffers.values_mut() {
            buffer.touch(0);
        }
    }

    /// Registered device IDs, sorted.
    pub fn device_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.buffers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn metrics(&self, device_id: &str) -> Option<BufferMetrics> {
        self.buffers.get(device_id).map(TelemetryBuffer::metrics)
    }

    pub fn stats(&self) -> RegistryStats {
        let metrics: Vec<BufferMetrics> =
            self.buffers.values().map(TelemetryBuffer::metrics).collect();
        let average_utilization = if metrics.is_empty() {
            0.0
        } else {
            metrics.iter().map(|m| m.utilization_percent).sum::<f64>() / metrics.len() as f64
        };
        let highest_utilization_device = metrics
            .iter()
            .max_by(|a, b| a.utilization_percent.total_cmp(&b.utilization_percent))
            .map(|m| m.device_id.clone());

        RegistryStats {
            device_count: metrics.len(),
            total_samples: metrics.iter().map(|m| m.len).sum(),
            total_memory_bytes: metrics.iter().map(|m| m.memory_bytes).sum(),
            max_memory_bytes: self.config.max_memory_bytes,
            average_utilization,
            highest_utilization_device,
            total_dropped: metrics.iter().map(|m| m.dropped).sum(),
            total_evicted: metrics.iter().map(|m| m.evicted).sum(),
            total_expired: metrics.iter().map(|m| m.expired).sum(),
        }
    }
}

impl Default for BufferRegistry {
    fn default() -> Self {
        Self::new(BufferConfig::default())
    }
}
