use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info};

use gaitwatch_protocol::HeartbeatEvent;

use crate::types::{ConnectionStatus, DeviceRecord, HealthConfig, StatusChange};

/// Classify one device from its transport flag and signal ages.
///
/// `None` means the signal was never observed. A device that never sent a
/// sample has no fresh data; one that never sent a heartbeat has no
/// heartbeat source and is judged on the transport flag alone.
pub fn classify(
    transport_connected: bool,
    since_sample: Option<Duration>,
    since_heartbeat: Option<Duration>,
    config: &HealthConfig,
) -> ConnectionStatus {
    if !transport_connected {
        return ConnectionStatus::Disconnected;
    }
    let Some(heartbeat_age) = since_heartbeat else {
        return ConnectionStatus::Connected;
    };
    if heartbeat_age > config.heartbeat_timeout {
        let data_fresh = since_sample.is_some_and(|age| age < config.data_timeout);
        if data_fresh {
            ConnectionStatus::Timeout
        } else {
            ConnectionStatus::Disconnected
        }
    } else {
        ConnectionStatus::Connected
    }
}

/// Owns every [`DeviceRecord`] and is the only place a status changes.
///
/// Status moves only in [`sweep_at`](Self::sweep_at) and
/// [`set_transport_connected_at`](Self::set_transport_connected_at).
/// Observing samples or heartbeats updates timestamps, never status.
#[derive(Debug, Clone, Default)]
pub struct HealthMonitor {
    config: HealthConfig,
    records: HashMap<String, DeviceRecord>,
    transport_connected: HashSet<String>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            records: HashMap::new(),
            transport_connected: HashSet::new(),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Ensure a record exists for `device_id`. Returns `true` if created.
    pub fn register_at(&mut self, device_id: &str, now: Instant) -> bool {
        if self.records.contains_key(device_id) {
            return false;
        }
        let status = classify(self.is_transport_connected(device_id), None, None, &self.config);
        self.records
            .insert(device_id.to_owned(), DeviceRecord::new(device_id, status, now));
        info!(device = %device_id, %status, "device record created");
        true
    }

    /// Note a sample arrival. Creates the record if unseen.
    pub fn observe_sample_at(&mut self, device_id: &str, now: Instant) -> bool {
        let created = self.register_at(device_id, now);
        if let Some(record) = self.records.get_mut(device_id) {
            record.last_sample_at = Some(now);
            record.last_data_received = Some(Utc::now());
            record.packets_received += 1;
        }
        created
    }

    /// Note a heartbeat. Returns the number of heartbeats inferred lost from
    /// a gap in the sequence. A sequence that goes backwards (device reboot)
    /// restarts tracking without counting a gap.
    pub fn observe_heartbeat_at(&mut self, heartbeat: &HeartbeatEvent, now: Instant) -> u64 {
        self.register_at(&heartbeat.device_id, now);
        let Some(record) = self.records.get_mut(&heartbeat.device_id) else {
            return 0;
        };
        record.last_heartbeat_at = Some(now);

        let missed = match record.last_heartbeat_seq {
            Some(last) if heartbeat.sequence > last => heartbeat.sequence - last - 1,
            _ => 0,
        };
        record.last_heartbeat_seq = Some(heartbeat.sequence);
        if missed > 0 {
            record.missed_heartbeats += missed;
            debug!(
                device = %heartbeat.device_id,
                missed,
                sequence = heartbeat.sequence,
                "heartbeat sequence gap"
            );
        }
        missed
    }

    /// Replace the set of transport-connected devices and reclassify
    /// immediately. Listed devices without a record get one.
    pub fn set_transport_connected_at(
        &mut self,
        connected: &[String],
        now: Instant,
    ) -> Vec<StatusChange> {
        let previous = std::mem::replace(
            &mut self.transport_connected,
            connected.iter().cloned().collect(),
        );
        for device_id in connected {
            self.register_at(device_id, now);
            if previous.contains(device_id) {
                continue;
            }
            let Some(record) = self.records.get_mut(device_id) else {
                continue;
            };
            if record.connected_at.is_some() {
                record.reconnection_count += 1;
                info!(
                    device = %device_id,
                    reconnections = record.reconnection_count,
                    "device reconnected"
                );
            }
            record.connected_at = Some(Utc::now());
        }
        self.reclassify(now)
    }

    /// Periodic reclassification of every record.
    pub fn sweep_at(&mut self, now: Instant) -> Vec<StatusChange> {
        self.reclassify(now)
    }

    pub fn sweep(&mut self) -> Vec<StatusChange> {
        self.sweep_at(Instant::now())
    }

    fn reclassify(&mut self, now: Instant) -> Vec<StatusChange> {
        let mut changes = Vec::new();
        for record in self.records.values_mut() {
            let status = classify(
                self.transport_connected.contains(&record.id),
                record.since_sample(now),
                record.since_heartbeat(now),
                &self.config,
            );
            if status != record.status {
                info!(device = %record.id, from = %record.status, to = %status, "status changed");
                changes.push(StatusChange {
                    device_id: record.id.clone(),
                    from: record.status,
                    to: status,
                });
                record.status = status;
            }
        }
        changes.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        changes
    }

    /// Remove records inactive longer than the idle timeout that are
    /// neither transport-connected nor expected. Conditions are evaluated
    /// against current state, so a record that came back since the last
    /// sweep is kept. Returns the removed IDs, sorted.
    pub fn cleanup_idle_at(&mut self, now: Instant) -> Vec<String> {
        let idle_timeout = self.config.idle_timeout;
        let mut removed: Vec<String> = self
            .records
            .values()
            .filter(|r| !r.expected && !self.transport_connected.contains(&r.id))
            .filter(|r| now.saturating_duration_since(r.last_activity()) > idle_timeout)
            .map(|r| r.id.clone())
            .collect();
        removed.sort_unstable();

        for device_id in &removed {
            self.records.remove(device_id);
            info!(device = %device_id, "idle device removed");
        }
        removed
    }

    pub fn cleanup_idle(&mut self) -> Vec<String> {
        self.cleanup_idle_at(Instant::now())
    }

    /// Drop a record on operator request.
    pub fn remove(&mut self, device_id: &str) -> Option<DeviceRecord> {
        self.records.remove(device_id)
    }

    /// Mark or unmark a device as expected. Returns `false` if unknown.
    pub fn set_expected(&mut self, device_id: &str, expected: bool) -> bool {
        match self.records.get_mut(device_id) {
            Some(record) => {
                record.expected = expected;
                true
            }
            None => false,
        }
    }

    pub fn set_rate_estimate(&mut self, device_id: &str, estimate: Option<f64>) {
        if let Some(record) = self.records.get_mut(device_id) {
            record.sample_rate_estimate = estimate;
        }
    }

    pub fn is_transport_connected(&self, device_id: &str) -> bool {
        self.transport_connected.contains(device_id)
    }

    pub fn status(&self, device_id: &str) -> Option<ConnectionStatus> {
        self.records.get(device_id).map(|r| r.status)
    }

    /// `device_id -> status` for every known device.
    pub fn status_map(&self) -> BTreeMap<String, ConnectionStatus> {
        self.records
            .iter()
            .map(|(id, r)| (id.clone(), r.status))
            .collect()
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceRecord> {
        self.records.get(device_id)
    }

    /// Every record, sorted by device ID.
    pub fn records(&self) -> Vec<&DeviceRecord> {
        let mut records: Vec<&DeviceRecord> = self.records.values().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.records.contains_key(device_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
