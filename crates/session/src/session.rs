use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::RangeInclusive;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use gaitwatch_health::{ConnectionStatus, DeviceRecord, HealthMonitor, StatusChange};
use gaitwatch_protocol::{HeartbeatEvent, InboundEvent, Sample, SampleError, TransportStatusEvent};
use gaitwatch_telemetry::{
    BufferMetrics, BufferRegistry, CombinedRate, DuplicateFilter, PushReport, RateTracker,
    RegistryStats, SubscriberError, Subscription, SubscriptionHub, TelemetryError,
};

use crate::command::{OperatorCommand, SessionInput};
use crate::config::SessionConfig;
use crate::error::SessionError;

/// What happened to one inbound sample.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Buffered and published.
    Accepted(PushReport),
    /// Same timestamp as the device's previous sample; dropped.
    Duplicate,
    /// Collection is not active for the device; dropped.
    NotCollecting,
    /// Failed validation; dropped.
    Invalid(SampleError),
    /// The registry refused the device.
    Rejected(TelemetryError),
}

/// Running totals since the session was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    pub accepted: u64,
    pub duplicates: u64,
    pub gated: u64,
    pub invalid: u64,
    pub rejected: u64,
    pub subscriber_failures: u64,
    pub missed_heartbeats: u64,
}

/// Result of the slow maintenance timer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Device records dropped by idle cleanup.
    pub removed: Vec<String>,
    /// Samples dropped by the retention window.
    pub expired: usize,
    /// Samples evicted by the memory-pressure check.
    pub evicted: usize,
}

/// Composition root of the telemetry core.
///
/// Every mutation goes through `&mut self`; there is no interior locking.
/// Inbound samples flow validate → liveness → dedup → rate → collection
/// gate → buffer → publish.
#[derive(Debug)]
pub struct DeviceSession {
    config: SessionConfig,
    registry: BufferRegistry,
    health: HealthMonitor,
    rates: RateTracker,
    dedup: DuplicateFilter,
    hub: SubscriptionHub,
    collecting: BTreeSet<String>,
    rate_hints: HashMap<String, f64>,
    counters: SessionCounters,
}

impl DeviceSession {
    /// Build a session from a validated config.
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: SessionConfig) -> Self {
        Self {
            registry: BufferRegistry::new(config.buffer_config()),
            health: HealthMonitor::new(config.health_config()),
            rates: RateTracker::new(config.rate_config()),
            dedup: DuplicateFilter::new(),
            hub: SubscriptionHub::new(),
            collecting: BTreeSet::new(),
            rate_hints: HashMap::new(),
            counters: SessionCounters::default(),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ---- Inbound feeds ----

    pub fn handle_input(&mut self, input: SessionInput) -> Result<(), SessionError> {
        self.handle_input_at(input, Instant::now())
    }

    pub fn handle_input_at(
        &mut self,
        input: SessionInput,
        now: Instant,
    ) -> Result<(), SessionError> {
        match input {
            SessionInput::Event(event) => self.handle_event_at(event, now),
            SessionInput::Command(command) => self.handle_command_at(command, now),
        }
    }

    /// Apply one device event. Invalid and refused samples come back as
    /// errors; duplicates and gated samples do not.
    pub fn handle_event_at(
        &mut self,
        event: InboundEvent,
        now: Instant,
    ) -> Result<(), SessionError> {
        match event {
            InboundEvent::Sample(sample) => match self.ingest_sample_at(sample, now) {
                IngestOutcome::Invalid(e) => Err(SessionError::InvalidSample(e)),
                IngestOutcome::Rejected(e) => Err(SessionError::Telemetry(e)),
                IngestOutcome::Accepted(_)
                | IngestOutcome::Duplicate
                | IngestOutcome::NotCollecting => Ok(()),
            },
            InboundEvent::Heartbeat(heartbeat) => {
                self.ingest_heartbeat_at(&heartbeat, now);
                Ok(())
            }
            InboundEvent::Transport(status) => {
                self.update_transport_at(&status, now);
                Ok(())
            }
        }
    }

    pub fn ingest_sample(&mut self, sample: Sample) -> IngestOutcome {
        self.ingest_sample_at(sample, Instant::now())
    }

    pub fn ingest_sample_at(&mut self, sample: Sample, now: Instant) -> IngestOutcome {
        if let Err(e) = sample.validate() {
            self.counters.invalid += 1;
            debug!(device = %sample.device_id, error = %e, "invalid sample dropped");
            return IngestOutcome::Invalid(e);
        }

        let device_id = sample.device_id.clone();
        self.health.observe_sample_at(&device_id, now);

        if !self.dedup.check(&sample) {
            self.counters.duplicates += 1;
            debug!(device = %device_id, timestamp = sample.timestamp, "duplicate sample dropped");
            return IngestOutcome::Duplicate;
        }

        if let Some(hint) = sample.sample_rate.filter(|hz| hz.is_finite() && *hz > 0.0) {
            self.rate_hints.insert(device_id.clone(), hint);
        }
        self.rates.record(&device_id, now);
        let rate = self.rate(&device_id);
        self.health.set_rate_estimate(&device_id, rate);

        if !self.collecting.contains(&device_id) {
            self.counters.gated += 1;
            return IngestOutcome::NotCollecting;
        }

        let report = match self.registry.push(sample.clone()) {
            Ok(report) => report,
            Err(e) => {
                self.counters.rejected += 1;
                debug!(device = %device_id, error = %e, "sample rejected");
                return IngestOutcome::Rejected(e);
            }
        };
        self.counters.accepted += 1;

        let published = self.hub.publish(&sample);
        self.counters.subscriber_failures += published.failed as u64;
        IngestOutcome::Accepted(report)
    }

    /// Returns the number of heartbeats inferred lost.
    pub fn ingest_heartbeat_at(&mut self, heartbeat: &HeartbeatEvent, now: Instant) -> u64 {
        let missed = self.health.observe_heartbeat_at(heartbeat, now);
        self.counters.missed_heartbeats += missed;
        missed
    }

    pub fn update_transport_at(
        &mut self,
        status: &TransportStatusEvent,
        now: Instant,
    ) -> Vec<StatusChange> {
        self.health.set_transport_connected_at(&status.connected, now)
    }

    // ---- Operator actions ----

    pub fn handle_command_at(
        &mut self,
        command: OperatorCommand,
        now: Instant,
    ) -> Result<(), SessionError> {
        match command {
            OperatorCommand::RegisterDevice { device_id } => {
                self.register_device_at(&device_id, now)
            }
            OperatorCommand::UnregisterDevice { device_id } => self.unregister_device(&device_id),
            OperatorCommand::SetExpected {
                device_id,
                expected,
            } => {
                self.set_expected_at(&device_id, expected, now);
                Ok(())
            }
            OperatorCommand::StartCollection { device_id } => {
                self.start_collection_at(&device_id, now)
            }
            OperatorCommand::StopCollection { device_id } => {
                self.stop_collection(&device_id);
                Ok(())
            }
            OperatorCommand::ClearDevice { device_id } => {
                self.clear_device(&device_id).map(|_| ())
            }
            OperatorCommand::ClearAll => {
                self.clear_all();
                Ok(())
            }
            OperatorCommand::ResizeDevice {
                device_id,
                capacity,
            } => self.resize_device(&device_id, capacity).map(|_| ()),
        }
    }

    /// Create the device's buffer and record. Idempotent; fails only when a
    /// new device would exceed the device limit.
    pub fn register_device_at(
        &mut self,
        device_id: &str,
        now: Instant,
    ) -> Result<(), SessionError> {
        if let Err(e) = self.registry.register_device(device_id) {
            debug!(device = %device_id, error = %e, "device registration refused");
            return Err(e.into());
        }
        self.health.register_at(device_id, now);
        Ok(())
    }

    /// Forget everything about a device: buffer, record, rate and
    /// collection state.
    pub fn unregister_device(&mut self, device_id: &str) -> Result<(), SessionError> {
        let had_buffer = self.registry.unregister_device(device_id);
        let had_record = self.health.remove(device_id).is_some();
        self.forget_tracking(device_id);
        self.collecting.remove(device_id);

        if had_buffer || had_record {
            info!(device = %device_id, "device unregistered");
            Ok(())
        } else {
            Err(SessionError::UnknownDevice(device_id.to_owned()))
        }
    }

    /// Mark or unmark a device as expected, creating its record if needed.
    pub fn set_expected_at(&mut self, device_id: &str, expected: bool, now: Instant) {
        self.health.register_at(device_id, now);
        self.health.set_expected(device_id, expected);
        info!(device = %device_id, expected, "expected flag set");
    }

    /// Begin accepting samples from a device. Registers its buffer first,
    /// so the device limit applies here.
    pub fn start_collection_at(
        &mut self,
        device_id: &str,
        now: Instant,
    ) -> Result<(), SessionError> {
        self.register_device_at(device_id, now)?;
        if self.collecting.insert(device_id.to_owned()) {
            info!(device = %device_id, "collection started");
        }
        Ok(())
    }

    /// Stop accepting samples from a device. Its buffer is kept for export.
    /// Returns `false` if collection was not active.
    pub fn stop_collection(&mut self, device_id: &str) -> bool {
        let stopped = self.collecting.remove(device_id);
        if stopped {
            info!(device = %device_id, "collection stopped");
        }
        stopped
    }

    /// Empty one device's buffer and restart its rate and duplicate
    /// tracking. Returns the samples discarded.
    pub fn clear_device(&mut self, device_id: &str) -> Result<usize, SessionError> {
        let cleared = self.registry.clear_device(device_id)?;
        self.forget_tracking(device_id);
        self.health.set_rate_estimate(device_id, None);
        Ok(cleared)
    }

    /// Reset every buffer, rate window and duplicate filter before a new
    /// collection session. Device records and collection flags are kept.
    pub fn clear_all(&mut self) {
        self.registry.clear_all();
        self.rates.clear();
        self.dedup.clear();
        self.rate_hints.clear();
        let ids: Vec<String> = self.health.records().iter().map(|r| r.id.clone()).collect();
        for id in ids {
            self.health.set_rate_estimate(&id, None);
        }
        info!(devices = self.registry.len(), "all buffers cleared");
    }

    /// Change one device's buffer cap. Returns the samples dropped.
    pub fn resize_device(
        &mut self,
        device_id: &str,
        capacity: usize,
    ) -> Result<usize, SessionError> {
        Ok(self.registry.resize_device(device_id, capacity)?)
    }

    // ---- Timers ----

    /// Fast timer: reclassify every device.
    pub fn health_tick_at(&mut self, now: Instant) -> Vec<StatusChange> {
        self.health.sweep_at(now)
    }

    /// Slow timer: idle cleanup, the retention window, then the
    /// memory-pressure check.
    ///
    /// Idle cleanup drops tracking state and ends collection; buffers stay
    /// until the operator unregisters the device.
    pub fn maintenance_tick_at(&mut self, now: Instant) -> MaintenanceReport {
        let removed = self.health.cleanup_idle_at(now);
        for device_id in &removed {
            self.forget_tracking(device_id);
            if self.collecting.remove(device_id) {
                info!(device = %device_id, "collection stopped for idle device");
            }
        }
        let expired = self.registry.expire_old_samples();
        let evicted = self.registry.enforce_memory_budget();
        debug!(
            memory_bytes = self.registry.aggregate_memory_estimate(),
            budget = self.config.buffer.max_memory_bytes,
            expired,
            evicted,
            "memory check"
        );
        MaintenanceReport {
            removed,
            expired,
            evicted,
        }
    }

    fn forget_tracking(&mut self, device_id: &str) {
        self.rates.remove(device_id);
        self.dedup.forget(device_id);
        self.rate_hints.remove(device_id);
    }

    // ---- Queries ----

    pub fn status_map(&self) -> BTreeMap<String, ConnectionStatus> {
        self.health.status_map()
    }

    pub fn device(&self, device_id: &str) -> Option<&DeviceRecord> {
        self.health.get(device_id)
    }

    /// Every known device record, sorted by ID.
    pub fn devices(&self) -> Vec<&DeviceRecord> {
        self.health.records()
    }

    pub fn is_collecting(&self, device_id: &str) -> bool {
        self.collecting.contains(device_id)
    }

    pub fn collecting(&self) -> impl Iterator<Item = &str> {
        self.collecting.iter().map(String::as_str)
    }

    pub fn snapshot(
        &self,
        device_id: &str,
        window: Option<RangeInclusive<u64>>,
    ) -> Option<Vec<Sample>> {
        self.registry.snapshot(device_id, window)
    }

    pub fn latest(&self, device_id: &str, count: usize) -> Option<Vec<Sample>> {
        self.registry.latest(device_id, count)
    }

    pub fn buffer_metrics(&self, device_id: &str) -> Option<BufferMetrics> {
        self.registry.metrics(device_id)
    }

    pub fn memory_stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Estimated rate for one device, falling back to the rate the device
    /// reports itself while the estimator has too little history.
    pub fn rate(&self, device_id: &str) -> Option<f64> {
        self.rates
            .estimate(device_id)
            .or_else(|| self.rate_hints.get(device_id).copied())
    }

    /// Display rate across every device with collection active.
    pub fn combined_rate(&self) -> CombinedRate {
        let estimates: Vec<Option<f64>> = self.collecting().map(|id| self.rate(id)).collect();
        CombinedRate::from_estimates(&estimates, self.rates.config().uniform_tolerance)
    }

    pub fn duplicates(&self, device_id: &str) -> u64 {
        self.dedup.duplicates(device_id)
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    /// Shared handle to the fan-out hub. Callbacks must not lock the
    /// session they are registered on.
    pub fn hub(&self) -> &SubscriptionHub {
        &self.hub
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Sample) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.hub.subscribe(callback)
    }
}

impl Default for DeviceSession {
    fn default() -> Self {
        Self::build(SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::error::ConfigError;

    const MS: Duration = Duration::from_millis(1);

    fn sample(device: &str, ts: u64) -> Sample {
        Sample::new(device, ts, [10.0, 20.0, 30.0, 0.1, 0.2, 0.3])
    }

    fn collecting_session(ids: &[&str], t0: Instant) -> DeviceSession {
        let mut session = DeviceSession::default();
        for id in ids {
            session.start_collection_at(id, t0).unwrap();
        }
        session
    }

    fn timestamps(session: &DeviceSession, device: &str) -> Vec<u64> {
        session
            .snapshot(device, None)
            .unwrap_or_default()
            .iter()
            .map(|s| s.timestamp)
            .collect()
    }

    fn transport(ids: &[&str]) -> TransportStatusEvent {
        TransportStatusEvent {
            connected: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn accepted_sample_is_buffered_and_published() {
        let t0 = Instant::now();
        let mut session = collecting_session(&["A"], t0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        session.subscribe(move |s| {
            seen_cb.lock().unwrap().push(s.timestamp);
            Ok(())
        });

        let outcome = session.ingest_sample_at(sample("A", 1000), t0);

        assert!(matches!(outcome, IngestOutcome::Accepted(_)));
        assert_eq!(timestamps(&session, "A"), vec![1000]);
        assert_eq!(*seen.lock().unwrap(), vec![1000]);
        assert_eq!(session.counters().accepted, 1);
    }

    #[test]
    fn duplicate_timestamp_is_neither_buffered_nor_published() {
        let t0 = Instant::now();
        let mut session = collecting_session(&["A"], t0);
        let published = Arc::new(Mutex::new(0));
        let p = Arc::clone(&published);
        session.subscribe(move |_| {
            *p.lock().unwrap() += 1;
            Ok(())
        });

        session.ingest_sample_at(sample("A", 1000), t0);
        let outcome = session.ingest_sample_at(sample("A", 1000), t0 + MS);

        assert_eq!(outcome, IngestOutcome::Duplicate);
        assert_eq!(timestamps(&session, "A"), vec![1000]);
        assert_eq!(*published.lock().unwrap(), 1);
        assert_eq!(session.duplicates("A"), 1);
        assert_eq!(session.counters().duplicates, 1);
    }

    #[test]
    fn samples_are_gated_until_collection_starts() {
        let t0 = Instant::now();
        let mut session = DeviceSession::default();

        let outcome = session.ingest_sample_at(sample("A", 1), t0);
        assert_eq!(outcome, IngestOutcome::NotCollecting);
        assert!(session.snapshot("A", None).is_none());
        // Liveness is still tracked.
        assert!(session.device("A").is_some());

        session.start_collection_at("A", t0).unwrap();
        session.ingest_sample_at(sample("A", 2), t0 + MS);
        assert!(session.stop_collection("A"));
        session.ingest_sample_at(sample("A", 3), t0 + 2 * MS);

        assert_eq!(timestamps(&session, "A"), vec![2]);
        assert_eq!(session.counters().gated, 2);
    }

    #[test]
    fn invalid_sample_is_reported() {
        let t0 = Instant::now();
        let mut session = collecting_session(&["A"], t0);
        let mut bad = sample("A", 1);
        bad.x = f32::NAN;

        let outcome = session.ingest_sample_at(bad, t0);

        assert!(matches!(outcome, IngestOutcome::Invalid(SampleError::NonFinite(_))));
        assert_eq!(session.counters().invalid, 1);
        assert_eq!(timestamps(&session, "A"), Vec::<u64>::new());
    }

    #[test]
    fn fifo_scenario_keeps_most_recent() {
        let mut config = SessionConfig::default();
        config.buffer.per_device_capacity = 2;
        let mut session = DeviceSession::new(config).unwrap();
        let t0 = Instant::now();
        session.start_collection_at("A", t0).unwrap();

        for (i, ts) in [1000, 2000, 3000].into_iter().enumerate() {
            session.ingest_sample_at(sample("A", ts), t0 + MS * i as u32);
        }

        assert_eq!(timestamps(&session, "A"), vec![2000, 3000]);
        assert_eq!(session.latest("A", 1).unwrap()[0].timestamp, 3000);
    }

    #[test]
    fn device_limit_is_reported_on_registration() {
        let mut config = SessionConfig::default();
        config.buffer.max_devices = 1;
        let mut session = DeviceSession::new(config).unwrap();
        let t0 = Instant::now();

        session.start_collection_at("A", t0).unwrap();
        let err = session.start_collection_at("B", t0).unwrap_err();

        assert!(matches!(
            err,
            SessionError::Telemetry(TelemetryError::CapacityExceeded { max_devices: 1 })
        ));
        assert!(!session.is_collecting("B"));
        // Re-registering the existing device is fine.
        session.register_device_at("A", t0).unwrap();
    }

    #[test]
    fn failing_subscriber_does_not_affect_buffer() {
        let t0 = Instant::now();
        let mut session = collecting_session(&["A"], t0);
        session.subscribe(|_| Err("chart gone".into()));

        let outcome = session.ingest_sample_at(sample("A", 1), t0);

        assert!(matches!(outcome, IngestOutcome::Accepted(_)));
        assert_eq!(timestamps(&session, "A"), vec![1]);
        assert_eq!(session.counters().subscriber_failures, 1);
    }

    #[test]
    fn transport_disconnect_overrides_recent_data() {
        let t0 = Instant::now();
        let mut session = collecting_session(&["A"], t0);
        session.update_transport_at(&transport(&["A"]), t0);
        session.ingest_sample_at(sample("A", 1), t0);
        assert_eq!(session.status_map()["A"], ConnectionStatus::Connected);

        session.update_transport_at(&transport(&[]), t0 + MS);
        session.ingest_sample_at(sample("A", 2), t0 + 2 * MS);
        session.health_tick_at(t0 + 3 * MS);

        assert_eq!(session.status_map()["A"], ConnectionStatus::Disconnected);
    }

    #[test]
    fn stale_heartbeat_with_fresh_data_times_out() {
        let t0 = Instant::now();
        let mut session = collecting_session(&["A"], t0);
        session.update_transport_at(&transport(&["A"]), t0);
        let hb = HeartbeatEvent {
            device_id: "A".into(),
            sequence: 1,
            device_timestamp: 1,
            received_timestamp: 1,
        };
        session.ingest_heartbeat_at(&hb, t0);

        let later = t0 + Duration::from_secs(11);
        session.ingest_sample_at(sample("A", 11_000), later);
        let changes = session.health_tick_at(later);

        assert_eq!(changes.len(), 1);
        assert_eq!(session.status_map()["A"], ConnectionStatus::Timeout);
    }

    #[test]
    fn combined_rate_covers_collecting_devices() {
        let t0 = Instant::now();
        let mut session = DeviceSession::default();
        assert_eq!(session.combined_rate(), CombinedRate::Idle);
        assert_eq!(session.combined_rate().to_string(), "0 Hz");

        session.start_collection_at("A", t0).unwrap();
        session.start_collection_at("B", t0).unwrap();
        assert_eq!(session.combined_rate(), CombinedRate::Calculating);

        for i in 0..10u32 {
            session.ingest_sample_at(sample("A", 1 + u64::from(i)), t0 + 10 * MS * i);
            session.ingest_sample_at(sample("B", 1 + u64::from(i)), t0 + 10 * MS * i);
        }
        assert_eq!(session.combined_rate().to_string(), "100.0 Hz");
        let rate = session.device("A").unwrap().sample_rate_estimate.unwrap();
        assert!((rate - 100.0).abs() < 1e-6);
    }

    #[test]
    fn device_rate_hint_is_fallback() {
        let t0 = Instant::now();
        let mut session = collecting_session(&["A"], t0);
        session.ingest_sample_at(sample("A", 1).with_sample_rate(Some(50.0)), t0);

        assert_eq!(session.rate("A"), Some(50.0));
        assert_eq!(session.combined_rate(), CombinedRate::Uniform(50.0));
    }

    #[test]
    fn clear_all_resets_buffers_and_dedup() {
        let t0 = Instant::now();
        let mut session = collecting_session(&["A", "B"], t0);
        session.ingest_sample_at(sample("A", 5), t0);
        session.ingest_sample_at(sample("B", 5), t0);

        session.clear_all();

        let stats = session.memory_stats();
        assert_eq!(stats.total_samples, 0);
        assert_eq!(stats.total_memory_bytes, 0);
        assert_eq!(session.rate("A"), None);
        // Same timestamp is accepted again in the new session.
        let outcome = session.ingest_sample_at(sample("A", 5), t0 + MS);
        assert!(matches!(outcome, IngestOutcome::Accepted(_)));
        assert!(session.is_collecting("B"));
    }

    #[test]
    fn unregister_forgets_device() {
        let t0 = Instant::now();
        let mut session = collecting_session(&["A"], t0);
        session.ingest_sample_at(sample("A", 1), t0);

        session.unregister_device("A").unwrap();

        assert!(session.device("A").is_none());
        assert!(session.snapshot("A", None).is_none());
        assert!(!session.is_collecting("A"));
        assert!(matches!(
            session.unregister_device("A"),
            Err(SessionError::UnknownDevice(_))
        ));
    }

    #[test]
    fn maintenance_removes_idle_records_but_keeps_expected() {
        let t0 = Instant::now();
        let mut session = DeviceSession::default();
        session.ingest_sample_at(sample("gone", 1), t0);
        session.ingest_sample_at(sample("kept", 1), t0);
        session.set_expected_at("kept", true, t0);

        let report = session.maintenance_tick_at(t0 + Duration::from_secs(301));

        assert_eq!(report.removed, vec!["gone".to_string()]);
        assert!(session.device("kept").is_some());
    }

    #[test]
    fn maintenance_enforces_memory_budget() {
        let mut config = SessionConfig::default();
        config.buffer.max_memory_bytes = 4 * sample("A", 1).estimated_size();
        let mut session = DeviceSession::new(config).unwrap();
        let t0 = Instant::now();
        session.start_collection_at("A", t0).unwrap();
        for ts in 1..=10 {
            session.ingest_sample_at(sample("A", ts), t0);
        }

        let report = session.maintenance_tick_at(t0);

        assert_eq!(report.evicted, 0);
        assert!(session.memory_stats().total_memory_bytes <= 4 * sample("A", 1).estimated_size());
        assert_eq!(timestamps(&session, "A"), vec![7, 8, 9, 10]);
    }

    #[test]
    fn new_rejects_invalid_config() {
        let mut config = SessionConfig::default();
        config.buffer.per_device_capacity = 0;
        assert!(matches!(
            DeviceSession::new(config),
            Err(SessionError::Config(ConfigError::Invalid(_)))
        ));

        let mut config = SessionConfig::default();
        config.health.sweep_interval_ms = 0;
        assert!(matches!(
            DeviceSession::new(config),
            Err(SessionError::Config(ConfigError::Invalid(_)))
        ));

        assert!(DeviceSession::new(SessionConfig::default()).is_ok());
    }

    #[test]
    fn idle_cleanup_ends_collection() {
        let t0 = Instant::now();
        let mut session = collecting_session(&["A"], t0);
        for i in 0..10u32 {
            session.ingest_sample_at(sample("A", 1 + u64::from(i)), t0 + 10 * MS * i);
        }
        assert_eq!(session.combined_rate().to_string(), "100.0 Hz");

        let report = session.maintenance_tick_at(t0 + Duration::from_secs(400));

        assert_eq!(report.removed, vec!["A".to_string()]);
        assert!(!session.is_collecting("A"));
        assert_eq!(session.combined_rate().to_string(), "0 Hz");
        // The buffer is kept for export.
        assert_eq!(timestamps(&session, "A").len(), 10);
    }

    #[test]
    fn maintenance_applies_retention() {
        let mut config = SessionConfig::default();
        config.buffer.retention_ms = 10_000;
        let mut session = DeviceSession::new(config).unwrap();
        let t0 = Instant::now();
        session.start_collection_at("A", t0).unwrap();
        for ts in [1_000, 5_000, 20_000, 25_000] {
            session.ingest_sample_at(sample("A", ts), t0);
        }

        let report = session.maintenance_tick_at(t0);

        assert_eq!(report.expired, 2);
        assert_eq!(timestamps(&session, "A"), vec![20_000, 25_000]);
        assert_eq!(session.buffer_metrics("A").unwrap().expired, 2);
    }

    #[test]
    fn clear_device_resets_one_device() {
        let t0 = Instant::now();
        let mut session = collecting_session(&["A", "B"], t0);
        session.ingest_sample_at(sample("A", 5), t0);
        session.ingest_sample_at(sample("B", 5), t0);

        assert_eq!(session.clear_device("A").unwrap(), 1);

        assert!(timestamps(&session, "A").is_empty());
        assert_eq!(timestamps(&session, "B"), vec![5]);
        assert!(session.is_collecting("A"));
        // Dedup state is gone for A only.
        let outcome = session.ingest_sample_at(sample("A", 5), t0 + MS);
        assert!(matches!(outcome, IngestOutcome::Accepted(_)));
        assert_eq!(
            session.ingest_sample_at(sample("B", 5), t0 + MS),
            IngestOutcome::Duplicate
        );

        assert!(matches!(
            session.clear_device("ghost"),
            Err(SessionError::Telemetry(TelemetryError::UnknownDevice(_)))
        ));
    }

    #[test]
    fn record_tracks_connection_metrics() {
        let t0 = Instant::now();
        let mut session = collecting_session(&["A"], t0);
        session.update_transport_at(&transport(&["A"]), t0);
        session.ingest_sample_at(sample("A", 1), t0);
        session.ingest_sample_at(sample("A", 2), t0 + MS);
        session.update_transport_at(&transport(&[]), t0 + 2 * MS);
        session.update_transport_at(&transport(&["A"]), t0 + 3 * MS);

        let record = session.device("A").unwrap();
        assert_eq!(record.packets_received, 2);
        assert_eq!(record.reconnection_count, 1);
        assert!(record.connected_at.is_some());
        assert!(record.last_data_received.is_some());
    }

    #[test]
    fn bad_events_surface_as_errors() {
        let t0 = Instant::now();
        let mut config = SessionConfig::default();
        config.buffer.max_devices = 1;
        let mut session = DeviceSession::new(config).unwrap();
        session.start_collection_at("A", t0).unwrap();

        let mut bad = sample("A", 1);
        bad.r1 = f32::INFINITY;
        let err = session
            .handle_event_at(InboundEvent::Sample(bad), t0)
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidSample(SampleError::NonFinite(_))));

        // Gated and duplicate samples are not errors.
        session
            .handle_event_at(InboundEvent::Sample(sample("B", 1)), t0)
            .unwrap();
        session
            .handle_event_at(InboundEvent::Sample(sample("A", 2)), t0)
            .unwrap();
        session
            .handle_event_at(InboundEvent::Sample(sample("A", 2)), t0 + MS)
            .unwrap();
        assert_eq!(session.counters().invalid, 1);
    }

    #[test]
    fn commands_route_to_operator_actions() {
        let t0 = Instant::now();
        let mut session = DeviceSession::default();

        let inputs = [
            OperatorCommand::StartCollection { device_id: "A".into() },
            OperatorCommand::SetExpected { device_id: "A".into(), expected: true },
            OperatorCommand::ResizeDevice { device_id: "A".into(), capacity: 10 },
            OperatorCommand::ClearDevice { device_id: "A".into() },
        ];
        for command in inputs {
            session.handle_input_at(command.into(), t0).unwrap();
        }
        session
            .handle_input_at(InboundEvent::Sample(sample("A", 1)).into(), t0)
            .unwrap();

        assert!(session.is_collecting("A"));
        assert!(session.device("A").unwrap().expected);
        assert_eq!(session.buffer_metrics("A").unwrap().capacity, 10);
        assert_eq!(timestamps(&session, "A"), vec![1]);

        let err = session
            .handle_input_at(
                OperatorCommand::ResizeDevice { device_id: "Z".into(), capacity: 1 }.into(),
                t0,
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::Telemetry(TelemetryError::UnknownDevice(_))));
    }
}
