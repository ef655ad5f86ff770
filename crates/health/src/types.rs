//! Public types for the health monitor.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gaitwatch_protocol::constants::{
    DEFAULT_DATA_TIMEOUT, DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_IDLE_TIMEOUT,
};

/// Health classification of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Fresh data or heartbeat within threshold.
    Connected,
    /// Transport says connected, but the heartbeat went quiet while data
    /// is still arriving.
    Timeout,
    /// Transport says not connected, or every signal is stale.
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Timeout => "timeout",
            ConnectionStatus::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Thresholds used by the classifier and the idle cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// Heartbeat silence after which a device is no longer `Connected`.
    pub heartbeat_timeout: Duration,
    /// Sample silence after which data no longer counts as fresh.
    pub data_timeout: Duration,
    /// Inactivity after which an unconnected, non-expected record is removed.
    pub idle_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            data_timeout: DEFAULT_DATA_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Tracking state for one known device.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub id: String,
    pub status: ConnectionStatus,
    pub last_sample_at: Option<Instant>,
    pub last_heartbeat_at: Option<Instant>,
    /// Operator added this device explicitly; survives idle cleanup.
    pub expected: bool,
    pub sample_rate_estimate: Option<f64>,
    /// Wall-clock time the record was created.
    pub first_seen: DateTime<Utc>,
    pub last_heartbeat_seq: Option<u64>,
    /// Heartbeats inferred lost from sequence gaps.
    pub missed_heartbeats: u64,
    /// Wall-clock time of the most recent transport connect.
    pub connected_at: Option<DateTime<Utc>>,
    /// Wall-clock time of the most recent sample.
    pub last_data_received: Option<DateTime<Utc>>,
    pub packets_received: u64,
    /// Transport connects after the first one.
    pub reconnection_count: u32,
    created_at: Instant,
}

impl DeviceRecord {
    pub(crate) fn new(id: &str, status: ConnectionStatus, now: Instant) -> Self {
        Self {
            id: id.to_owned(),
            status,
            last_sample_at: None,
            last_heartbeat_at: None,
            expected: false,
            sample_rate_estimate: None,
            first_seen: Utc::now(),
            last_heartbeat_seq: None,
            missed_heartbeats: 0,
            connected_at: None,
            last_data_received: None,
            packets_received: 0,
            reconnection_count: 0,
            created_at: now,
        }
    }

    /// Most recent sign of life: last sample, last heartbeat or creation.
    pub fn last_activity(&self) -> Instant {
        [self.last_sample_at, self.last_heartbeat_at]
            .into_iter()
            .flatten()
            .fold(self.created_at, Instant::max)
    }

    pub fn since_sample(&self, now: Instant) -> Option<Duration> {
        self.last_sample_at.map(|t| now.saturating_duration_since(t))
    }

    pub fn since_heartbeat(&self, now: Instant) -> Option<Duration> {
        self.last_heartbeat_at.map(|t| now.saturating_duration_since(t))
    }
}

/// A status transition applied by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub device_id: String,
    pub from: ConnectionStatus,
    pub to: ConnectionStatus,
}
