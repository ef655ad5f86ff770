use serde::{Deserialize, Serialize};

use crate::sample::Sample;

/// Best-effort liveness ping from a device's heartbeat channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    pub device_id: String,
    pub sequence: u64,
    /// Device clock at send time (ms).
    pub device_timestamp: u64,
    /// Host clock at receipt (ms since the Unix epoch).
    pub received_timestamp: u64,
}

/// Full list of devices the transport currently reports as connected.
///
/// Sent on every change; any known device absent from the list is
/// considered transport-disconnected.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransportStatusEvent {
    #[serde(default)]
    pub connected: Vec<String>,
}

/// Anything the transport layer pushes into the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Sample(Sample),
    Heartbeat(HeartbeatEvent),
    Transport(TransportStatusEvent),
}

impl InboundEvent {
    /// The device the event concerns, if it concerns a single device.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            InboundEvent::Sample(s) => Some(&s.device_id),
            InboundEvent::Heartbeat(h) => Some(&h.device_id),
            InboundEvent::Transport(_) => None,
        }
    }
}
