//! Wire-level types delivered to the telemetry core by the transport layer.
//!
//! Everything here is already decoded: the BLE layer parses notifications
//! into [`Sample`]s and the connection layer reports heartbeats and the set
//! of transport-connected devices.

pub mod constants;
pub mod events;
pub mod sample;

pub use events::{HeartbeatEvent, InboundEvent, TransportStatusEvent};
pub use sample::{CHANNEL_COUNT, Sample, SampleError};
