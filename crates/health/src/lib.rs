//! Connection health for gaitwatch devices.
//!
//! The transport layer cannot be trusted to report a lost device promptly,
//! so status is derived from the age of the last sample and the last
//! heartbeat, reclassified on a fixed period by [`HealthMonitor::sweep_at`].

pub mod monitor;
pub mod types;

pub use monitor::{HealthMonitor, classify};
pub use types::{ConnectionStatus, DeviceRecord, HealthConfig, StatusChange};
