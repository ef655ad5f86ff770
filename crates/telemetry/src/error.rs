//! Error types for buffer registry operations.

/// Errors reported by the buffer registry.
///
/// Eviction is never an error; only operator-visible limits are.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelemetryError {
    #[error("device limit reached ({max_devices} devices)")]
    CapacityExceeded { max_devices: usize },

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("buffer capacity must be > 0")]
    InvalidCapacity,
}
