use gaitwatch_protocol::SampleError;
use gaitwatch_telemetry::TelemetryError;

/// Errors from loading or validating a [`SessionConfig`](crate::SessionConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors reported to callers of [`DeviceSession`](crate::DeviceSession)
/// operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("invalid sample: {0}")]
    InvalidSample(#[from] SampleError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("session driver stopped")]
    DriverStopped,
}
