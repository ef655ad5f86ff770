//! Session configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/gaitwatch/session.toml`
//! - Windows: `%APPDATA%/gaitwatch/session.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gaitwatch_health::HealthConfig;
use gaitwatch_protocol::constants::{
    DEFAULT_CLEANUP_INTERVAL, DEFAULT_DATA_TIMEOUT, DEFAULT_DEVICE_CAPACITY,
    DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_DEVICES,
    DEFAULT_MAX_MEMORY_BYTES, DEFAULT_RETENTION, DEFAULT_SWEEP_INTERVAL,
};
use gaitwatch_telemetry::{BufferConfig, RateConfig};

use crate::error::ConfigError;

/// Buffer limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSection {
    pub per_device_capacity: usize,
    pub max_memory_bytes: usize,
    pub max_devices: usize,
    /// Device-time span kept per buffer, applied by the slow timer.
    /// 0 disables retention.
    pub retention_ms: u64,
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            per_device_capacity: DEFAULT_DEVICE_CAPACITY,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            max_devices: DEFAULT_MAX_DEVICES,
            retention_ms: DEFAULT_RETENTION.as_millis() as u64,
        }
    }
}

/// Health thresholds and timer periods, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub heartbeat_timeout_ms: u64,
    pub data_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    /// Fast timer: status reclassification.
    pub sweep_interval_ms: u64,
    /// Slow timer: idle cleanup and memory-pressure check.
    pub cleanup_interval_ms: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT.as_millis() as u64,
            data_timeout_ms: DEFAULT_DATA_TIMEOUT.as_millis() as u64,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT.as_millis() as u64,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL.as_millis() as u64,
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL.as_millis() as u64,
        }
    }
}

/// Sample-rate estimation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateSection {
    pub window_size: usize,
    pub window_ms: u64,
    pub uniform_tolerance: f64,
}

impl Default for RateSection {
    fn default() -> Self {
        let rate = RateConfig::default();
        Self {
            window_size: rate.window_size,
            window_ms: rate.window.as_millis() as u64,
            uniform_tolerance: rate.uniform_tolerance,
        }
    }
}

/// Complete session configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub buffer: BufferSection,
    pub health: HealthSection,
    pub rate: RateSection,
}

impl SessionConfig {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Load from the platform config path, falling back to defaults when
    /// the file does not exist.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let path = config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Write pretty TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_owned()));

        if self.buffer.per_device_capacity == 0 {
            return invalid("buffer.per_device_capacity must be > 0");
        }
        if self.buffer.max_memory_bytes == 0 {
            return invalid("buffer.max_memory_bytes must be > 0");
        }
        if self.buffer.max_devices == 0 {
            return invalid("buffer.max_devices must be > 0");
        }
        let h = &self.health;
        if [
            h.heartbeat_timeout_ms,
            h.data_timeout_ms,
            h.idle_timeout_ms,
            h.sweep_interval_ms,
            h.cleanup_interval_ms,
        ]
        .contains(&0)
        {
            return invalid("health timeouts and intervals must be > 0");
        }
        if self.rate.window_size < 2 {
            return invalid("rate.window_size must be at least 2");
        }
        if self.rate.window_ms == 0 {
            return invalid("rate.window_ms must be > 0");
        }
        let tol = self.rate.uniform_tolerance;
        if !tol.is_finite() || tol < 0.0 {
            return invalid("rate.uniform_tolerance must be a finite, non-negative number");
        }
        Ok(())
    }

    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            per_device_capacity: self.buffer.per_device_capacity,
            max_memory_bytes: self.buffer.max_memory_bytes,
            max_devices: self.buffer.max_devices,
            retention: (self.buffer.retention_ms > 0)
                .then(|| Duration::from_millis(self.buffer.retention_ms)),
        }
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            heartbeat_timeout: Duration::from_millis(self.health.heartbeat_timeout_ms),
            data_timeout: Duration::from_millis(self.health.data_timeout_ms),
            idle_timeout: Duration::from_millis(self.health.idle_timeout_ms),
        }
    }

    pub fn rate_config(&self) -> RateConfig {
        RateConfig {
            window_size: self.rate.window_size,
            window: Duration::from_millis(self.rate.window_ms),
            uniform_tolerance: self.rate.uniform_tolerance,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.health.sweep_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.health.cleanup_interval_ms)
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("gaitwatch")
            .join("session.toml")
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("gaitwatch").join("session.toml")
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        PathBuf::from("/tmp/gaitwatch/session.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SessionConfig::default();
        assert_eq!(config.buffer.per_device_capacity, 6000);
        assert_eq!(config.buffer.max_memory_bytes, 16 * 1024 * 1024);
        assert_eq!(config.buffer.max_devices, 8);
        assert_eq!(config.buffer.retention_ms, 3_600_000);
        assert_eq!(config.health.heartbeat_timeout_ms, 10_000);
        assert_eq!(config.health.data_timeout_ms, 5_000);
        assert_eq!(config.health.idle_timeout_ms, 300_000);
        assert_eq!(config.rate.window_size, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml_str = r#"
            [health]
            heartbeat_timeout_ms = 3000
        "#;
        let config: SessionConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.health.heartbeat_timeout_ms, 3000);
        assert_eq!(config.health.data_timeout_ms, 5000);
        assert_eq!(config.buffer, BufferSection::default());
        assert_eq!(
            config.health_config().heartbeat_timeout,
            Duration::from_secs(3)
        );
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.toml");

        let mut config = SessionConfig::default();
        config.buffer.max_devices = 3;
        config.rate.uniform_tolerance = 0.05;
        config.save(&path).unwrap();

        let loaded = SessionConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        std::fs::write(&path, "[buffer]\nper_device_capacity = 0\n").unwrap();

        let err = SessionConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "got {err:?}");
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        std::fs::write(&path, "[buffer\n").unwrap();

        let err = SessionConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn validate_rejects_bad_tolerance_and_intervals() {
        let mut config = SessionConfig::default();
        config.rate.uniform_tolerance = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.health.sweep_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn conversions_carry_values() {
        let config = SessionConfig::default();
        assert_eq!(config.buffer_config(), BufferConfig::default());
        assert_eq!(config.health_config(), HealthConfig::default());
        assert_eq!(config.rate_config(), RateConfig::default());
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(60));
    }

    #[test]
    fn zero_retention_disables_expiry() {
        let config: SessionConfig = toml::from_str("[buffer]\nretention_ms = 0\n").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer_config().retention, None);

        let config: SessionConfig = toml::from_str("[buffer]\nretention_ms = 30000\n").unwrap();
        assert_eq!(
            config.buffer_config().retention,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn config_path_not_empty() {
        let path = config_path();
        assert!(path.ends_with("session.toml"));
    }
}
