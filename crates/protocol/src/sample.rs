use serde::{Deserialize, Serialize};

use crate::constants::{MAX_ACCELERATION, MAX_FORCE};

/// Number of numeric channels carried by every sample.
pub const CHANNEL_COUNT: usize = 6;

/// One gait reading from a device.
///
/// `r1`..`r3` are the force resistor channels, `x`/`y`/`z` the accelerometer.
/// `timestamp` is the device's monotonic clock in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub device_id: String,
    pub r1: f32,
    pub r2: f32,
    pub r3: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub timestamp: u64,
    /// Rate reported by the device itself, if it sends one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,
}

/// Reasons a decoded sample is rejected before buffering.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SampleError {
    #[error("device id is empty")]
    EmptyDeviceId,

    #[error("timestamp must be non-zero")]
    ZeroTimestamp,

    #[error("channel {0} is NaN or infinite")]
    NonFinite(&'static str),

    #[error("channel {channel} out of range: {value}")]
    OutOfRange { channel: &'static str, value: f32 },
}

impl Sample {
    /// Build a sample from its six channels in `[r1, r2, r3, x, y, z]` order.
    pub fn new(
        device_id: impl Into<String>,
        timestamp: u64,
        channels: [f32; CHANNEL_COUNT],
    ) -> Self {
        let [r1, r2, r3, x, y, z] = channels;
        Self {
            device_id: device_id.into(),
            r1,
            r2,
            r3,
            x,
            y,
            z,
            timestamp,
            sample_rate: None,
        }
    }

    /// Attach the device-reported sample rate.
    pub fn with_sample_rate(mut self, sample_rate: Option<f64>) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Channel values in `[r1, r2, r3, x, y, z]` order.
    pub fn channels(&self) -> [f32; CHANNEL_COUNT] {
        [self.r1, self.r2, self.r3, self.x, self.y, self.z]
    }

    /// Approximate heap + inline footprint used for memory budgeting.
    pub fn estimated_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.device_id.len()
    }

    /// Check identity, timestamp and channel ranges.
    pub fn validate(&self) -> Result<(), SampleError> {
        if self.device_id.is_empty() {
            return Err(SampleError::EmptyDeviceId);
        }
        if self.timestamp == 0 {
            return Err(SampleError::ZeroTimestamp);
        }

        const NAMES: [&str; CHANNEL_COUNT] = ["r1", "r2", "r3", "x", "y", "z"];
        for (i, (name, value)) in NAMES.into_iter().zip(self.channels()).enumerate() {
            if !value.is_finite() {
                return Err(SampleError::NonFinite(name));
            }
            let limit = if i < 3 { MAX_FORCE } else { MAX_ACCELERATION };
            if value.abs() > limit {
                return Err(SampleError::OutOfRange {
                    channel: name,
                    value,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Sample {
        Sample::new("left-foot", 1000, [10.0, 20.0, 30.0, 0.1, -0.2, 0.98])
    }

    #[test]
    fn channels_preserve_order() {
        assert_eq!(sample().channels(), [10.0, 20.0, 30.0, 0.1, -0.2, 0.98]);
    }

    #[test]
    fn valid_sample_passes() {
        assert_eq!(sample().validate(), Ok(()));
    }

    #[test]
    fn empty_device_id_rejected() {
        let s = Sample::new("", 1000, [0.0; CHANNEL_COUNT]);
        assert_eq!(s.validate(), Err(SampleError::EmptyDeviceId));
    }

    #[test]
    fn zero_timestamp_rejected() {
        let s = Sample::new("a", 0, [0.0; CHANNEL_COUNT]);
        assert_eq!(s.validate(), Err(SampleError::ZeroTimestamp));
    }

    #[test]
    fn nan_channel_rejected() {
        let mut s = sample();
        s.y = f32::NAN;
        assert_eq!(s.validate(), Err(SampleError::NonFinite("y")));
    }

    #[test]
    fn acceleration_limit_applies_to_xyz_only() {
        let mut s = sample();
        s.r2 = 900.0; // fine for a force channel
        assert!(s.validate().is_ok());

        s.z = 51.0;
        assert!(matches!(
            s.validate(),
            Err(SampleError::OutOfRange { channel: "z", .. })
        ));
    }

    #[test]
    fn sample_rate_omitted_when_absent() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("sample_rate").is_none());

        let with_rate = sample().with_sample_rate(Some(100.0));
        let json = serde_json::to_value(with_rate).unwrap();
        assert_eq!(json["sample_rate"], 100.0);
    }

    #[test]
    fn estimated_size_grows_with_id() {
        let short = Sample::new("a", 1, [0.0; CHANNEL_COUNT]);
        let long = Sample::new("a-much-longer-device-id", 1, [0.0; CHANNEL_COUNT]);
        assert!(long.estimated_size() > short.estimated_size());
    }
}
