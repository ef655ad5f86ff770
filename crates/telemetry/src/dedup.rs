use std::collections::HashMap;

use gaitwatch_protocol::Sample;

/// Drops a sample whose timestamp equals the previous one from the same
/// device. Devices resend their last notification after a reconnect.
#[derive(Debug, Clone, Default)]
pub struct DuplicateFilter {
    last_timestamp: HashMap<String, u64>,
    duplicates: HashMap<String, u64>,
}

impl DuplicateFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the sample is new and records its timestamp;
    /// `false` (and counts it) if it repeats the previous timestamp.
    pub fn check(&mut self, sample: &Sample) -> bool {
        match self.last_timestamp.get_mut(&sample.device_id) {
            Some(last) if *last == sample.timestamp => {
                *self.duplicates.entry(sample.device_id.clone()).or_default() += 1;
                false
            }
            Some(last) => {
                *last = sample.timestamp;
                true
            }
            None => {
                self.last_timestamp
                    .insert(sample.device_id.clone(), sample.timestamp);
                true
            }
        }
    }

    /// Duplicates dropped for one device.
    pub fn duplicates(&self, device_id: &str) -> u64 {
        self.duplicates.get(device_id).copied().unwrap_or(0)
    }

    /// Duplicates dropped across all devices.
    pub fn total(&self) -> u64 {
        self.duplicates.values().sum()
    }

    pub fn forget(&mut self, device_id: &str) {
        self.last_timestamp.remove(device_id);
        self.duplicates.remove(device_id);
    }

    pub fn clear(&mut self) {
        self.last_timestamp.clear();
        self.duplicates.clear();
    }
}
