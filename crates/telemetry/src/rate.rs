//! Sample-rate estimation from arrival times.
//!
//! Each device keeps a bounded sliding window of arrival instants. The rate
//! is the inverse of the mean inter-arrival interval over that window.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

/// Sliding-window parameters shared by every device estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct RateConfig {
    /// Arrival instants kept per device.
    pub window_size: usize,
    /// Arrivals older than this (relative to the newest) are discarded.
    pub window: Duration,
    /// Relative spread under which several device rates are shown as one.
    pub uniform_tolerance: f64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            window_size: 64,
            window: Duration::from_secs(5),
            uniform_tolerance: 0.01,
        }
    }
}

/// Rate estimator for a single device.
#[derive(Debug, Clone)]
pub struct SampleRateEstimator {
    arrivals: VecDeque<Instant>,
    window_size: usize,
    window: Duration,
}

impl SampleRateEstimator {
    pub fn new(window_size: usize, window: Duration) -> Self {
        Self {
            arrivals: VecDeque::with_capacity(window_size),
            window_size: window_size.max(2),
            window,
        }
    }

    /// Record one arrival and prune the window.
    pub fn record(&mut self, at: Instant) {
        self.arrivals.push_back(at);
        while self.arrivals.len() > self.window_size {
            self.arrivals.pop_front();
        }
        if let Some(cutoff) = at.checked_sub(self.window) {
            while self.arrivals.front().is_some_and(|&t| t < cutoff) {
                self.arrivals.pop_front();
            }
        }
    }

    /// Estimated rate in Hz, or `None` while fewer than two arrivals are
    /// in the window (or they share one instant).
    pub fn estimate(&self) -> Option<f64> {
        if self.arrivals.len() < 2 {
            return None;
        }
        let first = *self.arrivals.front()?;
        let last = *self.arrivals.back()?;
        let span = last.duration_since(first);
        if span.is_zero() {
            return None;
        }
        let mean_interval = span.as_secs_f64() / (self.arrivals.len() - 1) as f64;
        Some(1.0 / mean_interval)
    }

    pub fn len(&self) -> usize {
        self.arrivals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrivals.is_empty()
    }

    pub fn reset(&mut self) {
        self.arrivals.clear();
    }
}

/// Rate shown when several devices are displayed together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CombinedRate {
    /// No active devices: an explicit 0 Hz.
    Idle,
    /// Devices are active but none has enough history yet.
    Calculating,
    /// All estimates agree within tolerance; their mean.
    Uniform(f64),
    /// Estimates disagree; the spread is shown instead of one number.
    Range { min: f64, max: f64 },
}

impl CombinedRate {
    /// Combine per-device estimates (`None` = not enough history yet).
    pub fn from_estimates(estimates: &[Option<f64>], tolerance: f64) -> Self {
        if estimates.is_empty() {
            return CombinedRate::Idle;
        }
        let known: Vec<f64> = estimates.iter().flatten().copied().collect();
        if known.is_empty() {
            return CombinedRate::Calculating;
        }

        let min = known.iter().copied().fold(f64::INFINITY, f64::min);
        let max = known.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = known.iter().sum::<f64>() / known.len() as f64;

        if max - min <= tolerance * mean {
            CombinedRate::Uniform(mean)
        } else {
            CombinedRate::Range { min, max }
        }
    }
}

impl fmt::Display for CombinedRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CombinedRate::Idle => write!(f, "0 Hz"),
            CombinedRate::Calculating => write!(f, "calculating…"),
            CombinedRate::Uniform(hz) => write!(f, "{hz:.1} Hz"),
            CombinedRate::Range { min, max } => write!(f, "{min:.1}–{max:.1}"),
        }
    }
}

/// Per-device estimators keyed by device ID.
#[derive(Debug, Clone)]
pub struct RateTracker {
    config: RateConfig,
    devices: HashMap<String, SampleRateEstimator>,
}

impl RateTracker {
    pub fn new(config: RateConfig) -> Self {
        Self {
            config,
            devices: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RateConfig {
        &self.config
    }

    /// Record an arrival for `device_id` and return its current estimate.
    pub fn record(&mut self, device_id: &str, at: Instant) -> Option<f64> {
        let (window_size, window) = (self.config.window_size, self.config.window);
        let estimator = self
            .devices
            .entry(device_id.to_owned())
            .or_insert_with(|| SampleRateEstimator::new(window_size, window));
        estimator.record(at);
        estimator.estimate()
    }

    pub fn estimate(&self, device_id: &str) -> Option<f64> {
        self.devices.get(device_id).and_then(SampleRateEstimator::estimate)
    }

    /// Combined rate over the given devices.
    pub fn combined<'a>(&self, device_ids: impl IntoIterator<Item = &'a str>) -> CombinedRate {
        let estimates: Vec<Option<f64>> =
            device_ids.into_iter().map(|id| self.estimate(id)).collect();
        CombinedRate::from_estimates(&estimates, self.config.uniform_tolerance)
    }

    pub fn remove(&mut self, device_id: &str) {
        self.devices.remove(device_id);
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new(RateConfig::default())
    }
}
