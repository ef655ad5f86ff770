pub mod buffer;
pub mod dedup;
pub mod error;
pub mod rate;
pub mod registry;
pub mod subscription;

pub use buffer::{BufferMetrics, TelemetryBuffer};
pub use dedup::DuplicateFilter;
pub use error::TelemetryError;
pub use rate::{CombinedRate, RateConfig, RateTracker, SampleRateEstimator};
pub use registry::{BufferConfig, BufferRegistry, PushReport, RegistryStats};
pub use subscription::{PublishReport, Subscription, SubscriptionHub, SubscriberError};
