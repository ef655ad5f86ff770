use std::time::Duration;

/// Heartbeat silence after which a transport-connected device is degraded.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sample silence after which data is considered stale.
pub const DEFAULT_DATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Inactivity after which an unconnected, non-expected device is forgotten.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Period of the health reclassification sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Period of the idle-device cleanup and memory-pressure check.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Default age, in device time, beyond which buffered samples are dropped.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Default per-device buffer capacity: 60 s of history at 100 Hz.
pub const DEFAULT_DEVICE_CAPACITY: usize = 6000;

/// Default global memory budget across all buffers (16 MiB).
pub const DEFAULT_MAX_MEMORY_BYTES: usize = 16 * 1024 * 1024;

/// Default number of devices that may be registered at once.
pub const DEFAULT_MAX_DEVICES: usize = 8;

/// Largest plausible reading from a force resistor channel (`r1`..`r3`).
pub const MAX_FORCE: f32 = 1000.0;

/// Largest plausible acceleration reading in g (`x`, `y`, `z`).
pub const MAX_ACCELERATION: f32 = 50.0;
