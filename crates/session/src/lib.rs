//! Device session for the gaitwatch telemetry core.
//!
//! [`DeviceSession`] wires the buffer registry, health monitor, rate
//! tracker and subscription hub behind one mutation entry point.
//! [`SessionDriver`] runs it on tokio with the health and maintenance
//! timers.

pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod session;

pub use command::{OperatorCommand, SessionInput};
pub use config::SessionConfig;
pub use driver::SessionDriver;
pub use error::{ConfigError, SessionError};
pub use session::{DeviceSession, IngestOutcome, MaintenanceReport, SessionCounters};
