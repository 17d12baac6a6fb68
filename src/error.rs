//! Error types for the LED wall core.
//!
//! Addressing and frame-buffer writes never fail (out-of-range writes are
//! dropped), so nothing here covers them. What can fail is the hardware
//! boundary, the button inputs, the pattern lifecycle, and config loading.

use std::path::PathBuf;
use std::time::Duration;

/// Raw failure reported by an LED strip driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The device is claimed by someone else (another process, a stale handle).
    #[error("LED device busy: {0}")]
    Busy(String),
    /// The device could not be opened at all.
    #[error("LED device unavailable: {0}")]
    Unavailable(String),
    /// Emitting a frame over the data line failed.
    #[error("failed to render frame: {0}")]
    Render(String),
}

/// Fatal hardware failure, surfaced to the process entry point.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("could not acquire LED strip after {attempts} attempts: {source}")]
    Acquisition {
        attempts: u32,
        #[source]
        source: DriverError,
    },
    #[error("could not set up button input: {0}")]
    Input(#[from] InputError),
}

/// Errors from the [`DeviceSink`](crate::sink::DeviceSink).
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The hardware handle was already released by `shutdown`.
    #[error("LED strip already released")]
    Released,
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Errors from the digital input boundary.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("failed to configure pin {pin}: {reason}")]
    Configure { pin: u8, reason: String },
    #[error("failed to read pin {pin}: {reason}")]
    Read { pin: u8, reason: String },
}

/// Errors from the lifecycle [`Controller`](crate::controller::Controller).
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// The previous pattern ignored its stop flag for longer than the bound.
    /// The controller is now degraded.
    #[error("pattern '{pattern}' did not stop within {waited:?}; display abandoned")]
    PreemptionTimeout { pattern: String, waited: Duration },
    /// A pattern was abandoned earlier and still owns the display.
    #[error("controller degraded: pattern '{pattern}' still owns the display")]
    Degraded { pattern: String },
    /// A pattern thread died without handing the display back. The strip was
    /// released when the display dropped.
    #[error("display lost: a pattern exited without returning it")]
    DisplayLost,
    /// `reset` was called but the abandoned pattern still has not exited.
    #[error("abandoned pattern '{pattern}' is still running")]
    StillRunning { pattern: String },
}

/// Errors while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
