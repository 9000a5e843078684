//! Custom error types for the application.
//!
//! Two enums cover the crate:
//!
//! - **`AcquisitionError`**: the sequencer's taxonomy. Precondition failures
//!   (`AlreadyRunning`, `NoChannelsEnabled`, `DeviceNotConnected`,
//!   `DeviceStartFailed`) are returned from `start()` before any hardware side
//!   effect survives. `DeviceStopFailed` and `RunLoopFault` are logged by the
//!   worker and never escape it. `InvalidTimestamp` is produced by timestamp
//!   normalisation and silently dropped by the live-data gate.
//! - **`AppError`**: everything around the sequencer, such as configuration
//!   parsing, preference files and the CSV log.
//!
//! The `Display` strings of `AcquisitionError` are the human readable reasons
//! handed back to control-surface callers.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Convenience alias for sequencer operations.
pub type AcquisitionResult<T> = std::result::Result<T, AcquisitionError>;

/// Failures of the acquisition sequencer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    /// `start()` was called while a run is active.
    #[error("Measurement already running")]
    AlreadyRunning,

    /// The include mask has no enabled channel.
    #[error("No channels enabled")]
    NoChannelsEnabled,

    /// The analyzer reports it is offline.
    #[error("Device not connected")]
    DeviceNotConnected,

    /// The analyzer refused or failed the start command.
    #[error("Failed to start measurement on device")]
    DeviceStartFailed,

    /// The analyzer refused or failed the stop command. Non-fatal.
    #[error("Failed to stop measurement on device: {0}")]
    DeviceStopFailed(String),

    /// A measurement timestamp could not be normalised.
    #[error("Invalid measurement timestamp")]
    InvalidTimestamp,

    /// Unexpected failure inside the repeat loop.
    #[error("Run loop fault: {0}")]
    RunLoopFault(String),
}

/// Primary error type for everything outside the sequencer core.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Preference error: {0}")]
    Preferences(String),

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
}

impl From<figment::Error> for AppError {
    fn from(value: figment::Error) -> Self {
        AppError::Config(Box::new(value))
    }
}
