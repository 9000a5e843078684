//! Measurement log output.
//!
//! The engine owns at most one [`MeasurementRecorder`] per run. It obtains it
//! from a [`RecorderFactory`] at start and closes it during finalisation.

mod csv_logger;

pub use csv_logger::{CsvMeasurementLogger, CsvRecorderFactory, FIXED_COLUMNS};

use crate::error::AppResult;
use crate::measurement::MeasurementResult;
use std::path::Path;

/// Sink for accepted (non-duplicate) measurements of one run.
pub trait MeasurementRecorder: Send {
    /// Append one row.
    fn record(&mut self, result: &MeasurementResult) -> AppResult<()>;

    /// Flush and release the underlying resource.
    fn close(&mut self) -> AppResult<()>;

    /// Backing file, if any.
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// Opens a fresh recorder for each run.
pub trait RecorderFactory: Send + Sync {
    /// Create the recorder for a run that is about to start.
    fn open(&self) -> AppResult<Box<dyn MeasurementRecorder>>;
}
