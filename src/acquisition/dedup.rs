//! Duplicate result suppression.
//!
//! Between genuine samples the analyzer keeps answering with its previous
//! reading. A result is new only if its normalised timestamp differs from the
//! last one that was logged.

use crate::measurement::{normalize_timestamp, MeasurementResult};

/// Verdict on one live result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DedupOutcome {
    /// Not seen before; carries the normalised timestamp
    New(f64),
    /// Same timestamp as the last logged result
    Duplicate,
    /// No components
    Empty,
    /// Timestamp missing or unparsable
    InvalidTimestamp,
}

/// Last-logged-timestamp gate.
#[derive(Debug, Default, Clone)]
pub struct DuplicateFilter {
    last_logged: Option<f64>,
}

impl DuplicateFilter {
    /// Empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `result`, remembering its timestamp when it is new.
    pub fn accept(&mut self, result: &MeasurementResult) -> DedupOutcome {
        if result.components.is_empty() {
            return DedupOutcome::Empty;
        }
        let Some(ts) = result
            .timestamp
            .as_ref()
            .and_then(|raw| normalize_timestamp(raw).ok())
        else {
            return DedupOutcome::InvalidTimestamp;
        };
        if self.last_logged == Some(ts) {
            return DedupOutcome::Duplicate;
        }
        self.last_logged = Some(ts);
        DedupOutcome::New(ts)
    }

    /// Timestamp of the last accepted result.
    pub fn last_logged(&self) -> Option<f64> {
        self.last_logged
    }
}
