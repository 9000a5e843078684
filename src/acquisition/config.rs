//! Per-run configuration snapshot.

use crate::error::{AcquisitionError, AcquisitionResult};
use crate::preferences::{
    keys, PreferenceStore, DEFAULT_MEASUREMENT_DURATION, DEFAULT_PAUSE_SECONDS,
    DEFAULT_REPEAT_COUNT,
};
use serde::{Deserialize, Serialize};

/// Immutable configuration of one run, read from preferences at `start()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Measurement time per enabled channel
    pub measure_seconds: u64,
    /// Pause before each measurement
    pub pause_seconds: u64,
    /// Passes over the enabled channels, at least 1
    pub repeat_count: u32,
    /// One entry per virtual channel
    pub include_channels: Vec<bool>,
    /// Results stay on the analyzer instead of being streamed
    pub save_on_device: bool,
}

impl RunConfig {
    /// Snapshot the current preferences for a selector with `total_channels` channels.
    ///
    /// The include mask is padded with `false` or truncated to `total_channels`.
    /// A repeat count of zero is raised to one.
    pub fn from_preferences(store: &dyn PreferenceStore, total_channels: usize) -> Self {
        let mut include_channels = store
            .get_bool_list(keys::INCLUDE_CHANNELS)
            .unwrap_or_else(|| vec![true; total_channels]);
        include_channels.resize(total_channels, false);

        let repeat_count = store
            .get_u64(keys::REPEAT_COUNT, DEFAULT_REPEAT_COUNT)
            .clamp(1, u64::from(u32::MAX)) as u32;

        Self {
            measure_seconds: store.get_u64(keys::MEASUREMENT_DURATION, DEFAULT_MEASUREMENT_DURATION),
            pause_seconds: store.get_u64(keys::PAUSE_SECONDS, DEFAULT_PAUSE_SECONDS),
            repeat_count,
            include_channels,
            save_on_device: store.get_bool(keys::SAVE_ON_DEVICE, false),
        }
    }

    /// Number of virtual channels the run walks through.
    pub fn total_channels(&self) -> usize {
        self.include_channels.len()
    }

    /// Number of channels that get measured per repeat.
    pub fn enabled_count(&self) -> usize {
        self.include_channels.iter().filter(|enabled| **enabled).count()
    }

    /// Whether `channel` is measured.
    pub fn is_enabled(&self, channel: usize) -> bool {
        self.include_channels.get(channel).copied().unwrap_or(false)
    }

    /// Index of the last enabled channel.
    pub fn last_enabled_index(&self) -> Option<usize> {
        self.include_channels.iter().rposition(|enabled| *enabled)
    }

    /// Measurements in the whole run.
    pub fn total_steps(&self) -> usize {
        self.repeat_count as usize * self.enabled_count()
    }

    /// Reject configurations with nothing to measure.
    pub fn validate(&self) -> AcquisitionResult<()> {
        if self.enabled_count() == 0 {
            return Err(AcquisitionError::NoChannelsEnabled);
        }
        Ok(())
    }
}
