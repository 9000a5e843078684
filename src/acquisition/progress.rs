//! Run progress model.
//!
//! `Progress` is owned by the engine and handed to everyone else as a copy.
//! Percentages are integer and floor-rounded, so they reach 100 exactly when
//! the last step is recorded.

use crate::acquisition::config::RunConfig;
use crate::acquisition::phase::Phase;
use serde::{Deserialize, Serialize};

/// Snapshot of where the sequencer is.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Progress {
    /// State machine phase
    pub phase: Phase,
    /// 0-based virtual channel being visited
    pub current_channel: usize,
    /// Virtual channels walked per repeat
    pub total_channels: usize,
    /// Following virtual channel, `None` on the last one
    pub next_channel: Option<usize>,
    /// Completion of the current repeat
    pub percent: u32,
    /// Completion of the whole run
    pub overall_percent: u32,
    /// 0-based repeat index
    pub repeat_index: u32,
    /// Repeats in the run
    pub repeat_total: u32,
    /// Enabled channels per repeat
    pub enabled_count: usize,
    /// Completed measurements across the run
    pub step_index: usize,
    /// `repeat_total * enabled_count`
    pub total_steps: usize,
    /// Seconds since the run started
    pub elapsed_seconds: Option<f64>,
    /// Estimated run duration, fixed at start
    pub eta_seconds: Option<u64>,
}

impl Progress {
    /// Fresh progress for a run about to start.
    pub fn for_run(config: &RunConfig, eta_seconds: u64) -> Self {
        Self {
            phase: Phase::Idle,
            total_channels: config.total_channels(),
            repeat_total: config.repeat_count,
            enabled_count: config.enabled_count(),
            total_steps: config.total_steps(),
            elapsed_seconds: Some(0.0),
            eta_seconds: Some(eta_seconds),
            ..Self::default()
        }
    }

    /// Reset per-repeat counters.
    pub fn begin_repeat(&mut self, repeat_index: u32) {
        self.repeat_index = repeat_index;
        self.percent = 0;
        self.current_channel = 0;
        self.next_channel = None;
    }

    /// Move to `channel` of a run with `total_channels` channels.
    pub fn visit_channel(&mut self, channel: usize, total_channels: usize) {
        self.current_channel = channel;
        self.next_channel = (channel + 1 < total_channels).then_some(channel + 1);
    }

    /// Account for one completed measurement.
    ///
    /// `processed` is the number of measurements finished in this repeat,
    /// including the one being recorded.
    pub fn record_measurement(&mut self, processed: usize) {
        self.step_index += 1;
        self.percent = percent_of(processed, self.enabled_count);
        self.overall_percent = percent_of(self.step_index, self.total_steps);
    }

    /// Drop the timing fields once a run is over.
    pub fn clear_timing(&mut self) {
        self.elapsed_seconds = None;
        self.eta_seconds = None;
    }
}

/// `done / total` as a floor-rounded percentage, 0 when `total` is 0.
pub fn percent_of(done: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((done.min(total) * 100) / total) as u32
}
