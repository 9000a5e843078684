//! Audible cue delivery.
//!
//! The sequencer announces milestones with short buzzer cues. Delivery must
//! never stall the worker, so sinks either log or `try_send` onto a bounded
//! queue drained by whatever drives the buzzer.

use crate::hardware::capabilities::NotificationSink;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Named buzzer cue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cue {
    /// Service start
    PowerOn,
    /// Run accepted
    Started,
    /// Start rejected because a run is active
    Busy,
    /// Start rejected because the configuration is unusable
    InvalidConfig,
    /// Analyzer offline or refused a command
    DeviceError,
    /// Multiplexer homing
    Home,
    /// Advance after a measured channel
    Step,
    /// Pause before a measurement
    Pause,
    /// Run aborted
    Cancel,
    /// Run completed
    Completed,
}

impl Cue {
    /// Stable name used by buzzer pattern tables.
    pub fn name(&self) -> &'static str {
        match self {
            Cue::PowerOn => "power_on",
            Cue::Started => "started",
            Cue::Busy => "busy",
            Cue::InvalidConfig => "invalid",
            Cue::DeviceError => "error",
            Cue::Home => "home",
            Cue::Step => "step",
            Cue::Pause => "paused",
            Cue::Cancel => "cancel",
            Cue::Completed => "completed",
        }
    }
}

impl std::fmt::Display for Cue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Sink that only records cues in the log.
#[derive(Debug, Default, Clone)]
pub struct LoggingNotifier;

impl NotificationSink for LoggingNotifier {
    fn play(&self, cue: Cue) {
        debug!(cue = %cue, "buzzer cue");
    }
}

/// Sink that forwards cues to a bounded queue.
///
/// Cues are dropped when the queue is full or the receiver is gone, and
/// suppressed entirely while the shared `enabled` flag is false.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Cue>,
    enabled: Arc<AtomicBool>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiving end of its queue.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Cue>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let notifier = Self {
            tx,
            enabled: Arc::new(AtomicBool::new(true)),
        };
        (notifier, rx)
    }

    /// Share an externally owned enable flag (the buzzer preference).
    pub fn with_enabled(mut self, enabled: Arc<AtomicBool>) -> Self {
        self.enabled = enabled;
        self
    }

    /// Handle to the enable flag.
    pub fn enabled_flag(&self) -> Arc<AtomicBool> {
        self.enabled.clone()
    }
}

impl NotificationSink for ChannelNotifier {
    fn play(&self, cue: Cue) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        if let Err(e) = self.tx.try_send(cue) {
            trace!(cue = %cue, error = %e, "buzzer cue dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (notifier, mut rx) = ChannelNotifier::new(1);
        notifier.play(Cue::Started);
        notifier.play(Cue::Home);

        assert_eq!(rx.try_recv().ok(), Some(Cue::Started));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disabled_flag_suppresses_cues() {
        let flag = Arc::new(AtomicBool::new(false));
        let (notifier, mut rx) = ChannelNotifier::new(4);
        let notifier = notifier.with_enabled(flag.clone());

        notifier.play(Cue::Step);
        assert!(rx.try_recv().is_err());

        flag.store(true, Ordering::Relaxed);
        notifier.play(Cue::Step);
        assert_eq!(rx.try_recv().ok(), Some(Cue::Step));
    }

    #[test]
    fn closed_receiver_is_ignored() {
        let (notifier, rx) = ChannelNotifier::new(1);
        drop(rx);
        notifier.play(Cue::Cancel);
    }
}
