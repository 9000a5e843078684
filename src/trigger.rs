//! Physical trigger button.
//!
//! The button is wired active-low: the line reads high while released. A short
//! press starts a run, a press held for at least `long_press` aborts it.
//!
//! [`PressClassifier`] is the pure debounce and press-length state machine.
//! [`TriggerMonitor`] samples an [`InputLine`], feeds the classifier and
//! applies the resulting intents through the shared control surface.

use crate::acquisition::AcquisitionEngine;
use crate::config::TriggerConfig;
use crate::control::{apply_intent, ControlIntent};
use crate::hardware::capabilities::InputLine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Debounce, press-length and cooldown thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerTiming {
    /// A new level must hold this long before it counts
    pub debounce: Duration,
    /// Presses at least this long abort
    pub long_press: Duration,
    /// Edges are ignored for this long after an action
    pub cooldown: Duration,
}

impl From<&TriggerConfig> for TriggerTiming {
    fn from(config: &TriggerConfig) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            long_press: Duration::from_millis(config.long_press_ms),
            cooldown: Duration::from_millis(config.cooldown_ms),
        }
    }
}

/// Turns raw line samples into start/abort intents.
#[derive(Debug)]
pub struct PressClassifier {
    timing: TriggerTiming,
    stable_high: bool,
    last_stable_at: Instant,
    pressed_at: Option<Instant>,
    last_action_at: Option<Instant>,
}

impl PressClassifier {
    /// Classifier starting with the button released at `now`.
    pub fn new(timing: TriggerTiming, now: Instant) -> Self {
        Self {
            timing,
            stable_high: true,
            last_stable_at: now,
            pressed_at: None,
            last_action_at: None,
        }
    }

    /// Feed one sample; `high` is the raw line level.
    pub fn feed(&mut self, high: bool, now: Instant) -> Option<ControlIntent> {
        if high == self.stable_high {
            self.last_stable_at = now;
            return None;
        }
        if now.duration_since(self.last_stable_at) < self.timing.debounce {
            return None;
        }

        self.stable_high = high;
        self.last_stable_at = now;
        self.on_edge(high, now)
    }

    fn on_edge(&mut self, high: bool, now: Instant) -> Option<ControlIntent> {
        if let Some(last) = self.last_action_at {
            if now.duration_since(last) < self.timing.cooldown {
                debug!("trigger edge ignored during cooldown");
                return None;
            }
        }

        if !high {
            debug!("trigger pressed");
            self.pressed_at = Some(now);
            return None;
        }

        let pressed_at = self.pressed_at.take()?;
        self.last_action_at = Some(now);
        if now.duration_since(pressed_at) >= self.timing.long_press {
            Some(ControlIntent::Abort)
        } else {
            Some(ControlIntent::Start)
        }
    }
}

/// Samples the trigger line and drives the engine.
pub struct TriggerMonitor {
    engine: Arc<AcquisitionEngine>,
    input: Arc<dyn InputLine>,
    timing: TriggerTiming,
    poll: Duration,
}

impl TriggerMonitor {
    /// Monitor built from configuration.
    pub fn new(engine: Arc<AcquisitionEngine>, input: Arc<dyn InputLine>, config: &TriggerConfig) -> Self {
        Self {
            engine,
            input,
            timing: TriggerTiming::from(config),
            poll: Duration::from_millis(config.poll_ms.max(1)),
        }
    }

    /// Apply one classified intent.
    pub async fn handle(&self, intent: ControlIntent) {
        match intent {
            ControlIntent::Start if self.engine.is_running() => {
                info!("short press ignored, measurement already running");
            }
            ControlIntent::Abort if !self.engine.is_running() => {
                info!("long press ignored, no active measurement");
            }
            _ => {
                info!(?intent, "trigger press");
                let response = apply_intent(&self.engine, intent).await;
                if !response.ok {
                    warn!(reason = %response.message, "trigger intent refused");
                }
            }
        }
    }

    /// Sample until `shutdown` is raised.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        info!(poll_ms = self.poll.as_millis() as u64, "trigger monitoring started");
        let mut classifier = PressClassifier::new(self.timing, Instant::now());
        let mut ticker = interval(self.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            let high = match self.input.read() {
                Ok(level) => level,
                Err(e) => {
                    warn!(error = %e, "trigger line read failed");
                    continue;
                }
            };
            if let Some(intent) = classifier.feed(high, Instant::now()) {
                self.handle(intent).await;
            }
        }
        info!("trigger monitoring stopped");
    }
}
