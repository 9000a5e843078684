//! Cascaded pneumatic multiplexer.
//!
//! Two identical multiplexers are chained: the last input of the first stage is
//! fed by the output of the second stage. Each stage has two control lines:
//! a *home* pulse returns it to input 0, a *next* pulse advances it by one.
//!
//! ```text
//! virtual 0 ..= m1-2      first stage at virtual, second stage at 0
//! virtual m1-1 ..= total  first stage parked at m1-1, second stage at virtual-(m1-1)
//! ```
//!
//! With two 16-input stages this yields 31 virtual channels.
//!
//! What happens after the very last channel is not settled for the hardware
//! in the field, so that decision lives in [`WrapPolicy`] and nowhere else.

use crate::hardware::capabilities::{ChannelSelector, GpioLines, MuxPosition};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info};

/// Pulse and settle times for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxTiming {
    /// Width of the control pulse
    pub pulse: Duration,
    /// Wait after a step pulse
    pub settle: Duration,
    /// Wait after a home pulse
    pub home_settle: Duration,
}

impl Default for MuxTiming {
    fn default() -> Self {
        Self {
            pulse: Duration::from_millis(6),
            settle: Duration::from_millis(30),
            home_settle: Duration::from_millis(50),
        }
    }
}

/// Behaviour when both stages sit on their last input and another step is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapPolicy {
    /// Home both stages; the selector is back on virtual channel 0.
    #[default]
    HomeOnly,
    /// Home both stages, then step the first stage once.
    ///
    /// Leaves the first stage on input 1 while the virtual index reads 0.
    HomeThenAdvanceFirst,
}

/// Single multiplexer stage.
pub struct PneumaticMux {
    name: String,
    home_pin: String,
    next_pin: String,
    timing: MuxTiming,
    max_channels: usize,
    position: AtomicUsize,
    gpio: Arc<dyn GpioLines>,
}

impl PneumaticMux {
    /// Create a stage driven through `gpio`.
    pub fn new(
        name: impl Into<String>,
        home_pin: impl Into<String>,
        next_pin: impl Into<String>,
        timing: MuxTiming,
        max_channels: usize,
        gpio: Arc<dyn GpioLines>,
    ) -> Self {
        Self {
            name: name.into(),
            home_pin: home_pin.into(),
            next_pin: next_pin.into(),
            timing,
            max_channels: max_channels.max(1),
            position: AtomicUsize::new(0),
            gpio,
        }
    }

    /// Selected input.
    pub fn position(&self) -> usize {
        self.position.load(Ordering::SeqCst)
    }

    /// Number of inputs.
    pub fn max_channels(&self) -> usize {
        self.max_channels
    }

    /// Whether the stage sits on its last input.
    pub fn at_end(&self) -> bool {
        self.position() + 1 >= self.max_channels
    }

    async fn pulse(&self, pin: &str) -> Result<()> {
        self.gpio.set(pin).await?;
        sleep(self.timing.pulse).await;
        self.gpio.reset(pin).await
    }

    /// Return to input 0.
    pub async fn home(&self) -> Result<usize> {
        self.pulse(&self.home_pin).await?;
        sleep(self.timing.home_settle).await;
        self.position.store(0, Ordering::SeqCst);
        debug!(mux = %self.name, "homed");
        Ok(0)
    }

    /// Advance one input, homing instead when already on the last one.
    pub async fn select_next(&self) -> Result<usize> {
        if self.at_end() {
            return self.home().await;
        }
        self.pulse(&self.next_pin).await?;
        sleep(self.timing.settle).await;
        let next = self.position.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(next)
    }
}

/// Two stages presented as one linear channel sequence.
pub struct CascadedMux {
    first: PneumaticMux,
    second: PneumaticMux,
    wrap_policy: WrapPolicy,
    virtual_index: AtomicUsize,
    // Serialises home/step sequences; position reads stay lock-free.
    op_lock: Mutex<()>,
}

impl CascadedMux {
    /// Chain `first` (fed by `second` on its last input) with the given wrap policy.
    pub fn new(first: PneumaticMux, second: PneumaticMux, wrap_policy: WrapPolicy) -> Self {
        info!(
            first_channels = first.max_channels(),
            second_channels = second.max_channels(),
            ?wrap_policy,
            "cascaded multiplexer built"
        );
        Self {
            first,
            second,
            wrap_policy,
            virtual_index: AtomicUsize::new(0),
            op_lock: Mutex::new(()),
        }
    }

    /// Build both stages from configuration.
    pub fn from_config(config: &crate::config::MuxConfig, gpio: Arc<dyn GpioLines>) -> Self {
        let timing = config.timing();
        let first = PneumaticMux::new(
            "MUX1",
            &config.first_home_pin,
            &config.first_next_pin,
            timing,
            config.stage_channels,
            gpio.clone(),
        );
        let second = PneumaticMux::new(
            "MUX2",
            &config.second_home_pin,
            &config.second_next_pin,
            timing,
            config.stage_channels,
            gpio,
        );
        Self::new(first, second, config.wrap_policy)
    }

    async fn home_both(&self) -> Result<()> {
        self.first.home().await?;
        self.second.home().await?;
        self.virtual_index.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Move past the last channel of the cascade.
    async fn wrap_around(&self) -> Result<()> {
        self.home_both().await?;
        match self.wrap_policy {
            WrapPolicy::HomeOnly => {}
            WrapPolicy::HomeThenAdvanceFirst => {
                self.first.select_next().await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelSelector for CascadedMux {
    async fn home(&self) -> Result<usize> {
        let _guard = self.op_lock.lock().await;
        info!("homing both multiplexers");
        self.home_both().await?;
        Ok(0)
    }

    async fn select_next(&self) -> Result<usize> {
        let _guard = self.op_lock.lock().await;
        let current = self.virtual_index.load(Ordering::SeqCst);
        let total = self.total_channels();

        if current + 1 < self.first.max_channels() {
            self.first.select_next().await?;
        } else if !self.second.at_end() {
            self.second.select_next().await?;
        } else {
            self.wrap_around().await?;
        }

        let next = (current + 1) % total;
        self.virtual_index.store(next, Ordering::SeqCst);
        info!(
            virtual_index = next,
            first = self.first.position(),
            second = self.second.position(),
            "multiplexer advanced"
        );
        Ok(next)
    }

    fn position(&self) -> MuxPosition {
        MuxPosition {
            virtual_index: self.virtual_index.load(Ordering::SeqCst),
            first: self.first.position(),
            second: self.second.position(),
        }
    }

    fn total_channels(&self) -> usize {
        self.first.max_channels() + self.second.max_channels() - 1
    }
}
