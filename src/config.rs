//! Configuration System using Figment
//!
//! Strongly-typed settings for the acquisition service. Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/gas_mux_daq.toml` by default)
//! 2. Environment variables (prefixed with `GAS_MUX_DAQ_`, sections split on `__`)
//!
//! Every field carries a default, so a missing file still yields a usable setup.
//!
//! # Example
//! ```no_run
//! use gas_mux_daq::config::Settings;
//!
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("Application: {}", settings.application.name);
//! # Ok::<(), gas_mux_daq::error::AppError>(())
//! ```

use crate::error::{AppError, AppResult};
use crate::hardware::mux::{MuxTiming, WrapPolicy};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/gas_mux_daq.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Sequencer timing
    pub sequencer: SequencerConfig,
    /// Cascaded multiplexer wiring and timing
    pub mux: MuxConfig,
    /// Measurement log output
    pub storage: StorageConfig,
    /// Preference file location
    pub preferences: PreferencesConfig,
    /// Background pollers
    pub live: LiveConfig,
    /// Physical trigger button
    pub trigger: TriggerConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "gas-mux-daq".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Timing of the acquisition sequencer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SequencerConfig {
    /// Granularity of every interruptible wait, in milliseconds.
    ///
    /// Also the interval at which elapsed time is republished during waits.
    pub poll_interval_ms: u64,
    /// Settle wait after homing and after every channel advance.
    pub switch_settle_seconds: u64,
    /// Hold at 100% before finalising a completed run.
    pub completion_hold_seconds: u64,
    /// Upper bound on how long `stop()` waits for the worker.
    pub stop_join_timeout_ms: u64,
    /// Analyzer task identifier passed to the start command.
    pub task_id: String,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            switch_settle_seconds: 1,
            completion_hold_seconds: 1,
            stop_join_timeout_ms: 2000,
            task_id: "default".to_string(),
        }
    }
}

impl SequencerConfig {
    /// Poll granularity as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Bounded join timeout used by `stop()`.
    pub fn stop_join_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_join_timeout_ms)
    }
}

/// Wiring and timing of the two cascaded pneumatic multiplexers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MuxConfig {
    /// Inputs per multiplexer stage
    pub stage_channels: usize,
    /// Pulse width on the home/next lines
    pub pulse_ms: u64,
    /// Settle time after a step pulse
    pub settle_ms: u64,
    /// Settle time after a home pulse
    pub home_settle_ms: u64,
    /// Behaviour when both stages reach their last input
    pub wrap_policy: WrapPolicy,
    /// Home line of the first stage
    pub first_home_pin: String,
    /// Step line of the first stage
    pub first_next_pin: String,
    /// Home line of the second stage
    pub second_home_pin: String,
    /// Step line of the second stage
    pub second_next_pin: String,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            stage_channels: 16,
            pulse_ms: 6,
            settle_ms: 30,
            home_settle_ms: 50,
            wrap_policy: WrapPolicy::default(),
            first_home_pin: "OC1".to_string(),
            first_next_pin: "OC2".to_string(),
            second_home_pin: "OC3".to_string(),
            second_next_pin: "OC4".to_string(),
        }
    }
}

impl MuxConfig {
    /// Number of virtual channels exposed by the cascade.
    pub fn total_channels(&self) -> usize {
        (self.stage_channels * 2).saturating_sub(1)
    }

    /// Pulse timing shared by both stages.
    pub fn timing(&self) -> MuxTiming {
        MuxTiming {
            pulse: Duration::from_millis(self.pulse_ms),
            settle: Duration::from_millis(self.settle_ms),
            home_settle: Duration::from_millis(self.home_settle_ms),
        }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Output directory for measurement logs
    pub log_dir: PathBuf,
    /// Removable media mount point; when set, its presence in the mount
    /// table is reported in the status snapshot
    pub mount_point: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("data/logs"),
            mount_point: None,
        }
    }
}

/// Preference store location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreferencesConfig {
    /// JSON preference file
    pub path: PathBuf,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config/user_prefs.json"),
        }
    }
}

/// Background poller intervals
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LiveConfig {
    /// How often the analyzer's latest result is fetched during a run
    pub result_poll_seconds: u64,
    /// How often connection and storage state are refreshed
    pub status_poll_seconds: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            result_poll_seconds: 25,
            status_poll_seconds: 5,
        }
    }
}

/// Physical trigger button timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TriggerConfig {
    /// Sampling interval
    pub poll_ms: u64,
    /// A level must stay stable this long to count as an edge
    pub debounce_ms: u64,
    /// Presses at least this long abort instead of start
    pub long_press_ms: u64,
    /// Edges are ignored for this long after an action
    pub cooldown_ms: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            poll_ms: 250,
            debounce_ms: 750,
            long_press_ms: 4000,
            cooldown_ms: 2000,
        }
    }
}

impl Settings {
    /// Load configuration from the default file and environment variables
    ///
    /// Environment variables can override configuration with prefix `GAS_MUX_DAQ_`.
    /// Example: `GAS_MUX_DAQ_SEQUENCER__POLL_INTERVAL_MS=50`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GAS_MUX_DAQ_").split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Effective configuration rendered as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| AppError::Configuration(e.to_string()))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level = self.application.log_level.to_lowercase();
        if !valid_levels.contains(&level.as_str()) {
            return Err(AppError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(AppError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.sequencer.poll_interval_ms == 0 || self.sequencer.poll_interval_ms > 1000 {
            return Err(AppError::Configuration(format!(
                "Invalid poll_interval_ms {}. Must be 1-1000",
                self.sequencer.poll_interval_ms
            )));
        }

        if self.sequencer.stop_join_timeout_ms == 0 {
            return Err(AppError::Configuration(
                "stop_join_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.mux.stage_channels == 0 {
            return Err(AppError::Configuration(
                "mux.stage_channels must be greater than zero".to_string(),
            ));
        }

        if self.trigger.long_press_ms <= self.trigger.debounce_ms {
            return Err(AppError::Configuration(format!(
                "trigger.long_press_ms ({}) must exceed debounce_ms ({})",
                self.trigger.long_press_ms, self.trigger.debounce_ms
            )));
        }

        Ok(())
    }
}
