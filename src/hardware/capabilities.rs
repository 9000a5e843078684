//! Hardware Capabilities
//!
//! This module defines the capability traits the acquisition sequencer consumes.
//! Each collaborator is reduced to the small contract the sequencer actually needs:
//!
//! - The cascaded multiplexer is a `ChannelSelector`
//! - The gas analyzer is an `AnalyzerGateway`
//! - The buzzer is a `NotificationSink`
//! - GPIO output lines are `GpioLines`, the trigger button is an `InputLine`
//! - The removable log medium is a `StorageProbe`
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async where the operation touches hardware (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Takes `&self`; implementations use interior mutability for state
//!
//! # Example
//!
//! ```rust,ignore
//! async fn measure_first_channel<S, A>(selector: &S, analyzer: &A) -> Result<()>
//! where
//!     S: ChannelSelector,
//!     A: AnalyzerGateway,
//! {
//!     selector.home().await?;
//!     if !analyzer.start_measurement("default").await? {
//!         anyhow::bail!("analyzer refused to start");
//!     }
//!     Ok(())
//! }
//! ```

use crate::hardware::notifier::Cue;
use crate::measurement::AnalyzerReading;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Diagnostic position of the cascaded multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxPosition {
    /// Linear virtual channel index
    pub virtual_index: usize,
    /// Physical input selected on the first stage
    pub first: usize,
    /// Physical input selected on the second stage
    pub second: usize,
}

/// Capability: Channel Selection
///
/// A linear sequence of virtual channels, however many physical stages sit
/// behind it.
///
/// # Contract
/// - `home()` returns to virtual channel 0 and returns that index
/// - `select_next()` advances exactly one virtual channel and returns the new index;
///   wrap-around and stage cascading are handled internally
/// - `position()` never touches hardware
#[async_trait]
pub trait ChannelSelector: Send + Sync {
    /// Return to the first channel.
    async fn home(&self) -> Result<usize>;

    /// Advance one channel.
    async fn select_next(&self) -> Result<usize>;

    /// Current position snapshot for diagnostics.
    fn position(&self) -> MuxPosition;

    /// Number of virtual channels.
    fn total_channels(&self) -> usize;
}

/// Capability: Gas Analyzer
///
/// # Contract
/// - `start_measurement` / `stop_measurement` return `Ok(false)` when the device
///   answered but refused, `Err` when it could not be reached
/// - `set_online_mode` returns the device's raw acknowledgement
/// - `poll_latest_result` returns the most recent reading; devices repeat the
///   previous reading until a new sample exists
#[async_trait]
pub trait AnalyzerGateway: Send + Sync {
    /// Whether the analyzer is reachable.
    async fn is_connected(&self) -> bool;

    /// Start the given measurement task.
    async fn start_measurement(&self, task_id: &str) -> Result<bool>;

    /// Stop the current measurement task.
    async fn stop_measurement(&self) -> Result<bool>;

    /// Toggle streaming of results instead of saving them on the device.
    async fn set_online_mode(&self, enabled: bool) -> Result<String>;

    /// Latest reading, if the device has one.
    async fn poll_latest_result(&self) -> Result<Option<AnalyzerReading>>;
}

/// Capability: Audible Cues
///
/// `play` is fire-and-forget and must return immediately.
pub trait NotificationSink: Send + Sync {
    /// Queue a cue for playback.
    fn play(&self, cue: Cue);
}

/// Capability: Digital Output Lines
#[async_trait]
pub trait GpioLines: Send + Sync {
    /// Drive a line high.
    async fn set(&self, pin: &str) -> Result<()>;

    /// Drive a line low.
    async fn reset(&self, pin: &str) -> Result<()>;
}

/// Capability: Digital Input Line
pub trait InputLine: Send + Sync {
    /// Sample the line; `true` is high.
    fn read(&self) -> Result<bool>;
}

/// Capability: Removable Storage
pub trait StorageProbe: Send + Sync {
    /// Whether the log medium is mounted.
    fn is_mounted(&self) -> Result<bool>;
}
