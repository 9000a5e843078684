//! Hardware collaborators of the acquisition sequencer.
//!
//! - `capabilities`: the trait contracts the sequencer consumes
//! - `mux`: the cascaded pneumatic multiplexer (`ChannelSelector`)
//! - `notifier`: buzzer cue delivery (`NotificationSink`)
//! - `mount`: removable log medium detection (`StorageProbe`)
//! - `mock`: simulated devices for tests and the `simulate` command

pub mod capabilities;
pub mod mock;
pub mod mount;
pub mod mux;
pub mod notifier;

pub use capabilities::{
    AnalyzerGateway, ChannelSelector, GpioLines, InputLine, MuxPosition, NotificationSink,
    StorageProbe,
};
pub use mount::MountPointProbe;
pub use mux::{CascadedMux, MuxTiming, PneumaticMux, WrapPolicy};
pub use notifier::{ChannelNotifier, Cue, LoggingNotifier};
