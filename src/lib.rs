//! # Gas Mux DAQ Core Library
//!
//! Acquisition sequencer for a multi-channel gas analyzer fed through a cascaded
//! pneumatic multiplexer. The sequencer walks the multiplexer over the enabled
//! channels, has the analyzer measure each one, keeps a duplicate-free log of
//! the results and publishes live progress to displays and streaming clients.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: the sequencer (`AcquisitionEngine`), its phase state
//!   machine, progress model, ETA estimate and duplicate gate.
//! - **`hardware`**: capability traits for the multiplexer, analyzer, buzzer and
//!   GPIO, the cascaded multiplexer driver, and mock devices.
//! - **`status`**: `ProgressBroadcaster`, payload deltas for streaming clients and
//!   the text projection for the status panel.
//! - **`storage`**: the tab-separated measurement log.
//! - **`live`**: background pollers for live results and device status.
//! - **`trigger`** / **`control`**: the physical button and the shared
//!   start/abort surface.
//! - **`preferences`**: user preferences read at run start.
//! - **`config`**, **`logging`**, **`error`**: the ambient stack.

pub mod acquisition;
pub mod config;
pub mod control;
pub mod error;
pub mod hardware;
pub mod live;
pub mod logging;
pub mod measurement;
pub mod preferences;
pub mod status;
pub mod storage;
pub mod trigger;
