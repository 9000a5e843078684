//! Acquisition sequencing.
//!
//! - `config`: the per-run configuration snapshot
//! - `phase` / `progress`: the state machine and its published view
//! - `eta`: run duration estimate
//! - `dedup`: live result duplicate gate
//! - `engine`: the sequencer tying them together

pub mod config;
pub mod dedup;
pub mod engine;
pub mod eta;
pub mod phase;
pub mod progress;

pub use config::RunConfig;
pub use dedup::{DedupOutcome, DuplicateFilter};
pub use engine::{AcquisitionEngine, ProgressObserver, RunExit};
pub use eta::estimate_total_time_seconds;
pub use phase::Phase;
pub use progress::Progress;
