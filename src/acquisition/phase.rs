//! Sequencer phase.

use serde::{Deserialize, Serialize};

/// Current state of the acquisition state machine.
///
/// # State Machine
///
/// ```text
///          start()
/// Idle ─────────────> Homing ──> Paused ──> Measuring ──> Switching ─┐
///  ▲                    ▲          ▲                          │       │
///  │                    │          └──────────(next channel)──┘       │
///  │                    └───────────────(next repeat)─────────────────┤
///  │                                                                  │
///  └──────(all repeats done)─────────────────────────────────────────┘
///
/// any waiting phase ──stop()/fault──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// No run active, or the last run completed
    #[default]
    Idle,
    /// Returning the multiplexer to channel 0
    Homing,
    /// Flushing the line before a measurement
    Paused,
    /// Analyzer sampling the current channel
    Measuring,
    /// Advancing the multiplexer
    Switching,
    /// The last run was cancelled or faulted
    Aborted,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "IDLE",
            Phase::Homing => "HOMING",
            Phase::Paused => "PAUSED",
            Phase::Measuring => "MEASURING",
            Phase::Switching => "SWITCHING",
            Phase::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_upper_case() {
        assert_eq!(serde_json::to_string(&Phase::Measuring).unwrap(), "\"MEASURING\"");
        let parsed: Phase = serde_json::from_str("\"ABORTED\"").unwrap();
        assert_eq!(parsed, Phase::Aborted);
    }

    #[test]
    fn display_matches_wire_name() {
        for phase in [Phase::Idle, Phase::Homing, Phase::Switching] {
            let wire = serde_json::to_string(&phase).unwrap();
            assert_eq!(wire.trim_matches('"'), phase.to_string());
        }
    }
}
