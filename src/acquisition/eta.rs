//! Run duration estimate.

use crate::acquisition::config::RunConfig;

/// Estimated duration of a whole run in seconds.
///
/// Each repeat measures and pauses on every enabled channel and settles once
/// after homing plus once per advance up to the last enabled channel. The
/// trailing second covers the completion hold. Returns 0 when nothing is
/// enabled.
pub fn estimate_total_time_seconds(config: &RunConfig, switch_settle_seconds: u64) -> u64 {
    let Some(last_enabled) = config.last_enabled_index() else {
        return 0;
    };
    let enabled = config.enabled_count() as u64;
    let switches = last_enabled as u64;

    let per_repeat = enabled * config.measure_seconds
        + enabled * config.pause_seconds
        + switch_settle_seconds * (1 + switches);

    u64::from(config.repeat_count) * per_repeat + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(measure: u64, pause: u64, repeat: u32, mask: &[bool]) -> RunConfig {
        RunConfig {
            measure_seconds: measure,
            pause_seconds: pause,
            repeat_count: repeat,
            include_channels: mask.to_vec(),
            save_on_device: false,
        }
    }

    #[test]
    fn sparse_mask() {
        // 2*2 + 2*1 + 1*(1+2) = 9 per repeat
        let cfg = config(2, 1, 1, &[true, false, true]);
        assert_eq!(estimate_total_time_seconds(&cfg, 1), 10);
    }

    #[test]
    fn repeats_multiply_and_trailing_disabled_channels_are_free() {
        let cfg = config(100, 5, 3, &[true, true, false, false]);
        // 2*100 + 2*5 + 1*(1+1) = 212 per repeat
        assert_eq!(estimate_total_time_seconds(&cfg, 1), 3 * 212 + 1);
    }

    #[test]
    fn nothing_enabled() {
        let cfg = config(100, 5, 1, &[false; 4]);
        assert_eq!(estimate_total_time_seconds(&cfg, 1), 0);
    }
}
