//! Text projection for the 128x64 status panel.

use crate::acquisition::Phase;
use crate::status::StatusSnapshot;

/// Four display lines for `snapshot`.
pub fn render_lines(snapshot: &StatusSnapshot) -> Vec<String> {
    let progress = &snapshot.progress;

    let analyzer = if snapshot.connection {
        "Analyzer: online"
    } else {
        "Analyzer: offline"
    };

    let completed = progress.phase == Phase::Idle
        && progress.total_steps > 0
        && progress.step_index == progress.total_steps;
    let banner = if completed {
        "DONE".to_string()
    } else {
        progress.phase.to_string()
    };

    let position = if progress.total_channels == 0 {
        "Ch -/-  Rep -/-".to_string()
    } else {
        format!(
            "Ch {}/{}  Rep {}/{}",
            progress.current_channel + 1,
            progress.total_channels,
            progress.repeat_index + 1,
            progress.repeat_total
        )
    };

    let remaining = match (progress.eta_seconds, progress.elapsed_seconds) {
        (Some(eta), Some(elapsed)) => {
            Some((eta as f64 - elapsed).max(0.0).round() as u64)
        }
        (Some(eta), None) => Some(eta),
        _ => None,
    };

    vec![
        analyzer.to_string(),
        banner,
        position,
        format!("{:>3}%  ETA {}", progress.overall_percent, format_mmss(remaining)),
    ]
}

/// `mm:ss`, or `--:--` when unknown.
pub fn format_mmss(seconds: Option<u64>) -> String {
    match seconds {
        Some(s) => format!("{:02}:{:02}", s / 60, s % 60),
        None => "--:--".to_string(),
    }
}
