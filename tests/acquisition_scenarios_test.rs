//! End-to-end tests for the acquisition sequencer on mock hardware.
//!
//! All tests run on tokio's paused clock, so multi-second runs finish
//! instantly and timing-dependent assertions are deterministic.

use anyhow::Result;
use gas_mux_daq::acquisition::{AcquisitionEngine, Phase, Progress};
use gas_mux_daq::config::SequencerConfig;
use gas_mux_daq::error::AcquisitionError;
use gas_mux_daq::hardware::mock::{MockAnalyzer, MockSelector, RecordingNotifier};
use gas_mux_daq::hardware::Cue;
use gas_mux_daq::measurement::{Component, MeasurementResult, TimestampValue};
use gas_mux_daq::preferences::{keys, JsonPreferences, PreferenceStore};
use gas_mux_daq::storage::CsvRecorderFactory;
use parking_lot::Mutex;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    engine: Arc<AcquisitionEngine>,
    selector: Arc<MockSelector>,
    analyzer: Arc<MockAnalyzer>,
    notifier: Arc<RecordingNotifier>,
    phases: Arc<Mutex<Vec<Phase>>>,
    updates: Arc<Mutex<Vec<Progress>>>,
}

fn harness(measure: u64, pause: u64, repeat: u64, mask: &[bool], log_dir: Option<&Path>) -> Harness {
    let selector = Arc::new(MockSelector::new(mask.len()));
    let analyzer = Arc::new(MockAnalyzer::new());
    let notifier = Arc::new(RecordingNotifier::new());

    let prefs = Arc::new(JsonPreferences::in_memory(mask.len()));
    prefs.set(keys::MEASUREMENT_DURATION, json!(measure)).unwrap();
    prefs.set(keys::PAUSE_SECONDS, json!(pause)).unwrap();
    prefs.set(keys::REPEAT_COUNT, json!(repeat)).unwrap();
    prefs.set(keys::INCLUDE_CHANNELS, json!(mask)).unwrap();

    let mut engine = AcquisitionEngine::new(
        selector.clone(),
        analyzer.clone(),
        prefs,
        SequencerConfig::default(),
    )
    .with_notifier(notifier.clone());
    if let Some(dir) = log_dir {
        engine = engine.with_recorders(Arc::new(CsvRecorderFactory::new(dir)));
    }
    let engine = Arc::new(engine);

    let phases = Arc::new(Mutex::new(Vec::new()));
    let updates = Arc::new(Mutex::new(Vec::new()));
    let (phase_log, update_log) = (phases.clone(), updates.clone());
    engine.subscribe(Arc::new(move |progress: &Progress| -> Result<()> {
        let mut phases = phase_log.lock();
        if phases.last() != Some(&progress.phase) {
            phases.push(progress.phase);
        }
        update_log.lock().push(progress.clone());
        Ok(())
    }));

    Harness {
        engine,
        selector,
        analyzer,
        notifier,
        phases,
        updates,
    }
}

async fn wait_for_phase(engine: &AcquisitionEngine, phase: Phase) {
    while engine.phase() != phase {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn live(ts: i64, components: &[(&str, f64)]) -> MeasurementResult {
    MeasurementResult {
        timestamp: Some(TimestampValue::Integer(ts)),
        components: components
            .iter()
            .map(|(label, ppm)| Component::new(*label, *ppm))
            .collect(),
        phase: Phase::Measuring,
        channel: 1,
        repeat: 0,
    }
}

fn log_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn sparse_mask_visits_phases_in_order() {
    let h = harness(2, 1, 1, &[true, false, true], None);

    h.engine.start().await.unwrap();
    h.engine.join().await;

    assert_eq!(
        *h.phases.lock(),
        vec![
            Phase::Homing,
            Phase::Paused,
            Phase::Measuring,
            Phase::Switching,
            Phase::Paused,
            Phase::Measuring,
            Phase::Switching,
            Phase::Idle,
        ]
    );
    let progress = h.engine.progress();
    assert_eq!(progress.step_index, 2);
    assert_eq!(progress.total_steps, 2);
    // Channel 2 is the last enabled one, so the selector only advances twice.
    assert_eq!(h.selector.next_calls(), 2);
    assert_eq!(h.notifier.count(Cue::Step), 1);
}

#[tokio::test(start_paused = true)]
async fn start_while_running_is_rejected_without_side_effects() {
    let h = harness(2, 1, 1, &[true, true], None);
    h.engine.start().await.unwrap();
    let before = h.engine.progress();

    assert_eq!(h.engine.start().await, Err(AcquisitionError::AlreadyRunning));
    assert_eq!(h.engine.progress(), before);
    assert_eq!(h.analyzer.start_calls(), 1);
    assert_eq!(h.notifier.count(Cue::Busy), 1);

    h.engine.join().await;
    assert_eq!(h.engine.progress().step_index, 2);
    assert_eq!(h.selector.home_calls(), 1);
}

fn slow_analyzer_engine() -> (Arc<AcquisitionEngine>, Arc<MockAnalyzer>, Arc<RecordingNotifier>) {
    let analyzer = Arc::new(MockAnalyzer::new().with_latency(Duration::from_millis(200)));
    let notifier = Arc::new(RecordingNotifier::new());
    let prefs = Arc::new(JsonPreferences::in_memory(2));
    prefs.set(keys::MEASUREMENT_DURATION, json!(2)).unwrap();
    prefs.set(keys::PAUSE_SECONDS, json!(1)).unwrap();
    let engine = AcquisitionEngine::new(
        Arc::new(MockSelector::new(2)),
        analyzer.clone(),
        prefs,
        SequencerConfig::default(),
    )
    .with_notifier(notifier.clone());
    (Arc::new(engine), analyzer, notifier)
}

#[tokio::test(start_paused = true)]
async fn concurrent_starts_yield_exactly_one_run() {
    let (engine, analyzer, notifier) = slow_analyzer_engine();

    let (a, b) = tokio::join!(engine.start(), engine.start());
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|r| **r == Err(AcquisitionError::AlreadyRunning))
            .count(),
        1
    );
    assert_eq!(analyzer.start_calls(), 1);
    assert_eq!(notifier.count(Cue::Busy), 1);

    engine.join().await;
    assert_eq!(engine.phase(), Phase::Idle);
    assert_eq!(engine.progress().step_index, 2);
}

#[tokio::test(start_paused = true)]
async fn stop_during_pending_start_aborts_once_the_worker_runs() {
    let (engine, analyzer, notifier) = slow_analyzer_engine();

    let stopper = {
        let engine = engine.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            engine.stop().await;
            // No worker to join yet, so stop returns while the run is reserved.
            engine.is_running()
        }
    };
    let (started, running_after_stop) = tokio::join!(engine.start(), stopper);
    assert_eq!(started, Ok(()));
    assert!(running_after_stop);

    engine.join().await;
    assert!(!engine.is_running());
    assert_eq!(engine.phase(), Phase::Aborted);
    assert_eq!(engine.progress().step_index, 0);
    assert_eq!(analyzer.stop_calls(), 1);
    assert_eq!(notifier.count(Cue::Cancel), 1);
}

#[tokio::test(start_paused = true)]
async fn abort_during_measurement() {
    let h = harness(30, 1, 2, &[true, true, true], None);
    h.engine.start().await.unwrap();

    wait_for_phase(&h.engine, Phase::Measuring).await;
    let advances = h.selector.next_calls();
    h.engine.stop().await;

    assert!(!h.engine.is_running());
    assert_eq!(h.engine.phase(), Phase::Aborted);
    assert_eq!(h.analyzer.stop_calls(), 1);
    assert_eq!(h.selector.next_calls(), advances);
    assert_eq!(h.engine.progress().step_index, 0);
    assert_eq!(h.notifier.count(Cue::Cancel), 1);
    assert_eq!(h.notifier.count(Cue::Completed), 0);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.selector.next_calls(), advances);
    assert_eq!(h.analyzer.stop_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn abort_latency_is_bounded_by_poll_interval() {
    let h = harness(600, 0, 1, &[true], None);
    h.engine.start().await.unwrap();
    wait_for_phase(&h.engine, Phase::Measuring).await;

    let requested = tokio::time::Instant::now();
    h.engine.stop().await;
    assert!(requested.elapsed() <= Duration::from_millis(200));
    assert_eq!(h.engine.phase(), Phase::Aborted);
}

#[tokio::test(start_paused = true)]
async fn no_enabled_channels_touches_no_hardware() {
    let h = harness(2, 1, 1, &[false, false, false], None);

    assert_eq!(h.engine.start().await, Err(AcquisitionError::NoChannelsEnabled));
    assert!(!h.engine.is_running());
    assert_eq!(h.analyzer.start_calls(), 0);
    assert!(h.analyzer.online_mode_calls().is_empty());
    assert_eq!(h.selector.home_calls(), 0);
    assert_eq!(h.selector.next_calls(), 0);
    assert_eq!(h.notifier.cues(), vec![Cue::InvalidConfig]);
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent() {
    let h = harness(5, 1, 1, &[true, true], None);

    h.engine.stop().await;
    assert_eq!(h.engine.phase(), Phase::Idle);
    assert_eq!(h.analyzer.stop_calls(), 0);

    h.engine.start().await.unwrap();
    wait_for_phase(&h.engine, Phase::Paused).await;
    h.engine.stop().await;
    let once = h.engine.progress();
    h.engine.stop().await;

    assert_eq!(h.engine.progress(), once);
    assert_eq!(once.phase, Phase::Aborted);
    assert_eq!(h.analyzer.stop_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn completed_run_reaches_full_progress() {
    let h = harness(3, 1, 3, &[false, true, true, false, true], None);
    h.engine.start().await.unwrap();
    h.engine.join().await;

    let updates = h.updates.lock();
    let steps: Vec<usize> = updates.iter().map(|p| p.step_index).collect();
    assert!(steps.windows(2).all(|w| w[1] == w[0] || w[1] == w[0] + 1));

    let last_step = updates
        .iter()
        .find(|p| p.step_index == 9)
        .expect("final step published");
    assert_eq!(last_step.percent, 100);
    assert_eq!(last_step.overall_percent, 100);

    for repeat in 0..3 {
        let end_of_repeat = updates
            .iter()
            .find(|p| p.step_index == 3 * (repeat + 1))
            .unwrap();
        assert_eq!(end_of_repeat.percent, 100);
        assert_eq!(end_of_repeat.repeat_index, repeat as u32);
    }

    let final_progress = updates.last().unwrap();
    assert_eq!(final_progress.phase, Phase::Idle);
    assert_eq!(final_progress.step_index, 9);
    assert_eq!(final_progress.eta_seconds, None);
}

#[tokio::test(start_paused = true)]
async fn elapsed_time_tracks_the_estimate() {
    let h = harness(2, 1, 1, &[true, false, true], None);
    h.engine.start().await.unwrap();
    assert_eq!(h.engine.progress().eta_seconds, Some(10));
    h.engine.join().await;

    let longest = h
        .updates
        .lock()
        .iter()
        .filter_map(|p| p.elapsed_seconds)
        .fold(0.0f64, f64::max);
    assert!((longest - 10.0).abs() < 0.5, "elapsed {longest}");
}

#[tokio::test(start_paused = true)]
async fn live_results_are_deduplicated_and_logged_under_a_fixed_header() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(5, 1, 1, &[true, true], Some(dir.path()));
    h.engine.start().await.unwrap();

    assert!(h.engine.on_live_data(&live(1_700_000_000, &[("A", 1.0), ("B", 2.0)])));
    assert!(!h.engine.on_live_data(&live(1_700_000_000, &[("A", 1.0), ("B", 2.0)])));
    assert!(h.engine.on_live_data(&live(1_700_000_025, &[("A", 3.0), ("C", 4.0)])));
    assert!(!h.engine.on_live_data(&live(0, &[])));

    h.engine.join().await;

    let files = log_files(dir.path());
    assert_eq!(files.len(), 1);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(&files[0])
        .unwrap();
    let header: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
    assert_eq!(header, vec!["timestamp", "phase", "channel", "repeat", "A", "B"]);

    let rows: Vec<Vec<String>> = reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][4..], &["1", "2"]);
    assert_eq!(&rows[1][4..], &["3", ""]);
}

#[tokio::test(start_paused = true)]
async fn stale_echo_at_next_run_start_is_not_logged() {
    let h = harness(1, 0, 1, &[true], None);
    h.engine.start().await.unwrap();
    assert!(h.engine.on_live_data(&live(42, &[("A", 1.0)])));
    h.engine.join().await;

    h.engine.start().await.unwrap();
    assert!(!h.engine.on_live_data(&live(42, &[("A", 1.0)])));
    h.engine.join().await;
}
