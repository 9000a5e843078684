//! A failing progress observer must not stall or abort a run.
//!
//! Lives in its own test binary because `#[traced_test]` installs a global
//! subscriber.

use anyhow::{bail, Result};
use gas_mux_daq::acquisition::{AcquisitionEngine, Phase, Progress};
use gas_mux_daq::config::SequencerConfig;
use gas_mux_daq::hardware::mock::{MockAnalyzer, MockSelector};
use gas_mux_daq::preferences::{keys, JsonPreferences, PreferenceStore};
use gas_mux_daq::status::ProgressBroadcaster;
use serde_json::json;
use std::sync::Arc;
use tracing_test::traced_test;

#[tokio::test(start_paused = true)]
#[traced_test]
async fn broken_observer_is_logged_and_others_still_receive_updates() {
    let prefs = JsonPreferences::in_memory(3);
    prefs.set(keys::MEASUREMENT_DURATION, json!(2)).unwrap();
    prefs.set(keys::PAUSE_SECONDS, json!(1)).unwrap();

    let engine = AcquisitionEngine::new(
        Arc::new(MockSelector::new(3)),
        Arc::new(MockAnalyzer::new()),
        Arc::new(prefs),
        SequencerConfig::default(),
    );
    engine.subscribe(Arc::new(|_: &Progress| -> Result<()> {
        bail!("display disconnected")
    }));
    let broadcaster = Arc::new(ProgressBroadcaster::new());
    engine.subscribe(broadcaster.clone());

    engine.start().await.unwrap();
    engine.join().await;

    let snapshot = broadcaster.snapshot();
    assert_eq!(snapshot.progress.phase, Phase::Idle);
    assert_eq!(snapshot.progress.step_index, 3);
    assert!(logs_contain("progress observer failed"));
    assert!(logs_contain("display disconnected"));
    assert!(logs_contain("acquisition run finished"));
}
