//! CLI Entry Point for gas-mux-daq
//!
//! Provides command-line access to:
//! - A full simulated acquisition run on mock hardware
//! - The duration estimate for the current preferences
//! - The merged preference set and the effective configuration
//!
//! # Usage
//!
//! Simulate a short run over channels 1, 3 and 4:
//! ```bash
//! gas-mux-daq simulate --measure 5 --pause 1 --repeat 2 --channels 1011
//! ```
//!
//! Print the estimate:
//! ```bash
//! gas-mux-daq estimate --config config/gas_mux_daq.toml
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gas_mux_daq::acquisition::{estimate_total_time_seconds, AcquisitionEngine, RunConfig};
use gas_mux_daq::config::{Settings, DEFAULT_CONFIG_PATH};
use gas_mux_daq::control::{apply_intent, ControlIntent};
use gas_mux_daq::hardware::mock::{MockAnalyzer, MockGpio};
use gas_mux_daq::hardware::{
    CascadedMux, ChannelNotifier, ChannelSelector, Cue, MountPointProbe, NotificationSink, StorageProbe,
};
use gas_mux_daq::live::{DeviceStatusPoller, LiveDataPoller};
use gas_mux_daq::logging;
use gas_mux_daq::preferences::{keys, JsonPreferences, PreferenceStore};
use gas_mux_daq::status::display::{format_mmss, render_lines};
use gas_mux_daq::status::ProgressBroadcaster;
use gas_mux_daq::storage::CsvRecorderFactory;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "gas-mux-daq")]
#[command(about = "Multiplexed gas analyzer acquisition sequencer", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one acquisition against simulated hardware
    Simulate {
        /// Measurement seconds per channel
        #[arg(long)]
        measure: Option<u64>,

        /// Pause seconds before each measurement
        #[arg(long)]
        pause: Option<u64>,

        /// Number of repeats
        #[arg(long)]
        repeat: Option<u64>,

        /// Include mask, one character per channel ('1' = measure)
        #[arg(long)]
        channels: Option<String>,
    },

    /// Print the run duration estimate for the current preferences
    Estimate,

    /// Print the merged preferences as JSON
    Prefs,

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config)?;
    settings.validate()?;
    logging::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Simulate {
            measure,
            pause,
            repeat,
            channels,
        } => {
            let mut overrides = Map::new();
            if let Some(measure) = measure {
                overrides.insert(keys::MEASUREMENT_DURATION.into(), json!(measure));
            }
            if let Some(pause) = pause {
                overrides.insert(keys::PAUSE_SECONDS.into(), json!(pause));
            }
            if let Some(repeat) = repeat {
                overrides.insert(keys::REPEAT_COUNT.into(), json!(repeat));
            }
            if let Some(mask) = channels {
                overrides.insert(keys::INCLUDE_CHANNELS.into(), json!(parse_mask(&mask)?));
            }
            simulate(settings, overrides).await
        }
        Commands::Estimate => {
            let prefs = load_preferences(&settings)?;
            let config = RunConfig::from_preferences(&*prefs, settings.mux.total_channels());
            let eta = estimate_total_time_seconds(&config, settings.sequencer.switch_settle_seconds);
            println!(
                "{} of {} channels enabled, {} repeat(s)",
                config.enabled_count(),
                config.total_channels(),
                config.repeat_count
            );
            println!("Estimated duration: {} s ({})", eta, format_mmss(Some(eta)));
            Ok(())
        }
        Commands::Config => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
        Commands::Prefs => {
            let prefs = load_preferences(&settings)?;
            println!("{}", serde_json::to_string_pretty(&prefs.as_map())?);
            Ok(())
        }
    }
}

/// Preferences from the configured file, held in memory so CLI overrides
/// never touch the file.
fn load_preferences(settings: &Settings) -> Result<Arc<JsonPreferences>> {
    let total = settings.mux.total_channels();
    let prefs = JsonPreferences::in_memory(total);
    let path = &settings.preferences.path;
    if path.exists() {
        let stored = JsonPreferences::open(path, total)
            .with_context(|| format!("reading preferences from {}", path.display()))?;
        prefs.update_from(&stored.as_map())?;
    }
    Ok(Arc::new(prefs))
}

fn parse_mask(mask: &str) -> Result<Vec<bool>> {
    mask.chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .map(|c| match c {
            '1' | 'x' | 'X' => Ok(true),
            '0' | '.' | '-' => Ok(false),
            other => bail!("invalid channel mask character '{}'", other),
        })
        .collect()
}

async fn simulate(settings: Settings, overrides: Map<String, Value>) -> Result<()> {
    let prefs = load_preferences(&settings)?;
    prefs.update_from(&overrides)?;

    let gpio = Arc::new(MockGpio::new());
    let mux = Arc::new(CascadedMux::from_config(&settings.mux, gpio));
    let analyzer = Arc::new(
        MockAnalyzer::new()
            .with_generated_readings(["Carbon dioxide (CO2)", "Methane (CH4)", "Nitrous oxide (N2O)"])
            .with_latency(Duration::from_millis(20)),
    );

    let (notifier, mut cues) = ChannelNotifier::new(32);
    notifier
        .enabled_flag()
        .store(prefs.get_bool(keys::BUZZER_ENABLED, true), Ordering::Relaxed);
    notifier.play(Cue::PowerOn);
    let buzzer_flag = notifier.enabled_flag();
    prefs.register_callback(keys::BUZZER_ENABLED, move |_, value| {
        buzzer_flag.store(value.as_bool().unwrap_or(true), Ordering::Relaxed);
    });
    tokio::spawn(async move {
        while let Some(cue) = cues.recv().await {
            info!(%cue, "buzzer");
        }
    });

    let broadcaster = Arc::new(ProgressBroadcaster::new());
    broadcaster.attach_preferences(&prefs);

    let engine = Arc::new(
        AcquisitionEngine::new(mux.clone(), analyzer.clone(), prefs.clone(), settings.sequencer.clone())
            .with_notifier(Arc::new(notifier))
            .with_recorders(Arc::new(CsvRecorderFactory::new(&settings.storage.log_dir))),
    );
    engine.subscribe(broadcaster.clone());

    let shutdown = Arc::new(AtomicBool::new(false));

    let live = LiveDataPoller::new(
        engine.clone(),
        analyzer.clone(),
        broadcaster.clone(),
        Duration::from_secs(settings.live.result_poll_seconds.max(1)),
    );
    let live_shutdown = shutdown.clone();
    tokio::spawn(async move { live.run(live_shutdown).await });

    let status = DeviceStatusPoller::new(
        analyzer.clone(),
        MountPointProbe::from_config(&settings.storage)
            .map(|probe| Arc::new(probe) as Arc<dyn StorageProbe>),
        broadcaster.clone(),
        Duration::from_secs(settings.live.status_poll_seconds.max(1)),
    );
    let status_shutdown = shutdown.clone();
    tokio::spawn(async move { status.run(status_shutdown).await });

    let mut rx = broadcaster.subscribe();
    let printer_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut last_shown = Vec::new();
        while rx.changed().await.is_ok() && !printer_shutdown.load(Ordering::SeqCst) {
            let lines = render_lines(&rx.borrow_and_update());
            // Only the banner and position lines; the percent line ticks every poll.
            if lines.get(1..3) != last_shown.get(..) {
                info!(display = %lines.join(" | "), "status");
                last_shown = lines[1..3].to_vec();
            }
        }
    });

    let response = apply_intent(&engine, ControlIntent::Start).await;
    if !response.ok {
        bail!("run not started: {}", response.message);
    }
    info!(eta_seconds = ?engine.progress().eta_seconds, "simulation running, Ctrl+C aborts");

    tokio::select! {
        _ = engine.join() => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            warn!("interrupt received");
            let response = apply_intent(&engine, ControlIntent::Abort).await;
            info!(message = %response.message, "abort");
        }
    }
    while engine.is_running() {
        tokio::time::sleep(settings.sequencer.poll_interval()).await;
    }
    shutdown.store(true, Ordering::SeqCst);

    let progress = engine.progress();
    println!(
        "Run ended in phase {} after {}/{} measurements (multiplexer at {:?})",
        progress.phase,
        progress.step_index,
        progress.total_steps,
        mux.position()
    );
    if let Some(ts) = engine.last_logged_timestamp() {
        println!("Last logged result at epoch {:.0}", ts);
    }
    Ok(())
}
