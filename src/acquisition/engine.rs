//! The acquisition sequencer.
//!
//! One [`AcquisitionEngine`] owns a run end to end: it validates the
//! configuration, starts the analyzer, spawns a single worker task that walks
//! the multiplexer through every repeat, and always finalises the run (stop
//! command, recorder close, terminal phase) however the worker exits.
//!
//! # Concurrency
//!
//! - The running flag, the run configuration and [`Progress`] live behind one
//!   `parking_lot::Mutex`. The running check and the reservation of a new run
//!   happen under that lock, so concurrent `start()` calls from the HTTP surface
//!   and the trigger button cannot both succeed.
//! - The lock is never held across an `.await` or while observers run.
//! - Cancellation is a cooperative `AtomicBool` checked at every poll tick of
//!   every wait; `stop()` joins the worker with a bounded timeout.
//! - Observers are called on the worker after every publish. Errors and panics
//!   are logged per observer and never reach the worker.

use crate::acquisition::config::RunConfig;
use crate::acquisition::dedup::{DedupOutcome, DuplicateFilter};
use crate::acquisition::eta::estimate_total_time_seconds;
use crate::acquisition::phase::Phase;
use crate::acquisition::progress::Progress;
use crate::config::SequencerConfig;
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::hardware::capabilities::{AnalyzerGateway, ChannelSelector, NotificationSink};
use crate::hardware::notifier::{Cue, LoggingNotifier};
use crate::measurement::MeasurementResult;
use crate::preferences::PreferenceStore;
use crate::storage::{MeasurementRecorder, RecorderFactory};
use anyhow::Result;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Receives a copy of the progress after every change.
///
/// Implementations run on the sequencer's worker and must return quickly.
pub trait ProgressObserver: Send + Sync {
    /// Handle one progress update.
    fn on_progress(&self, progress: &Progress) -> Result<()>;
}

impl<F> ProgressObserver for F
where
    F: Fn(&Progress) -> Result<()> + Send + Sync,
{
    fn on_progress(&self, progress: &Progress) -> Result<()> {
        self(progress)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Every repeat finished
    Completed,
    /// Cancelled, or a fault inside the loop
    Aborted,
}

impl RunExit {
    fn terminal_phase(self) -> Phase {
        match self {
            RunExit::Completed => Phase::Idle,
            RunExit::Aborted => Phase::Aborted,
        }
    }
}

/// Result of a timed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    Elapsed,
    Cancelled,
}

#[derive(Default)]
struct RunState {
    running: bool,
    config: Option<RunConfig>,
    progress: Progress,
    started_at: Option<Instant>,
}

struct RecorderSlot {
    filter: DuplicateFilter,
    recorder: Option<Box<dyn MeasurementRecorder>>,
}

struct EngineInner {
    selector: Arc<dyn ChannelSelector>,
    analyzer: Arc<dyn AnalyzerGateway>,
    preferences: Arc<dyn PreferenceStore>,
    notifier: Arc<dyn NotificationSink>,
    recorders: Option<Arc<dyn RecorderFactory>>,
    timing: SequencerConfig,
    state: Mutex<RunState>,
    observers: RwLock<Vec<Arc<dyn ProgressObserver>>>,
    recorder: Mutex<RecorderSlot>,
    cancel: AtomicBool,
}

/// The acquisition sequencer.
pub struct AcquisitionEngine {
    inner: Arc<EngineInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AcquisitionEngine {
    /// Create an engine around its collaborators.
    ///
    /// Cues go to a [`LoggingNotifier`] and nothing is recorded until
    /// [`with_notifier`](Self::with_notifier) / [`with_recorders`](Self::with_recorders)
    /// say otherwise.
    pub fn new(
        selector: Arc<dyn ChannelSelector>,
        analyzer: Arc<dyn AnalyzerGateway>,
        preferences: Arc<dyn PreferenceStore>,
        timing: SequencerConfig,
    ) -> Self {
        let inner = EngineInner {
            selector,
            analyzer,
            preferences,
            notifier: Arc::new(LoggingNotifier),
            recorders: None,
            timing,
            state: Mutex::new(RunState::default()),
            observers: RwLock::new(Vec::new()),
            recorder: Mutex::new(RecorderSlot {
                filter: DuplicateFilter::new(),
                recorder: None,
            }),
            cancel: AtomicBool::new(false),
        };
        Self {
            inner: Arc::new(inner),
            worker: Mutex::new(None),
        }
    }

    fn inner_mut(&mut self) -> Option<&mut EngineInner> {
        Arc::get_mut(&mut self.inner)
    }

    /// Route cues to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        if let Some(inner) = self.inner_mut() {
            inner.notifier = notifier;
        }
        self
    }

    /// Open a recorder from `factory` for every run.
    pub fn with_recorders(mut self, factory: Arc<dyn RecorderFactory>) -> Self {
        if let Some(inner) = self.inner_mut() {
            inner.recorders = Some(factory);
        }
        self
    }

    /// Register a progress observer.
    pub fn subscribe(&self, observer: Arc<dyn ProgressObserver>) {
        self.inner.observers.write().push(observer);
    }

    /// Whether a run is active (including its finalisation).
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    /// Copy of the current progress with a fresh elapsed time.
    pub fn progress(&self) -> Progress {
        self.inner.snapshot()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.inner.state.lock().progress.phase
    }

    /// Configuration of the active run.
    pub fn run_config(&self) -> Option<RunConfig> {
        self.inner.state.lock().config.clone()
    }

    /// Timestamp of the last logged live result.
    pub fn last_logged_timestamp(&self) -> Option<f64> {
        self.inner.recorder.lock().filter.last_logged()
    }

    /// Duration estimate for the current preferences.
    pub fn estimate_total_time_seconds(&self) -> u64 {
        let config = RunConfig::from_preferences(
            &*self.inner.preferences,
            self.inner.selector.total_channels(),
        );
        estimate_total_time_seconds(&config, self.inner.timing.switch_settle_seconds)
    }

    /// Start a run.
    ///
    /// Preconditions are checked in order and the first failure is returned:
    /// already running, no enabled channel, analyzer offline, analyzer refused
    /// the start command. None of them leaves state behind.
    pub async fn start(&self) -> AcquisitionResult<()> {
        let inner = &self.inner;

        let config = {
            let mut state = inner.state.lock();
            if state.running {
                drop(state);
                warn!("start rejected: measurement already running");
                inner.notifier.play(Cue::Busy);
                return Err(AcquisitionError::AlreadyRunning);
            }

            let config =
                RunConfig::from_preferences(&*inner.preferences, inner.selector.total_channels());
            if let Err(e) = config.validate() {
                drop(state);
                warn!(error = %e, "start rejected: invalid configuration");
                inner.notifier.play(Cue::InvalidConfig);
                return Err(e);
            }

            state.running = true;
            state.config = Some(config.clone());
            inner.cancel.store(false, Ordering::SeqCst);
            config
        };

        if let Err(e) = inner.start_device(&config).await {
            warn!(error = %e, "start rejected by analyzer");
            inner.notifier.play(Cue::DeviceError);
            let mut state = inner.state.lock();
            state.running = false;
            state.config = None;
            return Err(e);
        }

        let eta = estimate_total_time_seconds(&config, inner.timing.switch_settle_seconds);
        {
            let mut state = inner.state.lock();
            state.progress = Progress::for_run(&config, eta);
            state.started_at = Some(Instant::now());
        }
        inner.open_recorder();

        info!(
            measure_seconds = config.measure_seconds,
            pause_seconds = config.pause_seconds,
            repeat_count = config.repeat_count,
            enabled_channels = config.enabled_count(),
            total_channels = config.total_channels(),
            eta_seconds = eta,
            "acquisition run started"
        );
        inner.notifier.play(Cue::Started);

        let worker = inner.clone();
        let span = info_span!("acquisition_run", eta_seconds = eta);
        let handle = tokio::spawn(async move { worker.run_worker(config).await }.instrument(span));
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Request cancellation and wait briefly for the worker to exit.
    ///
    /// No-op when idle. The join is bounded by `stop_join_timeout_ms`; a
    /// worker still busy in a device command afterwards keeps running and
    /// finalises on its own.
    ///
    /// Returns without waiting, with [`is_running`](Self::is_running) still
    /// true, when there is no worker handle to join: a `start()` that is still
    /// waiting on the analyzer, or a concurrent [`join`](Self::join) that
    /// already holds the handle. The flag stays set and the run aborts at
    /// its first poll point.
    pub async fn stop(&self) {
        if !self.is_running() {
            debug!("stop requested while idle");
            return;
        }
        self.inner.cancel.store(true, Ordering::SeqCst);
        info!("abort requested");

        let Some(mut handle) = self.worker.lock().take() else {
            return;
        };
        match timeout(self.inner.timing.stop_join_timeout(), &mut handle).await {
            Ok(Ok(())) => debug!("worker joined"),
            Ok(Err(e)) => warn!(error = %e, "worker task failed"),
            Err(_) => {
                warn!(
                    timeout_ms = self.inner.timing.stop_join_timeout_ms,
                    "worker did not exit in time"
                );
                let mut slot = self.worker.lock();
                if slot.is_none() {
                    *slot = Some(handle);
                }
            }
        }
    }

    /// Wait until the current run, if any, has fully finalised.
    pub async fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task failed");
            }
        }
    }

    /// Gate a live result through duplicate detection.
    ///
    /// Returns `true` only for a new result; that result is also written to
    /// the run's recorder if one is open. Empty results, unparsable timestamps
    /// and echoes of the last logged result return `false`.
    pub fn on_live_data(&self, result: &MeasurementResult) -> bool {
        let mut slot = self.inner.recorder.lock();
        match slot.filter.accept(result) {
            DedupOutcome::New(ts) => {
                if let Some(recorder) = slot.recorder.as_mut() {
                    if let Err(e) = recorder.record(result) {
                        warn!(error = %e, "failed to write measurement row");
                    }
                }
                debug!(timestamp = ts, channel = result.channel, "live result accepted");
                true
            }
            DedupOutcome::Duplicate => {
                debug!(channel = result.channel, "duplicate live result suppressed");
                false
            }
            DedupOutcome::InvalidTimestamp => {
                debug!(timestamp = ?result.timestamp, "live result with invalid timestamp dropped");
                false
            }
            DedupOutcome::Empty => false,
        }
    }
}

impl EngineInner {
    async fn start_device(&self, config: &RunConfig) -> AcquisitionResult<()> {
        if !self.analyzer.is_connected().await {
            return Err(AcquisitionError::DeviceNotConnected);
        }

        let online = !config.save_on_device;
        match self.analyzer.set_online_mode(online).await {
            Ok(response) => debug!(online, %response, "online mode applied"),
            Err(e) => warn!(online, error = %e, "failed to apply online mode"),
        }

        match self.analyzer.start_measurement(&self.timing.task_id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AcquisitionError::DeviceStartFailed),
            Err(e) => {
                debug!(error = %e, "start command failed");
                Err(AcquisitionError::DeviceStartFailed)
            }
        }
    }

    fn open_recorder(&self) {
        let Some(factory) = &self.recorders else {
            return;
        };
        let recorder = match factory.open() {
            Ok(recorder) => Some(recorder),
            Err(e) => {
                warn!(error = %e, "measurement log unavailable, run continues without it");
                None
            }
        };
        self.recorder.lock().recorder = recorder;
    }

    fn close_recorder(&self) {
        let recorder = self.recorder.lock().recorder.take();
        if let Some(mut recorder) = recorder {
            if let Err(e) = recorder.close() {
                warn!(error = %e, "failed to close measurement log");
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Progress {
        let mut state = self.state.lock();
        if let Some(started) = state.started_at {
            state.progress.elapsed_seconds = Some(started.elapsed().as_secs_f64());
        }
        state.progress.clone()
    }

    fn update(&self, f: impl FnOnce(&mut Progress)) {
        f(&mut self.state.lock().progress);
    }

    fn publish(&self) {
        let progress = self.snapshot();
        let observers = self.observers.read().clone();
        for observer in observers {
            match catch_unwind(AssertUnwindSafe(|| observer.on_progress(&progress))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "progress observer failed"),
                Err(_) => warn!("progress observer panicked"),
            }
        }
    }

    fn enter_phase(&self, phase: Phase) {
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.progress.phase, phase)
        };
        if previous != phase {
            info!(from = %previous, to = %phase, "phase transition");
        }
        self.publish();
    }

    /// Sleep for `duration` in poll-interval slices, republishing progress
    /// after each slice.
    async fn wait(&self, duration: Duration) -> Wait {
        let deadline = Instant::now() + duration;
        let poll = self.timing.poll_interval();
        loop {
            if self.cancelled() {
                return Wait::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                return Wait::Elapsed;
            }
            sleep(poll.min(deadline - now)).await;
            self.publish();
        }
    }

    async fn run_worker(self: Arc<Self>, config: RunConfig) {
        let outcome = AssertUnwindSafe(self.run_repeats(&config))
            .catch_unwind()
            .await;
        let exit = match outcome {
            Ok(Ok(exit)) => exit,
            Ok(Err(e)) => {
                let fault = AcquisitionError::RunLoopFault(format!("{e:#}"));
                error!(error = %fault, "acquisition run faulted");
                RunExit::Aborted
            }
            Err(_) => {
                let fault = AcquisitionError::RunLoopFault("worker panicked".to_string());
                error!(error = %fault, "acquisition run faulted");
                RunExit::Aborted
            }
        };
        self.finalize(exit).await;
    }

    async fn run_repeats(&self, config: &RunConfig) -> Result<RunExit> {
        let settle = Duration::from_secs(self.timing.switch_settle_seconds);

        for repeat in 0..config.repeat_count {
            if self.cancelled() {
                return Ok(RunExit::Aborted);
            }
            self.update(|p| p.begin_repeat(repeat));
            info!(repeat = repeat + 1, of = config.repeat_count, "repeat started");

            self.enter_phase(Phase::Homing);
            self.notifier.play(Cue::Home);
            self.selector.home().await?;
            if self.wait(settle).await == Wait::Cancelled {
                return Ok(RunExit::Aborted);
            }

            let is_final = repeat + 1 == config.repeat_count;
            if self.run_channels(config, is_final).await? == Wait::Cancelled {
                return Ok(RunExit::Aborted);
            }
        }
        Ok(RunExit::Completed)
    }

    /// One pass over the virtual channels.
    async fn run_channels(&self, config: &RunConfig, is_final: bool) -> Result<Wait> {
        let total = config.total_channels();
        let enabled_count = config.enabled_count();
        let settle = Duration::from_secs(self.timing.switch_settle_seconds);
        let pause = Duration::from_secs(config.pause_seconds);
        let measure = Duration::from_secs(config.measure_seconds);
        let hold = Duration::from_secs(self.timing.completion_hold_seconds);
        let mut processed = 0usize;

        for channel in 0..total {
            self.update(|p| p.visit_channel(channel, total));
            self.publish();
            if self.cancelled() {
                return Ok(Wait::Cancelled);
            }

            let enabled = config.is_enabled(channel);
            if enabled {
                self.enter_phase(Phase::Paused);
                self.notifier.play(Cue::Pause);
                if self.wait(pause).await == Wait::Cancelled {
                    return Ok(Wait::Cancelled);
                }

                self.enter_phase(Phase::Measuring);
                if self.wait(measure).await == Wait::Cancelled {
                    return Ok(Wait::Cancelled);
                }

                processed += 1;
                self.update(|p| p.record_measurement(processed));
                self.publish();
                info!(channel = channel + 1, processed, of = enabled_count, "channel measured");
            }

            if processed == enabled_count {
                if is_final {
                    self.enter_phase(Phase::Switching);
                    if self.wait(hold).await == Wait::Cancelled {
                        return Ok(Wait::Cancelled);
                    }
                }
                break;
            }

            self.enter_phase(Phase::Switching);
            if enabled {
                self.notifier.play(Cue::Step);
            }
            self.selector.select_next().await?;
            if self.wait(settle).await == Wait::Cancelled {
                return Ok(Wait::Cancelled);
            }
        }
        Ok(Wait::Elapsed)
    }

    async fn finalize(&self, exit: RunExit) {
        self.cancel.store(false, Ordering::SeqCst);

        self.enter_phase(exit.terminal_phase());
        self.notifier.play(match exit {
            RunExit::Completed => Cue::Completed,
            RunExit::Aborted => Cue::Cancel,
        });

        let stop_error = match self.analyzer.stop_measurement().await {
            Ok(true) => None,
            Ok(false) => Some(AcquisitionError::DeviceStopFailed("device refused".to_string())),
            Err(e) => Some(AcquisitionError::DeviceStopFailed(e.to_string())),
        };
        if let Some(e) = stop_error {
            warn!(error = %e, "analyzer stop failed");
        }

        self.close_recorder();

        let steps = {
            let mut state = self.state.lock();
            state.progress.clear_timing();
            state.started_at = None;
            state.config = None;
            state.running = false;
            state.progress.step_index
        };
        self.publish();
        info!(?exit, steps, "acquisition run finished");
    }
}
