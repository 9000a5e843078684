//! Mock Hardware Implementations
//!
//! Provides simulated collaborators for testing and for the `simulate` command.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockAnalyzer` - analyzer with scripted or generated readings and call counters
//! - `MockSelector` - channel selector that counts moves and can be told to fail
//! - `MockGpio` - records pulses on output lines
//! - `MockInput` - input line whose level is set by the test
//! - `MockStorage` - mount probe with a settable answer
//! - `RecordingNotifier` - keeps every cue it was asked to play

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::hardware::capabilities::{
    AnalyzerGateway, ChannelSelector, GpioLines, InputLine, MuxPosition, NotificationSink,
    StorageProbe,
};
use crate::hardware::notifier::Cue;
use crate::measurement::{AnalyzerReading, Component, TimestampValue};

/// How a mock answers a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockResponse {
    /// Command accepted
    Accept,
    /// Device answered but refused
    Refuse,
    /// Device unreachable
    Fail,
}

impl MockResponse {
    fn answer(self, command: &str) -> Result<bool> {
        match self {
            MockResponse::Accept => Ok(true),
            MockResponse::Refuse => Ok(false),
            MockResponse::Fail => Err(anyhow!("{} failed: device unreachable", command)),
        }
    }
}

// =============================================================================
// MockAnalyzer
// =============================================================================

/// Simulated gas analyzer.
///
/// Readings come from a script queue first. Once the queue is empty the mock
/// either repeats the last reading (like the real device does between
/// samples) or, with [`MockAnalyzer::with_generated_readings`], produces a new
/// random reading stamped with the current wall-clock second.
pub struct MockAnalyzer {
    connected: AtomicBool,
    start_response: Mutex<MockResponse>,
    stop_response: Mutex<MockResponse>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    online_mode_calls: Mutex<Vec<bool>>,
    online_mode_fails: AtomicBool,
    scripted: Mutex<VecDeque<AnalyzerReading>>,
    last: Mutex<Option<AnalyzerReading>>,
    generated_labels: Vec<String>,
    command_latency: Duration,
}

impl MockAnalyzer {
    /// Connected analyzer that accepts every command.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            start_response: Mutex::new(MockResponse::Accept),
            stop_response: Mutex::new(MockResponse::Accept),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            online_mode_calls: Mutex::new(Vec::new()),
            online_mode_fails: AtomicBool::new(false),
            scripted: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            generated_labels: Vec::new(),
            command_latency: Duration::ZERO,
        }
    }

    /// Generate readings for the given component labels once the script runs out.
    pub fn with_generated_readings<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.generated_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Simulate command round-trip time.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.command_latency = latency;
        self
    }

    /// Set the connection state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Set how `start_measurement` answers.
    pub fn set_start_response(&self, response: MockResponse) {
        *self.start_response.lock() = response;
    }

    /// Set how `stop_measurement` answers.
    pub fn set_stop_response(&self, response: MockResponse) {
        *self.stop_response.lock() = response;
    }

    /// Make `set_online_mode` fail.
    pub fn set_online_mode_fails(&self, fails: bool) {
        self.online_mode_fails.store(fails, Ordering::SeqCst);
    }

    /// Queue a reading to be returned by the next poll.
    pub fn push_reading(&self, reading: AnalyzerReading) {
        self.scripted.lock().push_back(reading);
    }

    /// Number of `start_measurement` calls.
    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Number of `stop_measurement` calls.
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Every value passed to `set_online_mode`, in order.
    pub fn online_mode_calls(&self) -> Vec<bool> {
        self.online_mode_calls.lock().clone()
    }

    fn generate(&self) -> Option<AnalyzerReading> {
        if self.generated_labels.is_empty() {
            return None;
        }
        let mut rng = rand::thread_rng();
        let components = self
            .generated_labels
            .iter()
            .map(|label| Component::new(label.clone(), rng.gen_range(0.0..50.0)))
            .collect();
        Some(AnalyzerReading {
            timestamp: Some(TimestampValue::Integer(chrono::Utc::now().timestamp())),
            components,
        })
    }
}

impl Default for MockAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalyzerGateway for MockAnalyzer {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn start_measurement(&self, task_id: &str) -> Result<bool> {
        sleep(self.command_latency).await;
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        debug!(task_id, "MockAnalyzer: start measurement");
        let response = *self.start_response.lock();
        response.answer("start_measurement")
    }

    async fn stop_measurement(&self) -> Result<bool> {
        sleep(self.command_latency).await;
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        debug!("MockAnalyzer: stop measurement");
        let response = *self.stop_response.lock();
        response.answer("stop_measurement")
    }

    async fn set_online_mode(&self, enabled: bool) -> Result<String> {
        self.online_mode_calls.lock().push(enabled);
        if self.online_mode_fails.load(Ordering::SeqCst) {
            return Err(anyhow!("set_online_mode failed: device unreachable"));
        }
        Ok(format!("SONL {}", u8::from(enabled)))
    }

    async fn poll_latest_result(&self) -> Result<Option<AnalyzerReading>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(anyhow!("analyzer offline"));
        }
        let next = self.scripted.lock().pop_front().or_else(|| self.generate());
        let mut last = self.last.lock();
        if let Some(reading) = next {
            *last = Some(reading);
        }
        Ok(last.clone())
    }
}

// =============================================================================
// MockSelector
// =============================================================================

/// Channel selector that only counts.
pub struct MockSelector {
    total: usize,
    index: AtomicUsize,
    home_calls: AtomicUsize,
    next_calls: AtomicUsize,
    fail_on_next: AtomicBool,
}

impl MockSelector {
    /// Selector with `total` virtual channels.
    pub fn new(total: usize) -> Self {
        Self {
            total: total.max(1),
            index: AtomicUsize::new(0),
            home_calls: AtomicUsize::new(0),
            next_calls: AtomicUsize::new(0),
            fail_on_next: AtomicBool::new(false),
        }
    }

    /// Make subsequent `select_next` calls fail.
    pub fn set_fail_on_next(&self, fail: bool) {
        self.fail_on_next.store(fail, Ordering::SeqCst);
    }

    /// Number of `home` calls.
    pub fn home_calls(&self) -> usize {
        self.home_calls.load(Ordering::SeqCst)
    }

    /// Number of successful `select_next` calls.
    pub fn next_calls(&self) -> usize {
        self.next_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelSelector for MockSelector {
    async fn home(&self) -> Result<usize> {
        self.home_calls.fetch_add(1, Ordering::SeqCst);
        self.index.store(0, Ordering::SeqCst);
        Ok(0)
    }

    async fn select_next(&self) -> Result<usize> {
        if self.fail_on_next.load(Ordering::SeqCst) {
            return Err(anyhow!("MockSelector: pneumatic step failed"));
        }
        self.next_calls.fetch_add(1, Ordering::SeqCst);
        let next = (self.index.load(Ordering::SeqCst) + 1) % self.total;
        self.index.store(next, Ordering::SeqCst);
        Ok(next)
    }

    fn position(&self) -> MuxPosition {
        let index = self.index.load(Ordering::SeqCst);
        MuxPosition {
            virtual_index: index,
            first: index,
            second: 0,
        }
    }

    fn total_channels(&self) -> usize {
        self.total
    }
}

// =============================================================================
// Small mocks
// =============================================================================

/// Output lines that count rising edges per pin.
#[derive(Default)]
pub struct MockGpio {
    levels: Mutex<HashMap<String, bool>>,
    pulses: Mutex<HashMap<String, usize>>,
}

impl MockGpio {
    /// All lines low.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `pin` was driven high.
    pub fn pulses(&self, pin: &str) -> usize {
        self.pulses.lock().get(pin).copied().unwrap_or(0)
    }

    /// Current level of `pin`.
    pub fn level(&self, pin: &str) -> bool {
        self.levels.lock().get(pin).copied().unwrap_or(false)
    }
}

#[async_trait]
impl GpioLines for MockGpio {
    async fn set(&self, pin: &str) -> Result<()> {
        self.levels.lock().insert(pin.to_string(), true);
        *self.pulses.lock().entry(pin.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn reset(&self, pin: &str) -> Result<()> {
        self.levels.lock().insert(pin.to_string(), false);
        Ok(())
    }
}

/// Input line with a settable level. Idle high (active-low button released).
pub struct MockInput {
    level: AtomicBool,
}

impl MockInput {
    /// Released button.
    pub fn new() -> Self {
        Self {
            level: AtomicBool::new(true),
        }
    }

    /// Drive the line.
    pub fn set_level(&self, high: bool) {
        self.level.store(high, Ordering::SeqCst);
    }
}

impl Default for MockInput {
    fn default() -> Self {
        Self::new()
    }
}

impl InputLine for MockInput {
    fn read(&self) -> Result<bool> {
        Ok(self.level.load(Ordering::SeqCst))
    }
}

/// Mount probe with a settable answer.
pub struct MockStorage {
    mounted: AtomicBool,
}

impl MockStorage {
    /// Probe reporting `mounted`.
    pub fn new(mounted: bool) -> Self {
        Self {
            mounted: AtomicBool::new(mounted),
        }
    }

    /// Change the reported state.
    pub fn set_mounted(&self, mounted: bool) {
        self.mounted.store(mounted, Ordering::SeqCst);
    }
}

impl StorageProbe for MockStorage {
    fn is_mounted(&self) -> Result<bool> {
        Ok(self.mounted.load(Ordering::SeqCst))
    }
}

/// Notification sink that remembers every cue.
#[derive(Default)]
pub struct RecordingNotifier {
    cues: Mutex<Vec<Cue>>,
}

impl RecordingNotifier {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cues played so far.
    pub fn cues(&self) -> Vec<Cue> {
        self.cues.lock().clone()
    }

    /// How often `cue` was played.
    pub fn count(&self, cue: Cue) -> usize {
        self.cues.lock().iter().filter(|c| **c == cue).count()
    }
}

impl NotificationSink for RecordingNotifier {
    fn play(&self, cue: Cue) {
        self.cues.lock().push(cue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(ts: i64) -> AnalyzerReading {
        AnalyzerReading {
            timestamp: Some(TimestampValue::Integer(ts)),
            components: vec![Component::new("CO2", 400.0)],
        }
    }

    #[tokio::test]
    async fn analyzer_repeats_last_reading() {
        let analyzer = MockAnalyzer::new();
        assert_eq!(analyzer.poll_latest_result().await.unwrap(), None);

        analyzer.push_reading(reading(10));
        let first = analyzer.poll_latest_result().await.unwrap();
        let echo = analyzer.poll_latest_result().await.unwrap();
        assert_eq!(first, echo);
        assert_eq!(first.unwrap().timestamp, Some(TimestampValue::Integer(10)));
    }

    #[tokio::test]
    async fn analyzer_generates_readings_for_labels() {
        let analyzer = MockAnalyzer::new().with_generated_readings(["CH4", "N2O"]);
        let reading = analyzer.poll_latest_result().await.unwrap().unwrap();
        let labels: Vec<_> = reading.components.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["CH4", "N2O"]);
    }

    #[tokio::test]
    async fn analyzer_responses_are_configurable() {
        let analyzer = MockAnalyzer::new();
        analyzer.set_start_response(MockResponse::Refuse);
        assert!(!analyzer.start_measurement("default").await.unwrap());
        analyzer.set_stop_response(MockResponse::Fail);
        assert!(analyzer.stop_measurement().await.is_err());
        assert_eq!(analyzer.start_calls(), 1);
        assert_eq!(analyzer.stop_calls(), 1);
    }

    #[tokio::test]
    async fn gpio_counts_pulses() {
        let gpio = MockGpio::new();
        gpio.set("OC1").await.unwrap();
        assert!(gpio.level("OC1"));
        gpio.reset("OC1").await.unwrap();
        assert!(!gpio.level("OC1"));
        assert_eq!(gpio.pulses("OC1"), 1);
    }
}
