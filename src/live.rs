//! Background pollers feeding the status broadcaster.
//!
//! - [`LiveDataPoller`] fetches the analyzer's latest result at a low rate
//!   while a run is active and routes it through the engine's duplicate gate.
//! - [`DeviceStatusPoller`] refreshes connection and storage mount state.
//!
//! Both loops stop when their shutdown flag is raised and never give up on a
//! failing device; errors are logged and the next tick tries again.

use crate::acquisition::AcquisitionEngine;
use crate::hardware::capabilities::{AnalyzerGateway, StorageProbe};
use crate::measurement::MeasurementResult;
use crate::status::{ProgressBroadcaster, StatusDelta};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Low-frequency live result poller.
pub struct LiveDataPoller {
    engine: Arc<AcquisitionEngine>,
    analyzer: Arc<dyn AnalyzerGateway>,
    broadcaster: Arc<ProgressBroadcaster>,
    period: Duration,
}

impl LiveDataPoller {
    /// Poll every `period` while `engine` is running.
    pub fn new(
        engine: Arc<AcquisitionEngine>,
        analyzer: Arc<dyn AnalyzerGateway>,
        broadcaster: Arc<ProgressBroadcaster>,
        period: Duration,
    ) -> Self {
        Self {
            engine,
            analyzer,
            broadcaster,
            period,
        }
    }

    /// Fetch once and publish the outcome.
    ///
    /// Returns whether a new result was accepted. Does nothing while idle.
    pub async fn poll_once(&self) -> bool {
        if !self.engine.is_running() {
            return false;
        }

        let reading = match self.analyzer.poll_latest_result().await {
            Ok(Some(reading)) if !reading.components.is_empty() => reading,
            Ok(_) => {
                self.broadcaster.publish(StatusDelta::LiveData(None));
                return false;
            }
            Err(e) => {
                warn!(error = %e, "live result poll failed");
                return false;
            }
        };

        let progress = self.engine.progress();
        let result = MeasurementResult::from_reading(
            reading,
            progress.phase,
            progress.current_channel + 1,
            progress.repeat_index,
        );

        let is_new = self.engine.on_live_data(&result);
        self.broadcaster
            .publish(StatusDelta::LiveData(is_new.then_some(result)));
        is_new
    }

    /// Poll until `shutdown` is raised.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        info!(period_s = self.period.as_secs(), "live data poller started");
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a fresh run gets a full period.
        ticker.tick().await;

        while !shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.poll_once().await;
        }
        debug!("live data poller stopped");
    }
}

/// Periodic connection and storage state refresh.
pub struct DeviceStatusPoller {
    analyzer: Arc<dyn AnalyzerGateway>,
    storage: Option<Arc<dyn StorageProbe>>,
    broadcaster: Arc<ProgressBroadcaster>,
    period: Duration,
}

impl DeviceStatusPoller {
    /// Refresh every `period`.
    pub fn new(
        analyzer: Arc<dyn AnalyzerGateway>,
        storage: Option<Arc<dyn StorageProbe>>,
        broadcaster: Arc<ProgressBroadcaster>,
        period: Duration,
    ) -> Self {
        Self {
            analyzer,
            storage,
            broadcaster,
            period,
        }
    }

    /// Probe once and publish connection and mount state together.
    pub async fn refresh(&self) {
        let connected = self.analyzer.is_connected().await;
        let usb_mounted = self.storage.as_ref().and_then(|probe| match probe.is_mounted() {
            Ok(mounted) => Some(mounted),
            Err(e) => {
                debug!(error = %e, "mount probe failed, keeping last state");
                None
            }
        });
        self.broadcaster.publish(StatusDelta::Device {
            connected,
            usb_mounted,
        });
    }

    /// Refresh until `shutdown` is raised.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while !shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            self.refresh().await;
        }
        debug!("device status poller stopped");
    }
}
