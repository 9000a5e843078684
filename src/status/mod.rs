//! Progress broadcasting.
//!
//! [`ProgressBroadcaster`] keeps one merged [`StatusSnapshot`] in a
//! `tokio::sync::watch` channel: the sequencer's progress, analyzer
//! connection, the latest live result, storage mount state and the buzzer
//! preference. Publishing never blocks; consumers either pull
//! [`ProgressBroadcaster::snapshot`] or await changes on a receiver.
//!
//! Streaming transports turn snapshots into outbound payloads with
//! [`PayloadDeltaTracker`], which always carries progress and repeats the
//! other fields only when they changed.

pub mod display;

use crate::acquisition::{Progress, ProgressObserver};
use crate::measurement::MeasurementResult;
use crate::preferences::{keys, JsonPreferences};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Everything a status consumer needs, as one consistent view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Sequencer progress
    #[serde(flatten)]
    pub progress: Progress,
    /// Analyzer reachable
    pub connection: bool,
    /// New result from the most recent live poll, if it produced one
    pub live_data: Option<MeasurementResult>,
    /// Removable log medium mounted
    pub usb_mounted: bool,
    /// Buzzer preference
    pub buzzer_enabled: bool,
    /// The buzzer preference changed since it was last acknowledged
    pub buzzer_changed: bool,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            progress: Progress::default(),
            connection: false,
            live_data: None,
            usb_mounted: false,
            buzzer_enabled: true,
            buzzer_changed: false,
        }
    }
}

/// One update to the merged snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusDelta {
    /// New sequencer progress
    Progress(Progress),
    /// Outcome of a live poll: `Some` for a new result, `None` otherwise
    LiveData(Option<MeasurementResult>),
    /// Device status refresh; `usb_mounted: None` keeps the previous value
    Device {
        /// Analyzer reachable
        connected: bool,
        /// Mount state, if it could be probed
        usb_mounted: Option<bool>,
    },
    /// Buzzer preference changed out of band
    Buzzer(bool),
}

/// Merged status holder with fire-and-forget publishing.
pub struct ProgressBroadcaster {
    sender: watch::Sender<StatusSnapshot>,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBroadcaster {
    /// Broadcaster holding a default snapshot.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(StatusSnapshot::default());
        Self { sender }
    }

    /// Merge `delta` into the snapshot and wake receivers.
    pub fn publish(&self, delta: StatusDelta) {
        self.sender.send_modify(|snapshot| match delta {
            StatusDelta::Progress(progress) => snapshot.progress = progress,
            StatusDelta::LiveData(live) => snapshot.live_data = live,
            StatusDelta::Device {
                connected,
                usb_mounted,
            } => {
                snapshot.connection = connected;
                if let Some(mounted) = usb_mounted {
                    snapshot.usb_mounted = mounted;
                }
            }
            StatusDelta::Buzzer(enabled) => {
                snapshot.buzzer_enabled = enabled;
                snapshot.buzzer_changed = true;
            }
        });
    }

    /// Point-in-time copy of the merged view.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.sender.borrow().clone()
    }

    /// Receiver woken on every publish.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.sender.subscribe()
    }

    /// Acknowledge the pending buzzer change.
    pub fn clear_pending_change(&self) {
        self.sender.send_if_modified(|snapshot| {
            std::mem::replace(&mut snapshot.buzzer_changed, false)
        });
    }

    /// Mirror the buzzer preference into the snapshot.
    pub fn attach_preferences(self: &Arc<Self>, preferences: &JsonPreferences) {
        use crate::preferences::PreferenceStore;

        let enabled = preferences.get_bool(keys::BUZZER_ENABLED, true);
        self.sender
            .send_modify(|snapshot| snapshot.buzzer_enabled = enabled);

        let broadcaster = Arc::clone(self);
        preferences.register_callback(keys::BUZZER_ENABLED, move |_, value| {
            let enabled = value.as_bool().unwrap_or(true);
            debug!(enabled, "buzzer preference changed");
            broadcaster.publish(StatusDelta::Buzzer(enabled));
        });
    }
}

impl ProgressObserver for ProgressBroadcaster {
    fn on_progress(&self, progress: &Progress) -> Result<()> {
        self.publish(StatusDelta::Progress(progress.clone()));
        Ok(())
    }
}

/// Builds outbound payloads that only repeat what changed.
#[derive(Debug, Default)]
pub struct PayloadDeltaTracker {
    last_connection: Option<bool>,
    last_live_data: Option<Option<MeasurementResult>>,
    last_usb_mounted: Option<bool>,
}

impl PayloadDeltaTracker {
    /// Fresh tracker; the first payload carries every field.
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload for `snapshot`.
    ///
    /// Progress is always present. `connection`, `live_data` and
    /// `usb_mounted` appear when they differ from the previous payload;
    /// `buzzer_enabled` appears while a change is pending.
    pub fn build(&mut self, snapshot: &StatusSnapshot) -> Result<Value> {
        let mut payload = match serde_json::to_value(&snapshot.progress)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        if self.last_connection != Some(snapshot.connection) {
            self.last_connection = Some(snapshot.connection);
            payload.insert(
                "connection".into(),
                serde_json::json!({ "online": snapshot.connection }),
            );
        }

        if self.last_live_data.as_ref() != Some(&snapshot.live_data) {
            self.last_live_data = Some(snapshot.live_data.clone());
            let live = match &snapshot.live_data {
                Some(result) => serde_json::to_value(result)?,
                None => Value::Object(Map::new()),
            };
            payload.insert("live_data".into(), live);
        }

        if self.last_usb_mounted != Some(snapshot.usb_mounted) {
            self.last_usb_mounted = Some(snapshot.usb_mounted);
            payload.insert("usb_mounted".into(), snapshot.usb_mounted.into());
        }

        if snapshot.buzzer_changed {
            payload.insert("buzzer_enabled".into(), snapshot.buzzer_enabled.into());
        }

        Ok(Value::Object(payload))
    }
}
