//! User preferences consumed at run start.
//!
//! Preferences are a flat JSON object. The sequencer only reads them; control
//! surfaces write them through [`PreferenceStore::update_from`], which accepts
//! known keys only and fires change callbacks for every key it touched.

use crate::error::{AppError, AppResult};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Preference keys.
pub mod keys {
    /// Measurement duration per channel, seconds
    pub const MEASUREMENT_DURATION: &str = "measurement_duration";
    /// Pause before each measurement, seconds
    pub const PAUSE_SECONDS: &str = "pause_seconds";
    /// Number of passes over the enabled channels
    pub const REPEAT_COUNT: &str = "repeat_count";
    /// Channel include mask
    pub const INCLUDE_CHANNELS: &str = "include_channels";
    /// Keep results on the analyzer instead of streaming them
    pub const SAVE_ON_DEVICE: &str = "save_on_device";
    /// Audible cues on/off
    pub const BUZZER_ENABLED: &str = "buzzer_enabled";

    /// Every key the store accepts.
    pub const ALL: [&str; 6] = [
        MEASUREMENT_DURATION,
        PAUSE_SECONDS,
        REPEAT_COUNT,
        INCLUDE_CHANNELS,
        SAVE_ON_DEVICE,
        BUZZER_ENABLED,
    ];
}

/// Default measurement duration in seconds.
pub const DEFAULT_MEASUREMENT_DURATION: u64 = 100;
/// Default pause in seconds.
pub const DEFAULT_PAUSE_SECONDS: u64 = 5;
/// Default repeat count.
pub const DEFAULT_REPEAT_COUNT: u64 = 1;

/// Callback fired after a key changed.
pub type ChangeCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Key-value preference source.
pub trait PreferenceStore: Send + Sync {
    /// Raw value of `key`.
    fn get(&self, key: &str) -> Option<Value>;

    /// Replace one value.
    fn set(&self, key: &str, value: Value) -> AppResult<()>;

    /// Apply every known key in `updates`; returns the keys that changed.
    fn update_from(&self, updates: &Map<String, Value>) -> AppResult<Vec<String>>;

    /// Unsigned integer value or `default`.
    fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    /// Boolean value or `default`.
    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    /// List of booleans; non-boolean entries read as `false`.
    fn get_bool_list(&self, key: &str) -> Option<Vec<bool>> {
        match self.get(key)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .map(|v| v.as_bool().unwrap_or(false))
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// Preferences kept in a JSON file (or only in memory).
pub struct JsonPreferences {
    path: Option<PathBuf>,
    values: RwLock<Map<String, Value>>,
    callbacks: RwLock<Vec<(String, ChangeCallback)>>,
}

impl JsonPreferences {
    /// Defaults for a cascade with `channel_count` virtual channels.
    pub fn defaults(channel_count: usize) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(
            keys::MEASUREMENT_DURATION.into(),
            DEFAULT_MEASUREMENT_DURATION.into(),
        );
        map.insert(keys::PAUSE_SECONDS.into(), DEFAULT_PAUSE_SECONDS.into());
        map.insert(keys::REPEAT_COUNT.into(), DEFAULT_REPEAT_COUNT.into());
        map.insert(
            keys::INCLUDE_CHANNELS.into(),
            Value::Array(vec![Value::Bool(true); channel_count]),
        );
        map.insert(keys::SAVE_ON_DEVICE.into(), false.into());
        map.insert(keys::BUZZER_ENABLED.into(), true.into());
        map
    }

    /// In-memory store seeded with defaults.
    pub fn in_memory(channel_count: usize) -> Self {
        Self {
            path: None,
            values: RwLock::new(Self::defaults(channel_count)),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Open `path`, creating it with defaults when missing.
    ///
    /// Keys missing from an existing file fall back to defaults; unknown keys
    /// are ignored.
    pub fn open(path: impl AsRef<Path>, channel_count: usize) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut values = Self::defaults(channel_count);

        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            let stored: Value = serde_json::from_str(&text)?;
            let Value::Object(stored) = stored else {
                return Err(AppError::Preferences(format!(
                    "{} does not contain a JSON object",
                    path.display()
                )));
            };
            for (key, value) in stored {
                if keys::ALL.contains(&key.as_str()) {
                    values.insert(key, value);
                }
            }
            info!(path = %path.display(), "preferences loaded");
        }

        let store = Self {
            path: Some(path),
            values: RwLock::new(values),
            callbacks: RwLock::new(Vec::new()),
        };
        store.save()?;
        Ok(store)
    }

    /// Call `callback` whenever `key` changes.
    pub fn register_callback<F>(&self, key: &str, callback: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .push((key.to_string(), Arc::new(callback)));
    }

    /// Copy of every value.
    pub fn as_map(&self) -> Map<String, Value> {
        self.values.read().clone()
    }

    fn save(&self) -> AppResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(&*self.values.read())?;
        std::fs::write(path, text)?;
        Ok(())
    }

    fn notify(&self, changed: &[(String, Value)]) {
        let callbacks = self.callbacks.read().clone();
        for (key, value) in changed {
            for (wanted, callback) in callbacks.iter().filter(|(k, _)| k == key) {
                let result = catch_unwind(AssertUnwindSafe(|| callback(key, value)));
                if result.is_err() {
                    warn!(key = %wanted, "preference callback panicked");
                }
            }
        }
    }
}

impl PreferenceStore for JsonPreferences {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> AppResult<()> {
        let mut updates = Map::new();
        updates.insert(key.to_string(), value);
        let changed = self.update_from(&updates)?;
        if changed.is_empty() && !keys::ALL.contains(&key) {
            return Err(AppError::Preferences(format!("unknown preference '{}'", key)));
        }
        Ok(())
    }

    fn update_from(&self, updates: &Map<String, Value>) -> AppResult<Vec<String>> {
        let mut changed = Vec::new();
        {
            let mut values = self.values.write();
            for (key, value) in updates {
                if !keys::ALL.contains(&key.as_str()) {
                    debug!(key = %key, "ignoring unknown preference");
                    continue;
                }
                if values.get(key) != Some(value) {
                    values.insert(key.clone(), value.clone());
                    changed.push((key.clone(), value.clone()));
                }
            }
        }

        if !changed.is_empty() {
            self.save()?;
            self.notify(&changed);
        }
        Ok(changed.into_iter().map(|(key, _)| key).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn defaults_match_reference_values() {
        let prefs = JsonPreferences::in_memory(31);
        assert_eq!(prefs.get_u64(keys::MEASUREMENT_DURATION, 0), 100);
        assert_eq!(prefs.get_u64(keys::PAUSE_SECONDS, 0), 5);
        assert_eq!(prefs.get_u64(keys::REPEAT_COUNT, 0), 1);
        assert!(!prefs.get_bool(keys::SAVE_ON_DEVICE, true));
        assert_eq!(prefs.get_bool_list(keys::INCLUDE_CHANNELS).unwrap().len(), 31);
    }

    #[test]
    fn file_is_created_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs").join("user_prefs.json");

        let prefs = JsonPreferences::open(&path, 3).unwrap();
        assert!(path.exists());
        prefs.set(keys::PAUSE_SECONDS, json!(9)).unwrap();

        let reloaded = JsonPreferences::open(&path, 3).unwrap();
        assert_eq!(reloaded.get_u64(keys::PAUSE_SECONDS, 0), 9);
    }

    #[test]
    fn update_reports_only_changed_known_keys() {
        let prefs = JsonPreferences::in_memory(3);
        let updates = json!({
            "measurement_duration": 100,
            "repeat_count": 4,
            "colour": "blue"
        });
        let changed = prefs.update_from(updates.as_object().unwrap()).unwrap();
        assert_eq!(changed, vec!["repeat_count".to_string()]);
        assert!(prefs.get("colour").is_none());
    }

    #[test]
    fn callbacks_fire_per_key_and_survive_panics() {
        let prefs = JsonPreferences::in_memory(3);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        prefs.register_callback(keys::BUZZER_ENABLED, move |_, value| {
            assert_eq!(value, &json!(false));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        prefs.register_callback(keys::BUZZER_ENABLED, |_, _| panic!("broken listener"));

        prefs.set(keys::BUZZER_ENABLED, json!(false)).unwrap();
        prefs.set(keys::BUZZER_ENABLED, json!(false)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_key_is_rejected_by_set() {
        let prefs = JsonPreferences::in_memory(3);
        assert!(prefs.set("volume", json!(11)).is_err());
    }

    #[test]
    fn non_object_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(JsonPreferences::open(&path, 3).is_err());
    }
}
