//! Measurement records produced by the analyzer.
//!
//! The analyzer reports one reading at a time: a timestamp and a list of gas
//! components. Devices and firmware revisions disagree about the timestamp
//! shape (integer epoch, float epoch, ISO-8601, `YYYY-MM-DD HH:MM:SS`), so the
//! raw value is kept as a [`TimestampValue`] and normalised to epoch seconds
//! with [`normalize_timestamp`] before it is compared or logged.

use crate::acquisition::Phase;
use crate::error::AcquisitionError;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// One gas component of a reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Display label, e.g. `"Methane (CH₄)"`. Used as the log column name.
    pub label: String,
    /// Concentration in ppm
    pub ppm: f64,
    /// Display color hint
    #[serde(default)]
    pub color: String,
    /// CAS registry number
    #[serde(default)]
    pub cas: String,
}

impl Component {
    /// Create a component without display metadata.
    pub fn new(label: impl Into<String>, ppm: f64) -> Self {
        Self {
            label: label.into(),
            ppm,
            color: String::new(),
            cas: String::new(),
        }
    }
}

/// Timestamp exactly as the device reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimestampValue {
    /// Integer epoch seconds
    Integer(i64),
    /// Fractional epoch seconds
    Float(f64),
    /// ISO-8601 or `YYYY-MM-DD HH:MM:SS`
    Text(String),
}

impl From<i64> for TimestampValue {
    fn from(value: i64) -> Self {
        TimestampValue::Integer(value)
    }
}

impl From<f64> for TimestampValue {
    fn from(value: f64) -> Self {
        TimestampValue::Float(value)
    }
}

impl From<&str> for TimestampValue {
    fn from(value: &str) -> Self {
        TimestampValue::Text(value.to_string())
    }
}

/// Raw reading returned by the analyzer gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerReading {
    /// Device timestamp, if any
    pub timestamp: Option<TimestampValue>,
    /// Reported components in device order
    pub components: Vec<Component>,
}

/// A reading stamped with the sequencer position it was taken at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementResult {
    /// Device timestamp (normalised lazily)
    pub timestamp: Option<TimestampValue>,
    /// Reported components; must be non-empty to be accepted
    pub components: Vec<Component>,
    /// Sequencer phase when the reading was fetched
    pub phase: Phase,
    /// 1-based channel number for display and logs
    pub channel: usize,
    /// 0-based repeat index
    pub repeat: u32,
}

impl MeasurementResult {
    /// Stamp a raw reading with the current sequencer position.
    pub fn from_reading(reading: AnalyzerReading, phase: Phase, channel: usize, repeat: u32) -> Self {
        Self {
            timestamp: reading.timestamp,
            components: reading.components,
            phase,
            channel,
            repeat,
        }
    }

    /// Normalised epoch seconds, or `None` when missing or unparsable.
    pub fn epoch_seconds(&self) -> Option<f64> {
        self.timestamp
            .as_ref()
            .and_then(|ts| normalize_timestamp(ts).ok())
    }

    /// Look up a component's concentration by label.
    pub fn ppm(&self, label: &str) -> Option<f64> {
        self.components
            .iter()
            .find(|c| c.label == label)
            .map(|c| c.ppm)
    }
}

/// Convert any supported timestamp shape into epoch seconds.
///
/// Naive date-time strings are interpreted as UTC.
pub fn normalize_timestamp(value: &TimestampValue) -> Result<f64, AcquisitionError> {
    match value {
        TimestampValue::Integer(secs) => Ok(*secs as f64),
        TimestampValue::Float(secs) if secs.is_finite() => Ok(*secs),
        TimestampValue::Float(_) => Err(AcquisitionError::InvalidTimestamp),
        TimestampValue::Text(text) => parse_timestamp_text(text.trim()),
    }
}

fn parse_timestamp_text(text: &str) -> Result<f64, AcquisitionError> {
    if text.is_empty() {
        return Err(AcquisitionError::InvalidTimestamp);
    }

    // Some firmware sends the epoch as a string.
    if let Ok(secs) = text.parse::<f64>() {
        return if secs.is_finite() {
            Ok(secs)
        } else {
            Err(AcquisitionError::InvalidTimestamp)
        };
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(to_epoch(dt.timestamp(), dt.timestamp_subsec_nanos()));
    }

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| {
            let utc = naive.and_utc();
            to_epoch(utc.timestamp(), utc.timestamp_subsec_nanos())
        })
        .ok_or(AcquisitionError::InvalidTimestamp)
}

fn to_epoch(secs: i64, nanos: u32) -> f64 {
    secs as f64 + f64::from(nanos) / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPOCH: f64 = 1_700_000_000.0;

    #[test]
    fn integer_epoch() {
        assert_eq!(normalize_timestamp(&1_700_000_000i64.into()), Ok(EPOCH));
    }

    #[test]
    fn float_epoch_keeps_fraction() {
        assert_eq!(normalize_timestamp(&1_700_000_000.25f64.into()), Ok(EPOCH + 0.25));
        assert!(normalize_timestamp(&f64::NAN.into()).is_err());
    }

    #[test]
    fn iso_and_space_separated_agree() {
        let iso = normalize_timestamp(&"2023-11-14T22:13:20".into()).unwrap();
        let spaced = normalize_timestamp(&"2023-11-14 22:13:20".into()).unwrap();
        assert_eq!(iso, EPOCH);
        assert_eq!(spaced, EPOCH);
    }

    #[test]
    fn rfc3339_with_offset() {
        let ts = normalize_timestamp(&"2023-11-15T00:13:20+02:00".into()).unwrap();
        assert_eq!(ts, EPOCH);
    }

    #[test]
    fn numeric_string() {
        assert_eq!(normalize_timestamp(&"1700000000".into()), Ok(EPOCH));
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(
            normalize_timestamp(&"garbage".into()),
            Err(AcquisitionError::InvalidTimestamp)
        );
        assert!(normalize_timestamp(&"".into()).is_err());
    }

    #[test]
    fn untagged_deserialization() {
        let values: Vec<TimestampValue> =
            serde_json::from_str(r#"[1700000000, 1700000000.5, "2023-11-14 22:13:20"]"#).unwrap();
        assert_eq!(values[0], TimestampValue::Integer(1_700_000_000));
        assert_eq!(values[1], TimestampValue::Float(1_700_000_000.5));
        assert_eq!(values[2], TimestampValue::Text("2023-11-14 22:13:20".into()));
    }
}
