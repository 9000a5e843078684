//! Tab-separated measurement log.
//!
//! One file per run named `acquisition_log_<YYYYmmdd_HHMMSS>_<6 hex>.csv`.
//! The component columns are fixed by the first row written; later rows are
//! projected onto them so a firmware that reports a different subset mid-run
//! cannot shift columns.

use crate::error::AppResult;
use crate::measurement::{MeasurementResult, TimestampValue};
use crate::storage::{MeasurementRecorder, RecorderFactory};
use chrono::{DateTime, Local};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Columns preceding the component labels.
pub const FIXED_COLUMNS: [&str; 4] = ["timestamp", "phase", "channel", "repeat"];

/// CSV writer with a header locked on first use.
pub struct CsvMeasurementLogger {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
    labels: Option<Vec<String>>,
    rows: usize,
}

impl CsvMeasurementLogger {
    /// Create a new log file inside `dir`.
    pub fn create(dir: impl AsRef<Path>) -> AppResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let suffix = uuid::Uuid::new_v4().simple().to_string()[..6].to_uppercase();
        let file_name = format!(
            "acquisition_log_{}_{}.csv",
            Local::now().format("%Y%m%d_%H%M%S"),
            suffix
        );
        let path = dir.join(file_name);
        let writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(&path)?;

        info!(path = %path.display(), "measurement log opened");
        Ok(Self {
            path,
            writer: Some(writer),
            labels: None,
            rows: 0,
        })
    }

    /// Component labels fixed by the first row.
    pub fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }

    /// Data rows written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Text timestamps are written as the device sent them. Numeric epochs are
    /// rendered in UTC, the same zone naive text is normalised in.
    fn format_timestamp(result: &MeasurementResult) -> String {
        let Some(epoch) = result.epoch_seconds() else {
            return String::new();
        };
        if let Some(TimestampValue::Text(text)) = &result.timestamp {
            return text.trim().to_string();
        }
        let secs = epoch.floor() as i64;
        let nanos = ((epoch - epoch.floor()) * 1e9) as u32;
        DateTime::from_timestamp(secs, nanos)
            .map(|utc| utc.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default()
    }
}

impl MeasurementRecorder for CsvMeasurementLogger {
    fn record(&mut self, result: &MeasurementResult) -> AppResult<()> {
        let Some(writer) = self.writer.as_mut() else {
            debug!("measurement log already closed, row dropped");
            return Ok(());
        };

        let labels = match &self.labels {
            Some(labels) => labels.clone(),
            None => {
                let labels: Vec<String> =
                    result.components.iter().map(|c| c.label.clone()).collect();
                let header = FIXED_COLUMNS
                    .iter()
                    .map(|c| c.to_string())
                    .chain(labels.iter().cloned());
                writer.write_record(header)?;
                self.labels = Some(labels.clone());
                labels
            }
        };

        let mut row = vec![
            Self::format_timestamp(result),
            result.phase.to_string(),
            result.channel.to_string(),
            result.repeat.to_string(),
        ];
        row.extend(
            labels
                .iter()
                .map(|label| result.ppm(label).map(|ppm| ppm.to_string()).unwrap_or_default()),
        );
        writer.write_record(&row)?;
        writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            info!(path = %self.path.display(), rows = self.rows, "measurement log closed");
        }
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Opens a [`CsvMeasurementLogger`] per run in a fixed directory.
#[derive(Debug, Clone)]
pub struct CsvRecorderFactory {
    dir: PathBuf,
}

impl CsvRecorderFactory {
    /// Logs go to `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl RecorderFactory for CsvRecorderFactory {
    fn open(&self) -> AppResult<Box<dyn MeasurementRecorder>> {
        Ok(Box::new(CsvMeasurementLogger::create(&self.dir)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::Phase;
    use crate::measurement::Component;

    fn result(components: Vec<Component>) -> MeasurementResult {
        MeasurementResult {
            timestamp: Some(1_700_000_000i64.into()),
            components,
            phase: Phase::Measuring,
            channel: 3,
            repeat: 0,
        }
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn file_name_follows_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let logger = CsvMeasurementLogger::create(dir.path()).unwrap();
        let name = logger.path().unwrap().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("acquisition_log_"));
        assert!(name.ends_with(".csv"));
        // acquisition_log_ + 15 + _ + 6 + .csv
        assert_eq!(name.len(), 16 + 15 + 1 + 6 + 4);
    }

    #[test]
    fn header_is_locked_by_first_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = CsvMeasurementLogger::create(dir.path()).unwrap();

        logger
            .record(&result(vec![Component::new("A", 1.5), Component::new("B", 2.0)]))
            .unwrap();
        logger
            .record(&result(vec![Component::new("A", 3.25), Component::new("C", 9.0)]))
            .unwrap();
        logger.close().unwrap();

        let rows = read_rows(logger.path().unwrap());
        assert_eq!(rows[0], vec!["timestamp", "phase", "channel", "repeat", "A", "B"]);
        assert_eq!(&rows[1][1..], &["MEASURING", "3", "0", "1.5", "2"]);
        assert_eq!(&rows[2][1..], &["MEASURING", "3", "0", "3.25", ""]);
        assert_eq!(rows.len(), 3);
        assert_eq!(logger.labels().unwrap(), &["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn timestamps_are_written_without_host_offset() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = CsvMeasurementLogger::create(dir.path()).unwrap();

        let mut text = result(vec![Component::new("A", 1.0)]);
        text.timestamp = Some("2023-11-14 22:13:20".into());
        logger.record(&text).unwrap();
        let mut iso = result(vec![Component::new("A", 2.0)]);
        iso.timestamp = Some(" 2023-11-14T22:13:21 ".into());
        logger.record(&iso).unwrap();
        logger.record(&result(vec![Component::new("A", 3.0)])).unwrap();
        let mut garbage = result(vec![Component::new("A", 4.0)]);
        garbage.timestamp = Some("garbage".into());
        logger.record(&garbage).unwrap();
        logger.close().unwrap();

        let rows = read_rows(logger.path().unwrap());
        assert_eq!(rows[1][0], "2023-11-14 22:13:20");
        assert_eq!(rows[2][0], "2023-11-14T22:13:21");
        // 1_700_000_000 is 2023-11-14 22:13:20 UTC.
        assert_eq!(rows[3][0], "2023-11-14 22:13:20");
        assert_eq!(rows[4][0], "");
    }

    #[test]
    fn rows_after_close_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = CsvMeasurementLogger::create(dir.path()).unwrap();
        logger.close().unwrap();
        logger.record(&result(vec![Component::new("A", 1.0)])).unwrap();
        assert_eq!(logger.rows(), 0);
    }

    #[test]
    fn factory_opens_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let factory = CsvRecorderFactory::new(dir.path().join("logs"));
        let a = factory.open().unwrap();
        let b = factory.open().unwrap();
        assert_ne!(a.path(), b.path());
    }
}
