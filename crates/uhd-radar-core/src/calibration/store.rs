//! Persistent table of measured pipeline delays
//!
//! Records are keyed by radio identity, master clock rate, and sample rate,
//! compared exactly. The whole table is read at the start of a sweep, merged
//! in memory and rewritten in one piece afterwards. Concurrent writers are not
//! supported.
//!
//! ## File format
//!
//! ```json
//! {
//!   "records": [
//!     {
//!       "radio": "B210-315EED9",
//!       "master_clock_rate": 50000000.0,
//!       "sample_rate": 50000000.0,
//!       "delay_samples": 66,
//!       "measured_at": "2026-10-14T09:12:44Z"
//!     }
//!   ]
//! }
//! ```

use crate::error::RadarResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Identifies the configuration a delay was measured in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationKey {
    /// Radio identity string
    pub radio: String,
    pub master_clock_rate: f64,
    pub sample_rate: f64,
}

impl CalibrationKey {
    pub fn new(radio: impl Into<String>, master_clock_rate: f64, sample_rate: f64) -> Self {
        Self {
            radio: radio.into(),
            master_clock_rate,
            sample_rate,
        }
    }
}

/// One measured delay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    #[serde(flatten)]
    pub key: CalibrationKey,
    /// Transmit-to-receive delay in samples
    pub delay_samples: i64,
    /// When the delay was last measured
    pub measured_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    records: Vec<CalibrationRecord>,
}

/// Ordered delay table backed by a JSON file
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    path: PathBuf,
    records: Vec<CalibrationRecord>,
}

impl CalibrationStore {
    /// Empty store that will be saved to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
        }
    }

    /// Per-user store location: `<data_dir>/uhd-radar/delay_calibration.json`
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("uhd-radar")
            .join("delay_calibration.json")
    }

    /// Read the table at `path`.
    ///
    /// A missing file yields an empty table. A file that exists but cannot be
    /// parsed is an error, so a later save never overwrites it unnoticed.
    pub fn load(path: impl Into<PathBuf>) -> RadarResult<Self> {
        let path = path.into();
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No calibration file found, starting empty");
                return Ok(Self::new(path));
            }
            Err(e) => return Err(e.into()),
        };
        let file: StoreFile = serde_json::from_str(&contents)?;
        tracing::info!(
            path = %path.display(),
            records = file.records.len(),
            "Loaded calibration table"
        );
        Ok(Self {
            path,
            records: file.records,
        })
    }

    /// Rewrite the whole table, creating parent directories if needed
    pub fn save(&self) -> RadarResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = StoreFile {
            records: self.records.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.path, json)?;
        tracing::info!(
            path = %self.path.display(),
            records = self.records.len(),
            "Calibration table saved"
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[CalibrationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Overwrite the delay of an exact key match, or append a new record.
    ///
    /// Returns `true` when an existing record was updated.
    pub fn upsert(&mut self, key: CalibrationKey, delay_samples: i64) -> bool {
        let measured_at = Utc::now();
        if let Some(record) = self.records.iter_mut().find(|r| r.key == key) {
            tracing::debug!(radio = %key.radio, sample_rate = key.sample_rate, delay_samples, "Updating calibration record");
            record.delay_samples = delay_samples;
            record.measured_at = measured_at;
            true
        } else {
            tracing::debug!(radio = %key.radio, sample_rate = key.sample_rate, delay_samples, "Adding calibration record");
            self.records.push(CalibrationRecord {
                key,
                delay_samples,
                measured_at,
            });
            false
        }
    }

    pub fn lookup(&self, key: &CalibrationKey) -> Option<i64> {
        self.records
            .iter()
            .find(|r| r.key == *key)
            .map(|r| r.delay_samples)
    }

    /// Stored delay for `key`, or 0 with a warning when none was measured
    pub fn delay_or_default(&self, key: &CalibrationKey) -> i64 {
        self.lookup(key).unwrap_or_else(|| {
            tracing::warn!(
                radio = %key.radio,
                master_clock_rate = key.master_clock_rate,
                sample_rate = key.sample_rate,
                "No calibration record for this configuration, assuming zero delay"
            );
            0
        })
    }
}
