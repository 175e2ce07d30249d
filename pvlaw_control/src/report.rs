//! Per-iteration output files.
//!
//! - [`csv`] - Rotating CSV writer shared by every log
//! - [`output`] - Time-series log of every value
//! - [`stats`] - Summary statistics per category
//! - [`glitch`] - Pre-event history ring and glitch log
//! - [`audit`] - One row per commanded actuator change

pub mod audit;
pub mod csv;
pub mod glitch;
pub mod output;
pub mod stats;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Output file naming policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    /// Use the configured name, truncating any existing file.
    #[default]
    None,
    /// First unused `-NNNN` suffix at open.
    Generations,
    /// `-YYYY-MM-DD` suffix, reopened when the date changes.
    Daily,
}

/// Values of one iteration, in log column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub step: u64,
    /// Seconds since the loop started.
    pub elapsed: f64,
    /// Seconds since the Unix epoch.
    pub epoch: f64,
    pub values: Vec<f64>,
}

impl Snapshot {
    /// UTC time of the snapshot.
    pub fn time(&self) -> DateTime<Utc> {
        let secs = self.epoch.floor();
        let nanos = ((self.epoch - secs) * 1e9) as u32;
        DateTime::from_timestamp(secs as i64, nanos.min(999_999_999)).unwrap_or_default()
    }

    /// Leading fixed columns followed by the values.
    pub fn fields(&self) -> Vec<String> {
        let mut fields = Vec::with_capacity(self.values.len() + 4);
        fields.push(self.step.to_string());
        fields.push(format!("{:.6}", self.elapsed));
        fields.push(format!("{:.6}", self.epoch));
        fields.push(self.time().to_rfc3339_opts(SecondsFormat::Millis, true));
        fields.extend(self.values.iter().map(|v| v.to_string()));
        fields
    }
}

/// Fixed leading column names of every time-series file.
pub const TIME_COLUMNS: [&str; 4] = ["Step", "ElapsedTime", "EpochTime", "TimeStamp"];

/// Full header for a snapshot file with `columns` values.
pub fn snapshot_header(columns: &[String]) -> Vec<String> {
    TIME_COLUMNS
        .iter()
        .map(|s| s.to_string())
        .chain(columns.iter().cloned())
        .collect()
}
