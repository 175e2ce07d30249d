//! Statistics log: RMS, mean, MAD and largest value per category.

use std::path::Path;

use super::csv::CsvFile;
use super::{Rotation, TIME_COLUMNS};
use crate::error::ControlLawError;
use crate::kernel::stats::Summary;

/// Vector categories summarized every iteration.
pub const CATEGORIES: [&str; 4] = ["Readback", "AdjustedReadback", "Control", "ControlDelta"];

const SUFFIXES: [&str; 5] = ["Rms", "Mean", "Mad", "Largest", "LargestName"];

/// Summaries of one iteration, in [`CATEGORIES`] order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IterationStats {
    pub readback: Summary,
    pub adjusted: Summary,
    pub control: Summary,
    pub delta: Summary,
}

impl IterationStats {
    fn summaries(&self) -> [&Summary; 4] {
        [&self.readback, &self.adjusted, &self.control, &self.delta]
    }
}

#[derive(Debug)]
pub struct StatisticsLog {
    file: CsvFile,
}

impl StatisticsLog {
    pub fn header() -> Vec<String> {
        let mut header: Vec<String> = TIME_COLUMNS.iter().map(|s| s.to_string()).collect();
        for cat in CATEGORIES {
            header.extend(SUFFIXES.iter().map(|s| format!("{cat}{s}")));
        }
        header
    }

    pub fn create(
        path: &Path,
        rotation: Rotation,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Self, ControlLawError> {
        Ok(Self {
            file: CsvFile::create(path, rotation, Self::header(), now)?,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn record(
        &mut self,
        snapshot: &super::Snapshot,
        stats: &IterationStats,
    ) -> Result<(), ControlLawError> {
        let mut fields: Vec<String> = snapshot
            .fields()
            .into_iter()
            .take(TIME_COLUMNS.len())
            .collect();
        for s in stats.summaries() {
            fields.push(s.rms.to_string());
            fields.push(s.mean.to_string());
            fields.push(s.mad.to_string());
            fields.push(s.largest.to_string());
            fields.push(s.largest_name.clone());
        }
        self.file.write_row(snapshot.time(), &fields)?;
        self.file.flush()
    }
}
