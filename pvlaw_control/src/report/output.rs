//! Time-series log: one row per iteration with every readback, actuator and
//! test value.

use std::path::Path;

use super::csv::CsvFile;
use super::{Rotation, Snapshot, snapshot_header};
use crate::error::ControlLawError;

#[derive(Debug)]
pub struct TimeSeriesLog {
    file: CsvFile,
    width: usize,
}

impl TimeSeriesLog {
    pub fn create(
        path: &Path,
        rotation: Rotation,
        columns: &[String],
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Self, ControlLawError> {
        Ok(Self {
            file: CsvFile::create(path, rotation, snapshot_header(columns), now)?,
            width: columns.len(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn record(&mut self, snapshot: &Snapshot) -> Result<(), ControlLawError> {
        debug_assert_eq!(snapshot.values.len(), self.width);
        self.file.write_row(snapshot.time(), &snapshot.fields())?;
        self.file.flush()
    }
}
