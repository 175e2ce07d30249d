//! Control-action audit log.

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;

use super::Rotation;
use super::csv::CsvFile;
use crate::error::ControlLawError;

pub const AUDIT_COLUMNS: [&str; 5] = ["Step", "Time", "ControlName", "OldValue", "NewValue"];

#[derive(Debug)]
pub struct AuditLog {
    file: CsvFile,
}

impl AuditLog {
    pub fn create(path: &Path, rotation: Rotation, now: DateTime<Utc>) -> Result<Self, ControlLawError> {
        let header = AUDIT_COLUMNS.iter().map(|s| s.to_string()).collect();
        Ok(Self {
            file: CsvFile::create(path, rotation, header, now)?,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// One row per channel whose value changed. Returns the row count.
    pub fn record(
        &mut self,
        step: u64,
        now: DateTime<Utc>,
        names: &[String],
        old: &[f64],
        new: &[f64],
    ) -> Result<usize, ControlLawError> {
        let time = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut written = 0;
        for ((name, &o), &n) in names.iter().zip(old).zip(new) {
            if o.to_bits() == n.to_bits() {
                continue;
            }
            self.file.write_row(
                now,
                &[
                    step.to_string(),
                    time.clone(),
                    name.clone(),
                    o.to_string(),
                    n.to_string(),
                ],
            )?;
            written += 1;
        }
        if written > 0 {
            self.file.flush()?;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_changes_are_logged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.csv");
        let now = DateTime::from_timestamp(0, 0).unwrap();
        let mut log = AuditLog::create(&path, Rotation::None, now).unwrap();
        let names = vec!["HCM1".to_string(), "HCM2".to_string()];
        assert_eq!(log.record(7, now, &names, &[1.0, 2.0], &[1.0, 2.5]).unwrap(), 1);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "Step,Time,ControlName,OldValue,NewValue\n7,1970-01-01T00:00:00.000Z,HCM2,2,2.5\n"
        );
    }
}
