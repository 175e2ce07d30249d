//! Glitch capture.
//!
//! Snapshots of quiet iterations are retained in a fixed-depth ring. When a
//! glitch is declared the ring is replayed oldest first into the glitch log
//! and emptied, followed by the triggering snapshot, so the log shows what
//! led up to the event and the event itself.

use std::path::Path;
use tracing::warn;

use super::csv::CsvFile;
use super::{Rotation, Snapshot, snapshot_header};
use crate::error::ControlLawError;

/// Fixed-depth history of snapshots.
#[derive(Debug, Clone)]
pub struct GlitchRing {
    slots: Vec<Option<Snapshot>>,
    /// Next slot to write; wraps modulo the depth.
    row_pointer: usize,
    /// Occupied slots, at most the depth.
    avail_rows: usize,
}

impl GlitchRing {
    pub fn new(rows: usize) -> Self {
        Self {
            slots: vec![None; rows.max(1)],
            row_pointer: 0,
            avail_rows: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.slots.len()
    }

    pub fn row_pointer(&self) -> usize {
        self.row_pointer
    }

    pub fn avail_rows(&self) -> usize {
        self.avail_rows
    }

    /// Store a snapshot, overwriting the oldest when full.
    pub fn push(&mut self, snapshot: Snapshot) {
        self.slots[self.row_pointer] = Some(snapshot);
        self.row_pointer = (self.row_pointer + 1) % self.slots.len();
        self.avail_rows = (self.avail_rows + 1).min(self.slots.len());
    }

    /// Remove every retained snapshot, oldest first.
    pub fn drain(&mut self) -> Vec<Snapshot> {
        let rows = self.slots.len();
        let start = (self.row_pointer + rows - self.avail_rows) % rows;
        let out = (0..self.avail_rows)
            .filter_map(|k| self.slots[(start + k) % rows].take())
            .collect();
        self.row_pointer = 0;
        self.avail_rows = 0;
        out
    }
}

/// Conditions that declare a glitch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlitchThresholds {
    pub readback_rms: Option<f64>,
    pub delta_rms: Option<f64>,
}

impl GlitchThresholds {
    /// Reason for a glitch this iteration, if any.
    pub fn reason(&self, readback_rms: f64, delta_rms: f64, test_flagged: bool) -> Option<String> {
        if let Some(limit) = self.readback_rms {
            if readback_rms > limit {
                return Some(format!("readback RMS {readback_rms} above {limit}"));
            }
        }
        if let Some(limit) = self.delta_rms {
            if delta_rms > limit {
                return Some(format!("control delta RMS {delta_rms} above {limit}"));
            }
        }
        test_flagged.then(|| "test with GlitchLog out of range".to_string())
    }
}

/// Glitch log file plus its ring.
#[derive(Debug)]
pub struct GlitchLog {
    file: CsvFile,
    ring: GlitchRing,
    thresholds: GlitchThresholds,
}

impl GlitchLog {
    pub fn create(
        path: &Path,
        rotation: Rotation,
        columns: &[String],
        rows: usize,
        thresholds: GlitchThresholds,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Self, ControlLawError> {
        Ok(Self {
            file: CsvFile::create(path, rotation, snapshot_header(columns), now)?,
            ring: GlitchRing::new(rows),
            thresholds,
        })
    }

    pub fn ring(&self) -> &GlitchRing {
        &self.ring
    }

    pub fn thresholds(&self) -> &GlitchThresholds {
        &self.thresholds
    }

    /// Retain `snapshot`, or flush the ring and then `snapshot` when
    /// `reason` is set. Returns the number of rows written.
    pub fn record(&mut self, snapshot: Snapshot, reason: Option<&str>) -> Result<usize, ControlLawError> {
        let Some(reason) = reason else {
            self.ring.push(snapshot);
            return Ok(0);
        };
        let history = self.ring.drain();
        warn!(
            "glitch at step {}: {reason}; writing {} rows of history",
            snapshot.step,
            history.len()
        );
        let now = snapshot.time();
        self.file
            .write_comment(now, &format!("glitch at step {}: {reason}", snapshot.step))?;
        for row in history.iter().chain(std::iter::once(&snapshot)) {
            self.file.write_row(now, &row.fields())?;
        }
        self.file.flush()?;
        Ok(history.len() + 1)
    }
}
