//! CSV writer with generation and daily rotation.

use chrono::{DateTime, NaiveDate, Utc};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use super::Rotation;
use crate::error::ControlLawError;

/// `base` with `-suffix` inserted before the extension.
pub fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let stem = base.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{stem}-{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{suffix}"),
    };
    base.with_file_name(name)
}

/// First `-NNNN` name that does not exist yet.
pub fn generation_path(base: &Path) -> PathBuf {
    (1u32..)
        .map(|n| with_suffix(base, &format!("{n:04}")))
        .find(|p| !p.exists())
        .unwrap_or_else(|| base.to_path_buf())
}

pub fn daily_path(base: &Path, date: NaiveDate) -> PathBuf {
    with_suffix(base, &date.format("%Y-%m-%d").to_string())
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// One logical CSV log, possibly spread over rotated files.
#[derive(Debug)]
pub struct CsvFile {
    base: PathBuf,
    rotation: Rotation,
    header: Vec<String>,
    path: PathBuf,
    day: Option<NaiveDate>,
    out: BufWriter<File>,
}

impl CsvFile {
    /// Open the log at `now` and write the header.
    pub fn create(
        base: &Path,
        rotation: Rotation,
        header: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, ControlLawError> {
        let day = (rotation == Rotation::Daily).then(|| now.date_naive());
        let path = match (rotation, day) {
            (Rotation::Generations, _) => generation_path(base),
            (Rotation::Daily, Some(d)) => daily_path(base, d),
            _ => base.to_path_buf(),
        };
        let out = Self::open(&path, rotation, &header)?;
        info!("writing {}", path.display());
        Ok(Self {
            base: base.to_path_buf(),
            rotation,
            header,
            path,
            day,
            out,
        })
    }

    fn open(path: &Path, rotation: Rotation, header: &[String]) -> Result<BufWriter<File>, ControlLawError> {
        let io_err = |source| ControlLawError::Output {
            path: path.to_path_buf(),
            source,
        };
        // Daily files are appended to when reopened the same day.
        let append = rotation == Rotation::Daily;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .map_err(io_err)?;
        let fresh = file.metadata().map_err(io_err)?.len() == 0;
        let mut out = BufWriter::new(file);
        if fresh {
            let line: Vec<String> = header.iter().map(|h| escape(h)).collect();
            writeln!(out, "{}", line.join(",")).map_err(io_err)?;
        }
        Ok(out)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    fn rotate_if_needed(&mut self, now: DateTime<Utc>) -> Result<(), ControlLawError> {
        if self.rotation != Rotation::Daily {
            return Ok(());
        }
        let today = now.date_naive();
        if self.day == Some(today) {
            return Ok(());
        }
        self.flush()?;
        let path = daily_path(&self.base, today);
        self.out = Self::open(&path, self.rotation, &self.header)?;
        info!("rotated to {}", path.display());
        self.path = path;
        self.day = Some(today);
        Ok(())
    }

    /// Append one row, rotating first if the date changed.
    pub fn write_row(&mut self, now: DateTime<Utc>, fields: &[String]) -> Result<(), ControlLawError> {
        self.rotate_if_needed(now)?;
        let line: Vec<String> = fields.iter().map(|f| escape(f)).collect();
        writeln!(self.out, "{}", line.join(",")).map_err(|source| ControlLawError::Output {
            path: self.path.clone(),
            source,
        })
    }

    /// Append a `# text` line.
    pub fn write_comment(&mut self, now: DateTime<Utc>, text: &str) -> Result<(), ControlLawError> {
        self.rotate_if_needed(now)?;
        writeln!(self.out, "# {text}").map_err(|source| ControlLawError::Output {
            path: self.path.clone(),
            source,
        })
    }

    pub fn flush(&mut self) -> Result<(), ControlLawError> {
        self.out.flush().map_err(|source| ControlLawError::Output {
            path: self.path.clone(),
            source,
        })
    }
}
