//! Limit blocks: scalar, min/max pair, or per-channel file.
//!
//! A per-channel file has a `ControlName` column and either the kind's value
//! column (`DeltaLimit`, `ActionLimit`, `ReadbackLimit`; symmetric) or a
//! `minValue`/`maxValue` pair. Channels absent from the file are unlimited.

use pvlaw_common::config::SearchPath;
use pvlaw_common::table::Table;
use tracing::warn;

use crate::config::LimitSpec;
use crate::error::ControlLawError;
use crate::model::{Bounds, ControlVector, Limits};

/// Which limit a block configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    Delta,
    Action,
    Readback,
    Control,
}

impl LimitKind {
    /// Symmetric value column accepted in a per-channel file.
    pub fn value_column(self) -> Option<&'static str> {
        match self {
            Self::Delta => Some("DeltaLimit"),
            Self::Action => Some("ActionLimit"),
            Self::Readback => Some("ReadbackLimit"),
            Self::Control => None,
        }
    }
}

/// Resolve one `[limits.*]` block against `vector`.
pub fn load_limits(
    spec: &LimitSpec,
    kind: LimitKind,
    vector: &ControlVector,
    search: &SearchPath,
) -> Result<Limits, ControlLawError> {
    if let Some(v) = spec.value {
        return Ok(Limits::Scalar(v));
    }
    if let (Some(min), Some(max)) = (spec.min, spec.max) {
        return Ok(Limits::MinMax(Bounds { min, max }));
    }
    match &spec.file {
        Some(file) => {
            let table = Table::read(&search.resolve(file)?)?;
            limits_from_table(&table, kind, vector)
        }
        None => Err(ControlLawError::invalid(
            "<command file>",
            format!("{kind:?} limit block is empty"),
        )),
    }
}

pub fn limits_from_table(
    table: &Table,
    kind: LimitKind,
    vector: &ControlVector,
) -> Result<Limits, ControlLawError> {
    table.require_columns(&["ControlName"])?;
    let names = table.strings("ControlName")?;

    let bounds: Vec<Bounds> = match kind.value_column().filter(|c| table.has_column(c)) {
        Some(column) => table
            .doubles(column)?
            .into_iter()
            .map(Bounds::symmetric)
            .collect(),
        None => {
            table.require_columns(&["minValue", "maxValue"])?;
            let min = table.doubles("minValue")?;
            let max = table.doubles("maxValue")?;
            min.into_iter()
                .zip(max)
                .map(|(min, max)| Bounds { min, max })
                .collect()
        }
    };

    let mut per_channel = vec![None; vector.len()];
    for (row, (name, b)) in names.iter().zip(bounds).enumerate() {
        if !(b.min <= b.max) {
            return Err(ControlLawError::invalid(
                table.path(),
                format!("row {row} ({name}): min {} exceeds max {}", b.min, b.max),
            ));
        }
        if kind == LimitKind::Delta && (b.min > 0.0 || b.max < 0.0) {
            return Err(ControlLawError::invalid(
                table.path(),
                format!("row {row} ({name}): delta interval must contain zero"),
            ));
        }
        match vector.position(name) {
            Some(i) => per_channel[i] = Some(b),
            None => warn!(
                "{}: {name} is not a known channel, limit ignored",
                table.path().display()
            ),
        }
    }
    Ok(Limits::PerChannel(per_channel))
}
