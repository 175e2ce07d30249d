//! Feed-forward lookup tables.
//!
//! One file drives one actuator from one or two readbacks.
//!
//! ```toml
//! [parameters]
//! Readback1Name = "RF:GAP:A"
//! Readback2Name = "RF:GAP:B"
//! ActuatorName = "S1:QF:SetCurrent"
//! ReadbackChangeThreshold = 0.01
//! ActuatorChangeLimit = 0.5
//! ActuatorLowerLimit = 0.0
//! ActuatorUpperLimit = 120.0
//!
//! [columns]
//! Readback1Value = [0.0, 0.0, 1.0, 1.0]
//! Readback2Value = [0.0, 1.0, 0.0, 1.0]
//! ActuatorValue  = [10.0, 11.0, 12.0, 13.0]
//! ```
//!
//! A 1-D file names `ReadbackName` and has a `ReadbackValue` column.

use pvlaw_common::table::Table;
use std::path::{Path, PathBuf};

use crate::error::ControlLawError;
use crate::kernel::interp::{Grid2d, InterpError, InterpStatus, Table1d};

/// Interpolation table of one file.
#[derive(Debug, Clone)]
pub enum Lookup {
    OneD(Table1d),
    TwoD(Grid2d),
}

/// New actuator value computed from one table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Interpolated value before limits.
    pub target: f64,
    /// Value to command after the absolute and change limits.
    pub value: f64,
    pub status: InterpStatus,
}

/// One loaded feed-forward file.
#[derive(Debug, Clone)]
pub struct FeedforwardTable {
    pub file: PathBuf,
    /// One or two readback PVs, slow axis first.
    pub readbacks: Vec<String>,
    pub actuator: String,
    pub lookup: Lookup,
    /// Minimum readback move that triggers a new evaluation.
    pub change_threshold: Option<f64>,
    /// Largest actuator change per iteration.
    pub change_limit: Option<f64>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    last_readbacks: Option<Vec<f64>>,
}

fn required_str(table: &Table, name: &str) -> Result<String, ControlLawError> {
    table
        .parameter_str(name)
        .map(str::to_string)
        .ok_or_else(|| ControlLawError::invalid(table.path(), format!("missing parameter {name}")))
}

fn grid_error(file: &Path) -> impl FnOnce(InterpError) -> ControlLawError + '_ {
    move |source| ControlLawError::Grid {
        file: file.to_path_buf(),
        source,
    }
}

/// Build a feed-forward table from a tabular file.
///
/// # Errors
/// Missing parameters or columns, inconsistent limits, and tables that are
/// not strictly increasing (1-D) or a sorted rectangular grid (2-D).
pub fn load_table(table: &Table) -> Result<FeedforwardTable, ControlLawError> {
    let file = table.path();
    let actuator = required_str(table, "ActuatorName")?;
    table.require_columns(&["ActuatorValue"])?;
    let z = table.doubles("ActuatorValue")?;

    let (readbacks, lookup) = if table.parameter_str("Readback2Name").is_some() {
        let names = vec![
            required_str(table, "Readback1Name")?,
            required_str(table, "Readback2Name")?,
        ];
        table.require_columns(&["Readback1Value", "Readback2Value"])?;
        let x1 = table.doubles("Readback1Value")?;
        let x2 = table.doubles("Readback2Value")?;
        let grid = Grid2d::gridify(&x1, &x2, &z).map_err(grid_error(file))?;
        (names, Lookup::TwoD(grid))
    } else {
        let name = table
            .parameter_str("ReadbackName")
            .or_else(|| table.parameter_str("Readback1Name"))
            .map(str::to_string)
            .ok_or_else(|| ControlLawError::invalid(file, "missing parameter ReadbackName"))?;
        let column = if table.has_column("ReadbackValue") {
            "ReadbackValue"
        } else {
            "Readback1Value"
        };
        table.require_columns(&[column])?;
        let x = table.doubles(column)?;
        let t = Table1d::new(x, z).map_err(grid_error(file))?;
        (vec![name], Lookup::OneD(t))
    };

    let change_threshold = table.parameter_f64("ReadbackChangeThreshold");
    if let Some(t) = change_threshold {
        if !(t.is_finite() && t >= 0.0) {
            return Err(ControlLawError::invalid(
                file,
                format!("ReadbackChangeThreshold must be >= 0 (got {t})"),
            ));
        }
    }
    let change_limit = table.parameter_f64("ActuatorChangeLimit");
    if let Some(l) = change_limit {
        if !(l.is_finite() && l > 0.0) {
            return Err(ControlLawError::invalid(
                file,
                format!("ActuatorChangeLimit must be > 0 (got {l})"),
            ));
        }
    }
    let lower = table.parameter_f64("ActuatorLowerLimit");
    let upper = table.parameter_f64("ActuatorUpperLimit");
    if let (Some(lo), Some(hi)) = (lower, upper) {
        if lo > hi {
            return Err(ControlLawError::invalid(
                file,
                format!("ActuatorLowerLimit ({lo}) exceeds ActuatorUpperLimit ({hi})"),
            ));
        }
    }

    Ok(FeedforwardTable {
        file: file.to_path_buf(),
        readbacks,
        actuator,
        lookup,
        change_threshold,
        change_limit,
        lower,
        upper,
        last_readbacks: None,
    })
}

impl FeedforwardTable {
    pub fn dimensions(&self) -> usize {
        self.readbacks.len()
    }

    /// Whether `readbacks` moved past the change threshold since the last
    /// evaluation. Always true for the first evaluation.
    pub fn moved(&self, readbacks: &[f64]) -> bool {
        match (&self.last_readbacks, self.change_threshold) {
            (Some(last), Some(threshold)) => readbacks
                .iter()
                .zip(last)
                .any(|(now, then)| (now - then).abs() > threshold),
            _ => true,
        }
    }

    /// New actuator value for `readbacks` (parallel to `self.readbacks`),
    /// or `None` when the readbacks have not moved enough.
    ///
    /// # Errors
    /// Interpolation failures.
    pub fn evaluate(
        &mut self,
        readbacks: &[f64],
        current: f64,
        order: usize,
    ) -> Result<Option<Evaluation>, InterpError> {
        if !self.moved(readbacks) {
            return Ok(None);
        }
        let (target, status) = match &self.lookup {
            Lookup::OneD(t) => t.interpolate(readbacks[0], order)?,
            Lookup::TwoD(g) => g.interpolate(readbacks[0], readbacks[1], order)?,
        };

        let mut value = target;
        if let Some(lo) = self.lower {
            value = value.max(lo);
        }
        if let Some(hi) = self.upper {
            value = value.min(hi);
        }
        if let Some(limit) = self.change_limit {
            if current.is_finite() {
                value = current + (value - current).clamp(-limit, limit);
            }
        }
        self.last_readbacks = Some(readbacks.to_vec());
        Ok(Some(Evaluation {
            target,
            value,
            status,
        }))
    }
}
