//! Filter coefficient file (`DeviceName`, `a0`, `a1`, …, `b0`, `b1`, …).
//!
//! The filter order on each side is set by the highest-numbered column
//! present. Gaps below it read as zero (with a warning). `a0` and `b0` are
//! mandatory and `a0` must be non-zero for every device.

use pvlaw_common::table::Table;
use tracing::warn;

use crate::error::ControlLawError;
use crate::kernel::filter::{FilterBank, IirFilter};
use crate::model::ControlVector;

/// Highest `k` among columns named `<prefix><k>`.
fn highest_index(table: &Table, prefix: char) -> Option<usize> {
    table
        .column_names()
        .filter_map(|n| n.strip_prefix(prefix)?.parse::<usize>().ok())
        .max()
}

/// Coefficient columns `prefix0..=order`, one vector per table row.
fn coefficient_rows(table: &Table, prefix: char) -> Result<Vec<Vec<f64>>, ControlLawError> {
    let first = format!("{prefix}0");
    if !table.has_column(&first) {
        return Err(ControlLawError::invalid(
            table.path(),
            format!("missing required column {first}"),
        ));
    }
    let order = highest_index(table, prefix).unwrap_or(0);

    let mut rows = vec![vec![0.0; order + 1]; table.rows()];
    for k in 0..=order {
        let name = format!("{prefix}{k}");
        if !table.has_column(&name) {
            warn!(
                "{}: column {name} missing, using zeros",
                table.path().display()
            );
            continue;
        }
        for (row, v) in rows.iter_mut().zip(table.doubles(&name)?) {
            row[k] = v;
        }
    }
    Ok(rows)
}

/// Build one filter per actuator.
pub fn load_filters(table: &Table, actuators: &ControlVector) -> Result<FilterBank, ControlLawError> {
    table.require_columns(&["DeviceName"])?;
    let devices = table.strings("DeviceName")?;
    let a_rows = coefficient_rows(table, 'a')?;
    let b_rows = coefficient_rows(table, 'b')?;

    let mut filters: Vec<Option<IirFilter>> = vec![None; actuators.len()];
    for (row, device) in devices.iter().enumerate() {
        let Some(i) = actuators.position(device) else {
            warn!(
                "{}: device {device} is not an actuator, ignored",
                table.path().display()
            );
            continue;
        };
        let a = a_rows[row].clone();
        if a[0] == 0.0 {
            return Err(ControlLawError::invalid(
                table.path(),
                format!("a0 is zero for {device}"),
            ));
        }
        filters[i] = Some(IirFilter::new(a, b_rows[row].clone()));
    }

    let unmatched: Vec<String> = actuators
        .iter()
        .zip(&filters)
        .filter(|(_, f)| f.is_none())
        .map(|(c, _)| c.symbolic.clone())
        .collect();
    if !unmatched.is_empty() {
        return Err(ControlLawError::Unmatched {
            file: table.path().to_path_buf(),
            names: unmatched,
        });
    }
    Ok(FilterBank::new(filters.into_iter().flatten().collect()))
}
