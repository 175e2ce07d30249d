//! Waveform index files (`DeviceName`, `Index`).
//!
//! Rows are sorted by `Index` before devices are mapped: `Index` is the
//! element position in the physical waveform, file order carries no
//! meaning.

use pvlaw_common::table::Table;

use crate::config::WaveformTestConfig;
use crate::error::ControlLawError;
use crate::model::range::{Wait, WaveformElement};
use crate::model::{ControlVector, Source, WaveformTest};

/// One `(device, element)` row.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    pub device: String,
    pub index: usize,
    /// Original file row, for range columns.
    pub row: usize,
}

/// Rows of an index file sorted by `Index`.
pub fn index_rows(table: &Table) -> Result<Vec<IndexRow>, ControlLawError> {
    table.require_columns(&["DeviceName", "Index"])?;
    let devices = table.strings("DeviceName")?;
    let indices = table.longs("Index")?;

    let mut rows = Vec::with_capacity(devices.len());
    for (row, (device, &index)) in devices.iter().zip(&indices).enumerate() {
        let index = usize::try_from(index).map_err(|_| {
            ControlLawError::invalid(table.path(), format!("row {row} ({device}): negative Index {index}"))
        })?;
        rows.push(IndexRow {
            device: device.clone(),
            index,
            row,
        });
    }
    rows.sort_by_key(|r| r.index);
    if let Some(w) = rows.windows(2).find(|w| w[0].index == w[1].index) {
        return Err(ControlLawError::invalid(
            table.path(),
            format!("Index {} used by both {} and {}", w[0].index, w[0].device, w[1].device),
        ));
    }
    Ok(rows)
}

/// Point the named channels of `vector` at elements of waveform `pv`.
///
/// # Errors
/// `Unmatched` naming every device that is not a channel of `vector`.
pub fn attach_waveform(
    vector: &mut ControlVector,
    pv: &str,
    table: &Table,
) -> Result<(), ControlLawError> {
    let rows = index_rows(table)?;
    let unmatched: Vec<String> = rows
        .iter()
        .filter(|r| vector.position(&r.device).is_none())
        .map(|r| r.device.clone())
        .collect();
    if !unmatched.is_empty() {
        return Err(ControlLawError::Unmatched {
            file: table.path().to_path_buf(),
            names: unmatched,
        });
    }

    let waveform = vector.add_waveform(pv);
    for r in &rows {
        if let Some(ch) = vector.position(&r.device).and_then(|i| vector.get_mut(i)) {
            if let Source::Waveform { waveform: other, .. } = ch.source {
                if other != waveform {
                    return Err(ControlLawError::invalid(
                        table.path(),
                        format!("{} is already fed by another waveform", r.device),
                    ));
                }
            }
            ch.source = Source::Waveform {
                waveform,
                index: r.index,
            };
        }
    }
    Ok(())
}

/// Build a waveform test from its index file and options.
pub fn load_waveform_test(
    config: &WaveformTestConfig,
    table: &Table,
) -> Result<WaveformTest, ControlLawError> {
    table.require_columns(&["MinimumValue", "MaximumValue"])?;
    let rows = index_rows(table)?;
    let min = table.doubles("MinimumValue")?;
    let max = table.doubles("MaximumValue")?;
    let ignore = if table.has_column("Ignore") {
        table.flags("Ignore")?
    } else {
        vec![false; table.rows()]
    };

    let elements = rows
        .into_iter()
        .map(|r| WaveformElement {
            name: r.device,
            index: r.index,
            min: min[r.row],
            max: max[r.row],
            ignore: ignore[r.row],
        })
        .collect();

    Ok(WaveformTest {
        pv: config.pv.clone(),
        elements,
        despike: config.despike.clone(),
        sleep: config.sleep.map(Wait::Seconds),
        hold_off: config.hold_off.map(Wait::Seconds),
        glitch_log: config.glitch_log,
        exit_on_failure: config.exit_on_failure,
        values: Vec::new(),
    })
}
