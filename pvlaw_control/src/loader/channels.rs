//! Per-readback attribute files: setpoint offsets and despike eligibility.

use pvlaw_common::table::Table;
use tracing::warn;

use crate::error::ControlLawError;
use crate::model::ControlVector;

/// Apply `ControlName`/`Offset` rows as channel setpoints.
pub fn apply_offsets(table: &Table, readbacks: &mut ControlVector) -> Result<(), ControlLawError> {
    table.require_columns(&["ControlName", "Offset"])?;
    let names = table.strings("ControlName")?;
    let offsets = table.doubles("Offset")?;
    for (name, offset) in names.iter().zip(offsets) {
        match readbacks.position(name).and_then(|i| readbacks.get_mut(i)) {
            Some(ch) => ch.setpoint = offset,
            None => warn!(
                "{}: {name} is not a readback, offset ignored",
                table.path().display()
            ),
        }
    }
    Ok(())
}

/// Apply `ControlName`/`Despike` rows. Channels missing from the file are
/// not eligible once a file is given.
pub fn apply_despike_flags(
    table: &Table,
    readbacks: &mut ControlVector,
) -> Result<(), ControlLawError> {
    table.require_columns(&["ControlName", "Despike"])?;
    let names = table.strings("ControlName")?;
    let flags = table.flags("Despike")?;
    for ch in readbacks.iter_mut() {
        ch.despike = false;
    }
    for (name, flag) in names.iter().zip(flags) {
        match readbacks.position(name).and_then(|i| readbacks.get_mut(i)) {
            Some(ch) => ch.despike = flag,
            None => warn!(
                "{}: {name} is not a readback, despike flag ignored",
                table.path().display()
            ),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn readbacks() -> ControlVector {
        let n: Vec<String> = ["BPM1", "BPM2"].iter().map(|s| s.to_string()).collect();
        ControlVector::new(&n, &n).unwrap()
    }

    #[test]
    fn offsets_become_setpoints() {
        let t = Table::from_toml_str(
            "[columns]\nControlName = [\"BPM2\", \"BPM7\"]\nOffset = [0.25, 1.0]\n",
            Path::new("o.toml"),
        )
        .unwrap();
        let mut v = readbacks();
        apply_offsets(&t, &mut v).unwrap();
        assert_eq!(v.get(0).unwrap().setpoint, 0.0);
        assert_eq!(v.get(1).unwrap().setpoint, 0.25);
    }

    #[test]
    fn despike_file_restricts_eligibility() {
        let t = Table::from_toml_str(
            "[columns]\nControlName = [\"BPM1\"]\nDespike = [1]\n",
            Path::new("d.toml"),
        )
        .unwrap();
        let mut v = readbacks();
        assert_eq!(v.despike_mask(), vec![true, true]);
        apply_despike_flags(&t, &mut v).unwrap();
        assert_eq!(v.despike_mask(), vec![true, false]);
    }
}
