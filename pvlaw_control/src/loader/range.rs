//! Scalar test-range file.
//!
//! Required: `ControlName`, `MinimumValue`, `MaximumValue`. Optional:
//! `SleepTime` or `SleepIntervals`, `ResetTime`, `HoldOffTime` or
//! `HoldOffIntervals`, `Despike`, `GlitchLog`, `ExitOnFailure`.

use pvlaw_common::table::Table;
use std::time::Duration;

use crate::error::ControlLawError;
use crate::kernel::despike::DespikeParams;
use crate::model::range::Wait;
use crate::model::{RangeTest, TestFlags, TestSet};

/// Optional wait column given in seconds or in intervals (seconds win).
fn wait_column(
    table: &Table,
    seconds: &str,
    intervals: &str,
) -> Result<Option<Vec<Wait>>, ControlLawError> {
    if table.has_column(seconds) {
        let v = table.doubles(seconds)?;
        for (row, &secs) in v.iter().enumerate() {
            checked_seconds(table, seconds, row, secs)?;
        }
        return Ok(Some(v.into_iter().map(Wait::Seconds).collect()));
    }
    if table.has_column(intervals) {
        let v = table.doubles(intervals)?;
        return Ok(Some(v.into_iter().map(Wait::Intervals).collect()));
    }
    Ok(None)
}

/// Positive `secs` must fit in a `Duration`; zero, negative and NaN mean
/// "not set".
fn checked_seconds(
    table: &Table,
    column: &str,
    row: usize,
    secs: f64,
) -> Result<Option<Duration>, ControlLawError> {
    if !(secs > 0.0) {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs).map(Some).map_err(|_| {
        ControlLawError::invalid(
            table.path(),
            format!("row {row}: {column} {secs} is not a valid duration"),
        )
    })
}

fn flag_column(table: &Table, name: &str) -> Result<Option<Vec<bool>>, ControlLawError> {
    if table.has_column(name) {
        Ok(Some(table.flags(name)?))
    } else {
        Ok(None)
    }
}

pub fn load_tests(table: &Table, despike: Option<DespikeParams>) -> Result<TestSet, ControlLawError> {
    table.require_columns(&["ControlName", "MinimumValue", "MaximumValue"])?;
    let names = table.strings("ControlName")?;
    let min = table.doubles("MinimumValue")?;
    let max = table.doubles("MaximumValue")?;

    let sleep = wait_column(table, "SleepTime", "SleepIntervals")?;
    let hold_off = wait_column(table, "HoldOffTime", "HoldOffIntervals")?;
    let reset = if table.has_column("ResetTime") {
        Some(table.doubles("ResetTime")?)
    } else {
        None
    };
    let despike_flags = flag_column(table, "Despike")?;
    let glitch = flag_column(table, "GlitchLog")?;
    let exit = flag_column(table, "ExitOnFailure")?;

    let mut flags = TestFlags::empty();
    let mut tests = Vec::with_capacity(names.len());
    for (row, name) in names.iter().enumerate() {
        if !(min[row] <= max[row]) {
            return Err(ControlLawError::invalid(
                table.path(),
                format!("row {row} ({name}): minimum {} exceeds maximum {}", min[row], max[row]),
            ));
        }
        let mut t = RangeTest::new(name, min[row], max[row]);
        if let Some(v) = &sleep {
            t.sleep = Some(v[row]);
            flags |= TestFlags::SLEEP;
        }
        if let Some(v) = &hold_off {
            t.hold_off = Some(v[row]);
            flags |= TestFlags::HOLD_OFF;
        }
        if let Some(v) = &reset {
            t.reset = checked_seconds(table, "ResetTime", row, v[row])?;
            flags |= TestFlags::RESET;
        }
        if let Some(v) = &despike_flags {
            t.despike = v[row];
            flags |= TestFlags::DESPIKE;
        }
        if let Some(v) = &glitch {
            t.glitch_log = v[row];
            flags |= TestFlags::GLITCH_LOG;
        }
        if let Some(v) = &exit {
            t.exit_on_failure = v[row];
            flags |= TestFlags::EXIT_ON_FAILURE;
        }
        tests.push(t);
    }

    Ok(TestSet {
        tests,
        flags,
        despike,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn optional_columns_set_flags() {
        let t = Table::from_toml_str(
            r#"
[columns]
ControlName = ["S:DCCT", "S:VAC"]
MinimumValue = [10.0, 0.0]
MaximumValue = [500.0, 1e-8]
SleepIntervals = [2, 0]
ResetTime = [30.0, 0.0]
ExitOnFailure = ["n", "y"]
"#,
            Path::new("tests.toml"),
        )
        .unwrap();
        let set = load_tests(&t, None).unwrap();
        assert_eq!(
            set.flags,
            TestFlags::SLEEP | TestFlags::RESET | TestFlags::EXIT_ON_FAILURE
        );
        assert_eq!(set.tests[0].sleep, Some(Wait::Intervals(2.0)));
        assert_eq!(set.tests[0].reset, Some(Duration::from_secs(30)));
        assert_eq!(set.tests[1].reset, None);
        assert!(!set.tests[0].exit_on_failure);
        assert!(set.tests[1].exit_on_failure);
        assert_eq!(set.pv_names(), vec!["S:DCCT", "S:VAC"]);
    }

    #[test]
    fn unrepresentable_times_rejected() {
        for column in ["ResetTime", "SleepTime", "HoldOffTime"] {
            let t = Table::from_toml_str(
                &format!("[columns]\nControlName = [\"X\"]\nMinimumValue = [0]\nMaximumValue = [1]\n{column} = [1e30]\n"),
                Path::new("tests.toml"),
            )
            .unwrap();
            let err = load_tests(&t, None).unwrap_err();
            assert!(err.to_string().contains(column), "{err}");
            assert!(err.is_fatal());
        }
    }

    #[test]
    fn seconds_column_preferred() {
        let t = Table::from_toml_str(
            "[columns]\nControlName = [\"X\"]\nMinimumValue = [0]\nMaximumValue = [1]\nHoldOffTime = [4.0]\nHoldOffIntervals = [9]\n",
            Path::new("tests.toml"),
        )
        .unwrap();
        let set = load_tests(&t, None).unwrap();
        assert_eq!(set.tests[0].hold_off, Some(Wait::Seconds(4.0)));
    }

    #[test]
    fn required_columns_and_inverted_range() {
        let t = Table::from_toml_str(
            "[columns]\nControlName = [\"X\"]\n",
            Path::new("tests.toml"),
        )
        .unwrap();
        let err = load_tests(&t, None).unwrap_err().to_string();
        assert!(err.contains("MinimumValue") && err.contains("MaximumValue"));

        let t = Table::from_toml_str(
            "[columns]\nControlName = [\"X\"]\nMinimumValue = [2.0]\nMaximumValue = [1.0]\n",
            Path::new("tests.toml"),
        )
        .unwrap();
        assert!(load_tests(&t, None).is_err());
    }
}
