//! Builds a [`LoopDefinition`] from a command file and its data files.
//!
//! All validation happens here, before the first iteration. Loading is
//! all-or-nothing: the caller receives either a fully consistent definition
//! or the first fatal diagnostic.
//!
//! - [`matrix`] - Gain matrix and channel names
//! - [`xref`] - Symbolic-to-PV cross reference
//! - [`coefficients`] - IIR filter coefficients
//! - [`limits`] - Limit blocks and per-channel limit files
//! - [`range`] - Scalar test-range file
//! - [`waveform`] - Waveform index files and waveform tests
//! - [`channels`] - Offsets and despike eligibility

pub mod channels;
pub mod coefficients;
pub mod limits;
pub mod matrix;
pub mod range;
pub mod waveform;
pub mod xref;

use pvlaw_common::config::SearchPath;
use pvlaw_common::table::Table;
use std::path::Path;
use tracing::{debug, info};

use crate::config::{CommandFile, LimitSpec};
use crate::error::ControlLawError;
use crate::model::{ControlVector, Limits, LoopDefinition};
use limits::LimitKind;

/// Resolve `name` through the search path and read it.
pub fn read_table(search: &SearchPath, name: &Path) -> Result<Table, ControlLawError> {
    let path = search.resolve(name)?;
    debug!("reading {}", path.display());
    Ok(Table::read(&path)?)
}

fn optional_limits(
    spec: Option<&LimitSpec>,
    kind: LimitKind,
    vector: &ControlVector,
    search: &SearchPath,
) -> Result<Option<Limits>, ControlLawError> {
    spec.map(|s| limits::load_limits(s, kind, vector, search))
        .transpose()
}

/// Load every data file named by `cmd`.
pub fn load(cmd: &CommandFile) -> Result<LoopDefinition, ControlLawError> {
    let c = &cmd.config;
    let search = cmd.search_path();

    let table = read_table(&search, &c.files.matrix)?;
    let m = matrix::load_matrix(&table, c.loop_.actuator_column.as_deref())?;

    let (readback_pvs, actuator_pvs) = match &c.files.xref {
        Some(file) => {
            let map = xref::NameMap::from_table(&read_table(&search, file)?)?;
            (map.resolve(&m.readbacks)?, map.resolve(&m.actuators)?)
        }
        None => (m.readbacks.clone(), m.actuators.clone()),
    };
    let mut readbacks = ControlVector::new(&m.readbacks, &readback_pvs)
        .map_err(|e| ControlLawError::invalid(table.path(), e))?;
    let mut actuators = ControlVector::new(&m.actuators, &actuator_pvs)
        .map_err(|e| ControlLawError::invalid(table.path(), e))?;

    for link in &c.waveforms.readback {
        waveform::attach_waveform(&mut readbacks, &link.pv, &read_table(&search, &link.file)?)?;
    }
    for link in &c.waveforms.actuator {
        waveform::attach_waveform(&mut actuators, &link.pv, &read_table(&search, &link.file)?)?;
    }

    if let Some(file) = &c.files.offsets {
        channels::apply_offsets(&read_table(&search, file)?, &mut readbacks)?;
    }
    if let Some(file) = &c.files.despike {
        channels::apply_despike_flags(&read_table(&search, file)?, &mut readbacks)?;
    }

    let filters = match &c.files.coefficients {
        Some(file) => Some(coefficients::load_filters(
            &read_table(&search, file)?,
            &actuators,
        )?),
        None => None,
    };

    let l = &c.limits;
    let delta_limits = optional_limits(l.delta.as_ref(), LimitKind::Delta, &actuators, &search)?;
    let control_limits =
        optional_limits(l.control.as_ref(), LimitKind::Control, &actuators, &search)?;
    let action_limits = optional_limits(l.action.as_ref(), LimitKind::Action, &readbacks, &search)?;
    let readback_limits =
        optional_limits(l.readback.as_ref(), LimitKind::Readback, &readbacks, &search)?;

    let tests = match &c.tests.file {
        Some(file) => Some(range::load_tests(
            &read_table(&search, file)?,
            c.tests.despike.clone(),
        )?),
        None => None,
    };
    let waveform_tests = c
        .waveforms
        .test
        .iter()
        .map(|wt| waveform::load_waveform_test(wt, &read_table(&search, &wt.file)?))
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        "loaded {}: {} readbacks, {} actuators, {} tests, {} waveform tests",
        table.path().display(),
        readbacks.len(),
        actuators.len(),
        tests.as_ref().map_or(0, |t| t.tests.len()),
        waveform_tests.len()
    );

    Ok(LoopDefinition {
        readbacks,
        actuators,
        matrix: m.matrix,
        filters,
        delta_limits,
        action_limits,
        readback_limits,
        control_limits,
        tests,
        waveform_tests,
    })
}
