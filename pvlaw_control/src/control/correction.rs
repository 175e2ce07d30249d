//! Error formation and the matrix correction.

use crate::model::{ControlVector, GainMatrix};

/// Set each readback's `error` to its value minus the active reference:
/// the startup value in hold-present-values mode, the offset otherwise.
pub fn update_errors(readbacks: &mut ControlVector, hold_present: bool) {
    for ch in readbacks.iter_mut() {
        let reference = if hold_present { ch.initial } else { ch.setpoint };
        ch.error = ch.value - reference;
    }
}

/// `delta = -gain · K · error`
pub fn matrix_correction(matrix: &GainMatrix, errors: &[f64], gain: f64) -> Vec<f64> {
    matrix
        .mul_vec(errors)
        .into_iter()
        .map(|v| -gain * v)
        .collect()
}
