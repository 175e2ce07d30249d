//! Correction pipeline.
//!
//! Matrix correction, optional IIR filter, shared-factor delta limiting and
//! absolute actuator clamps, in that order. Nothing here touches filter
//! history; the caller commits it only when the values are written.
//!
//! - [`correction`] - Error formation and `-gain · K · error`
//! - [`limiting`] - Delta-rate scaling and clamps

pub mod correction;
pub mod limiting;

use crate::model::{ControlMode, LoopDefinition};

/// Result of one correction computation.
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    /// `-gain · K · error`.
    pub raw: Vec<f64>,
    /// `raw` after the IIR filter (equal to `raw` without one).
    pub filtered: Vec<f64>,
    /// Baseline plus `filtered`, before limiting.
    pub proposed: Vec<f64>,
    /// Values to command.
    pub values: Vec<f64>,
    /// Shared delta-limit factor (1 when nothing was limited).
    pub scale: f64,
    /// Channels moved by the absolute clamp.
    pub clamped: usize,
}

impl Correction {
    /// No correction: every actuator keeps `old`.
    pub fn hold(old: &[f64]) -> Self {
        let zeros = vec![0.0; old.len()];
        Self {
            raw: zeros.clone(),
            filtered: zeros,
            proposed: old.to_vec(),
            values: old.to_vec(),
            scale: 1.0,
            clamped: 0,
        }
    }

    /// Commanded change per actuator.
    pub fn deltas(&self, old: &[f64]) -> Vec<f64> {
        self.values.iter().zip(old).map(|(v, o)| v - o).collect()
    }

    /// Filter output actually applied once limits and clamps have acted:
    /// the commanded value itself in proportional mode, the change from
    /// `old` in integral mode.
    pub fn applied_filtered(&self, old: &[f64], mode: ControlMode) -> Vec<f64> {
        match mode {
            ControlMode::Integral => self.deltas(old),
            ControlMode::Proportional => self.values.clone(),
        }
    }

    pub fn is_hold(&self) -> bool {
        self.raw.iter().all(|v| *v == 0.0) && self.values == self.proposed
    }
}

/// Compute the commanded actuator values from the readback errors held in
/// `def.readbacks` and the current actuator values `old`.
///
/// In proportional mode the baseline is zero: the commanded value is the
/// correction itself.
pub fn compute_correction(
    def: &LoopDefinition,
    gain: f64,
    mode: ControlMode,
    old: &[f64],
) -> Correction {
    let raw = correction::matrix_correction(&def.matrix, &def.readbacks.errors(), gain);
    let filtered = match &def.filters {
        Some(bank) => bank.compute(&raw),
        None => raw.clone(),
    };
    let proposed: Vec<f64> = match mode {
        ControlMode::Integral => old.iter().zip(&filtered).map(|(o, d)| o + d).collect(),
        ControlMode::Proportional => filtered.clone(),
    };

    let (mut values, scale) = match &def.delta_limits {
        Some(limits) => limiting::limit_steps(&proposed, old, limits),
        None => (proposed.clone(), 1.0),
    };
    let clamped = match &def.control_limits {
        Some(limits) => limiting::clamp_all(&mut values, limits),
        None => 0,
    };

    Correction {
        raw,
        filtered,
        proposed,
        values,
        scale,
        clamped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::filter::{FilterBank, IirFilter};
    use crate::model::{ControlVector, GainMatrix, Limits};

    fn definition() -> LoopDefinition {
        let rb = vec!["BPM1".to_string()];
        let act = vec!["HCM1".to_string(), "HCM2".to_string()];
        LoopDefinition {
            readbacks: ControlVector::new(&rb, &rb).unwrap(),
            actuators: ControlVector::new(&act, &act).unwrap(),
            matrix: GainMatrix::from_columns(2, &[vec![1.0, -2.0]]).unwrap(),
            filters: None,
            delta_limits: None,
            action_limits: None,
            readback_limits: None,
            control_limits: None,
            tests: None,
            waveform_tests: Vec::new(),
        }
    }

    #[test]
    fn integral_mode_adds_to_old_values() {
        let mut def = definition();
        def.readbacks.set_values(&[2.0]);
        correction::update_errors(&mut def.readbacks, false);
        let c = compute_correction(&def, 0.5, ControlMode::Integral, &[10.0, 20.0]);
        assert_eq!(c.raw, vec![-1.0, 2.0]);
        assert_eq!(c.values, vec![9.0, 22.0]);
        assert_eq!(c.deltas(&[10.0, 20.0]), vec![-1.0, 2.0]);
    }

    #[test]
    fn proportional_mode_has_zero_baseline() {
        let mut def = definition();
        def.readbacks.set_values(&[2.0]);
        correction::update_errors(&mut def.readbacks, false);
        let c = compute_correction(&def, 0.5, ControlMode::Proportional, &[10.0, 20.0]);
        assert_eq!(c.values, vec![-1.0, 2.0]);
    }

    #[test]
    fn delta_limit_then_clamp() {
        let mut def = definition();
        def.readbacks.set_values(&[-3.0]);
        correction::update_errors(&mut def.readbacks, false);
        def.delta_limits = Some(Limits::Scalar(1.0));
        def.control_limits = Some(Limits::Scalar(0.25));
        // raw = [3, -6]; scale 1/6
        let c = compute_correction(&def, 1.0, ControlMode::Integral, &[0.0, 0.0]);
        assert!((c.scale - 1.0 / 6.0).abs() < 1e-12);
        assert_eq!(c.values, vec![0.25, -0.25]);
        assert_eq!(c.clamped, 2);
    }

    #[test]
    fn filter_does_not_commit() {
        let mut def = definition();
        def.filters = Some(FilterBank::new(vec![
            IirFilter::new(vec![1.0, -0.5], vec![0.5]),
            IirFilter::identity(),
        ]));
        def.readbacks.set_values(&[2.0]);
        correction::update_errors(&mut def.readbacks, false);
        let a = compute_correction(&def, 0.5, ControlMode::Integral, &[0.0, 0.0]);
        let b = compute_correction(&def, 0.5, ControlMode::Integral, &[0.0, 0.0]);
        assert_eq!(a, b);
        assert_eq!(a.filtered, vec![-0.5, 2.0]);
    }

    #[test]
    fn applied_output_follows_delta_limit() {
        let mut def = definition();
        def.filters = Some(FilterBank::new(vec![
            IirFilter::new(vec![1.0, -0.5], vec![1.0]),
            IirFilter::identity(),
        ]));
        def.delta_limits = Some(Limits::Scalar(1.0));
        def.readbacks.set_values(&[2.0]);
        correction::update_errors(&mut def.readbacks, false);
        let old = [10.0, 20.0];

        // filtered = [-2, 4]; proposed - old = [-12, -16]; scale 1/16
        let c = compute_correction(&def, 1.0, ControlMode::Proportional, &old);
        assert!((c.scale - 1.0 / 16.0).abs() < 1e-12);
        let applied = c.applied_filtered(&old, ControlMode::Proportional);
        assert_eq!(applied, c.values);
        assert!((applied[0] - 9.25).abs() < 1e-12);
        assert!((applied[1] - 19.0).abs() < 1e-12);

        let c = compute_correction(&def, 1.0, ControlMode::Integral, &old);
        let applied = c.applied_filtered(&old, ControlMode::Integral);
        assert!((applied[0] + 0.5).abs() < 1e-12);
        assert!((applied[1] - 1.0).abs() < 1e-12);

        let mut bank = def.filters.clone().unwrap();
        bank.commit(&c.raw, &applied);
        assert!((bank.filter(0).unwrap().compute(0.0) + 0.25).abs() < 1e-12);
    }

    #[test]
    fn hold_keeps_values() {
        let c = Correction::hold(&[1.0, 2.0]);
        assert!(c.is_hold());
        assert_eq!(c.deltas(&[1.0, 2.0]), vec![0.0, 0.0]);
    }
}
