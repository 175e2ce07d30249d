//! Delta-rate limiting and absolute clamps.

use crate::model::Limits;

/// Bring every step `proposed[i] - old[i]` inside its delta limit by one
/// shared factor. Returns the limited values and the factor applied.
pub fn limit_steps(proposed: &[f64], old: &[f64], limits: &Limits) -> (Vec<f64>, f64) {
    let steps: Vec<f64> = proposed.iter().zip(old).map(|(p, o)| p - o).collect();
    let scale = limits.uniform_scale(&steps);
    if scale >= 1.0 {
        return (proposed.to_vec(), 1.0);
    }
    let limited = old
        .iter()
        .zip(&steps)
        .map(|(o, s)| o + scale * s)
        .collect();
    (limited, scale)
}

/// Clamp each value into its channel's bounds. Returns how many moved.
pub fn clamp_all(values: &mut [f64], limits: &Limits) -> usize {
    let mut clamped = 0;
    for (i, v) in values.iter_mut().enumerate() {
        let c = limits.clamp(i, *v);
        if c != *v && !v.is_nan() {
            *v = c;
            clamped += 1;
        }
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Bounds;

    #[test]
    fn co_moving_actuator_scaled_by_same_factor() {
        let limits = Limits::PerChannel(vec![Some(Bounds::symmetric(1.0)), None]);
        let (values, scale) = limit_steps(&[13.0, 1.5], &[10.0, 0.0], &limits);
        assert!((scale - 1.0 / 3.0).abs() < 1e-12);
        assert!((values[0] - 11.0).abs() < 1e-12);
        assert!((values[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn within_limits_untouched() {
        let (values, scale) = limit_steps(&[1.0, 2.0], &[0.5, 1.5], &Limits::Scalar(1.0));
        assert_eq!(scale, 1.0);
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[test]
    fn clamp_counts_moves() {
        let mut v = vec![-5.0, 0.0, 5.0];
        assert_eq!(clamp_all(&mut v, &Limits::Scalar(2.0)), 2);
        assert_eq!(v, vec![-2.0, 0.0, 2.0]);
    }
}
