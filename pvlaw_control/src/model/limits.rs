//! Channel limits in their three representations.
//!
//! The same type serves delta limiting (bounds on the per-step change),
//! readback clamping, action gating and absolute actuator clamping. A
//! scalar `L` means the symmetric interval `[-|L|, |L|]`.

/// Closed interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn symmetric(limit: f64) -> Self {
        Self {
            min: -limit.abs(),
            max: limit.abs(),
        }
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }

    pub fn clamp(&self, v: f64) -> f64 {
        v.max(self.min).min(self.max)
    }
}

/// Limits for one vector.
#[derive(Debug, Clone, PartialEq)]
pub enum Limits {
    /// Same symmetric limit for every channel.
    Scalar(f64),
    /// Same interval for every channel.
    MinMax(Bounds),
    /// Per-channel interval; `None` means unlimited.
    PerChannel(Vec<Option<Bounds>>),
}

impl Limits {
    /// Interval for channel `i`, if limited.
    pub fn bounds(&self, i: usize) -> Option<Bounds> {
        match self {
            Self::Scalar(l) => Some(Bounds::symmetric(*l)),
            Self::MinMax(b) => Some(*b),
            Self::PerChannel(v) => v.get(i).copied().flatten(),
        }
    }

    /// Clamp `value` of channel `i` into its interval.
    pub fn clamp(&self, i: usize, value: f64) -> f64 {
        match self.bounds(i) {
            Some(b) => b.clamp(value),
            None => value,
        }
    }

    /// Whether channel `i` has a limit and `value` lies inside it.
    pub fn within(&self, i: usize, value: f64) -> bool {
        self.bounds(i).is_some_and(|b| b.contains(value))
    }

    /// Whether any channel is not strictly inside its interval. A channel
    /// without a limit is never inside one; NaN values never count.
    pub fn any_reaches(&self, values: &[f64]) -> bool {
        values.iter().enumerate().any(|(i, v)| {
            !v.is_nan() && self.bounds(i).is_none_or(|b| *v <= b.min || *v >= b.max)
        })
    }

    /// Largest factor `s <= 1` such that `s * deltas[i]` lies inside every
    /// channel's interval. Intervals must contain zero.
    pub fn uniform_scale(&self, deltas: &[f64]) -> f64 {
        let mut scale: f64 = 1.0;
        for (i, &d) in deltas.iter().enumerate() {
            let Some(b) = self.bounds(i) else { continue };
            let factor = if d > b.max {
                b.max / d
            } else if d < b.min {
                b.min / d
            } else {
                1.0
            };
            scale = scale.min(factor.max(0.0));
        }
        scale
    }

    /// Number of channels this covers (`None` for uniform limits).
    pub fn channel_count(&self) -> Option<usize> {
        match self {
            Self::PerChannel(v) => Some(v.len()),
            _ => None,
        }
    }
}
