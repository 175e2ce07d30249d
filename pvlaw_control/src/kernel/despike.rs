//! Neighbor-based spike rejection.
//!
//! Each sample is compared against the mean of its `average_of` closest
//! neighbors (by value) within `neighbors` positions on either side. A
//! sample deviating by more than `threshold` is replaced with that mean.
//! Passes repeat until a pass finds nothing or `passes` is exhausted.
//!
//! A pass that finds more than `count_limit` spikes is abandoned without
//! touching the data: that many outliers is more likely a real shift in the
//! signal than noise.

use serde::{Deserialize, Serialize};

/// Despike settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DespikeParams {
    /// Samples considered on each side.
    pub neighbors: usize,
    /// Maximum number of passes.
    pub passes: usize,
    /// Number of closest neighbors averaged for the reference value.
    pub average_of: usize,
    /// Deviation above which a sample is a spike.
    pub threshold: f64,
    /// Abandon a pass finding more spikes than this. Zero disables the limit.
    pub count_limit: usize,
}

impl Default for DespikeParams {
    fn default() -> Self {
        Self {
            neighbors: 4,
            passes: 1,
            average_of: 2,
            threshold: 0.0,
            count_limit: 0,
        }
    }
}

impl DespikeParams {
    /// Validate settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.neighbors == 0 {
            return Err("despike neighbors must be >= 1".to_string());
        }
        if self.average_of == 0 || self.average_of > 2 * self.neighbors {
            return Err(format!(
                "despike average_of must be in 1..={} (got {})",
                2 * self.neighbors,
                self.average_of
            ));
        }
        if !(self.threshold.is_finite() && self.threshold >= 0.0) {
            return Err(format!(
                "despike threshold must be finite and >= 0 (got {})",
                self.threshold
            ));
        }
        Ok(())
    }
}

/// Despike `data` in place. Returns the number of samples replaced.
pub fn despike(data: &mut [f64], params: &DespikeParams) -> usize {
    despike_with_threshold(data, params, params.threshold)
}

/// Same as [`despike`] with an overriding threshold (e.g. a ramped one).
pub fn despike_with_threshold(data: &mut [f64], params: &DespikeParams, threshold: f64) -> usize {
    if data.len() < 2 || params.neighbors == 0 || params.average_of == 0 {
        return 0;
    }

    let mut total = 0;
    let mut replacements: Vec<(usize, f64)> = Vec::new();
    let mut deviations: Vec<(f64, f64)> = Vec::with_capacity(2 * params.neighbors);

    for _ in 0..params.passes {
        replacements.clear();
        for i in 0..data.len() {
            let lower = i.saturating_sub(params.neighbors);
            let upper = (i + params.neighbors).min(data.len() - 1);

            deviations.clear();
            deviations.extend(
                (lower..=upper)
                    .filter(|&j| j != i && data[j].is_finite())
                    .map(|j| ((data[i] - data[j]).abs(), data[j])),
            );
            if deviations.is_empty() {
                continue;
            }
            deviations.sort_by(|a, b| a.0.total_cmp(&b.0));

            let take = params.average_of.min(deviations.len());
            let reference = deviations[..take].iter().map(|(_, v)| v).sum::<f64>() / take as f64;
            let deviation = (data[i] - reference).abs();
            if deviation > threshold || !data[i].is_finite() {
                replacements.push((i, reference));
            }
        }

        if replacements.is_empty() {
            break;
        }
        if params.count_limit > 0 && replacements.len() > params.count_limit {
            break;
        }
        for &(i, value) in &replacements {
            data[i] = value;
        }
        total += replacements.len();
    }
    total
}

/// Despike only the channels flagged `eligible`; the others keep their
/// original values afterwards.
pub fn despike_masked(
    data: &mut [f64],
    eligible: &[bool],
    params: &DespikeParams,
    threshold: f64,
) -> usize {
    let original = data.to_vec();
    despike_with_threshold(data, params, threshold);
    let mut replaced = 0;
    for (i, value) in data.iter_mut().enumerate() {
        if eligible.get(i).copied().unwrap_or(true) {
            if value.to_bits() != original[i].to_bits() {
                replaced += 1;
            }
        } else {
            *value = original[i];
        }
    }
    replaced
}

// ─── Threshold Ramp ─────────────────────────────────────────────────

/// Threshold moving linearly from `start` to `end` over `steps` iterations.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRamp {
    start: f64,
    end: f64,
    steps: u32,
    step: u32,
}

impl ThresholdRamp {
    pub fn new(start: f64, end: f64, steps: u32) -> Self {
        Self {
            start,
            end,
            steps,
            step: 0,
        }
    }

    /// Threshold for the current iteration.
    pub fn current(&self) -> f64 {
        if self.steps == 0 || self.step >= self.steps {
            self.end
        } else {
            self.start + (self.end - self.start) * f64::from(self.step) / f64::from(self.steps)
        }
    }

    /// Move one iteration along the ramp.
    pub fn advance(&mut self) {
        if self.step < self.steps {
            self.step += 1;
        }
    }

    /// Start the ramp over.
    pub fn restart(&mut self) {
        self.step = 0;
    }

    pub fn finished(&self) -> bool {
        self.step >= self.steps
    }
}
