//! Per-loop mutable state owned by the control thread.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime};

/// How the correction is combined with the current actuator values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    /// New value = old value + delta.
    #[default]
    Integral,
    /// New value = delta (baseline forced to zero).
    Proportional,
}

/// Iteration counter, clock and live-tunable loop settings.
#[derive(Debug, Clone)]
pub struct LoopState {
    /// Completed iterations.
    pub step: u64,
    pub started: Instant,
    pub started_wall: SystemTime,
    /// Seconds since start at the current iteration.
    pub elapsed: f64,
    /// Wall-clock time of the current iteration.
    pub now_wall: SystemTime,
    /// Base loop interval (before averaging shrink).
    pub interval: Duration,
    pub gain: f64,
    /// Samples per averaged read.
    pub average: usize,
    /// Spacing between averaged samples.
    pub average_interval: Duration,
    pub dry_run: bool,
    pub mode: ControlMode,
    pub hold_present: bool,
}

impl LoopState {
    pub fn new(interval: Duration, gain: f64, mode: ControlMode) -> Self {
        Self {
            step: 0,
            started: Instant::now(),
            started_wall: SystemTime::now(),
            elapsed: 0.0,
            now_wall: SystemTime::now(),
            interval,
            gain,
            average: 1,
            average_interval: Duration::ZERO,
            dry_run: false,
            mode,
            hold_present: false,
        }
    }

    /// Refresh the clocks for a new iteration.
    pub fn tick(&mut self) {
        self.elapsed = self.started.elapsed().as_secs_f64();
        self.now_wall = SystemTime::now();
    }

    /// Seconds since the UNIX epoch of the current iteration.
    pub fn epoch(&self) -> f64 {
        self.now_wall
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }

    /// Time the averaged read spends between its first and last sample.
    /// Saturates, so a sample count too large to represent never fits.
    pub fn averaging_span(&self) -> Duration {
        match u32::try_from(self.average.saturating_sub(1)) {
            Ok(gaps) => self.average_interval.saturating_mul(gaps),
            Err(_) => Duration::MAX,
        }
    }

    /// Sleep between iterations: the base interval minus the averaging span.
    ///
    /// Derived from the base interval every time, so changing `average`
    /// between iterations never compounds. `None` when the averaging span
    /// does not fit.
    pub fn effective_sleep(&self) -> Option<Duration> {
        self.interval.checked_sub(self.averaging_span())
    }
}
