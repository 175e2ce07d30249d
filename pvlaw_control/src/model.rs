//! In-memory model of one loaded configuration.
//!
//! - [`vector`] - Named channel vectors with exact-match lookup
//! - [`matrix`] - Dense gain matrix
//! - [`limits`] - Scalar, min/max and per-channel limits
//! - [`range`] - Scalar and waveform range tests
//! - [`state`] - Iteration counter, clocks and live settings

pub mod limits;
pub mod matrix;
pub mod range;
pub mod state;
pub mod vector;

pub use limits::{Bounds, Limits};
pub use matrix::GainMatrix;
pub use range::{RangeTest, TestFlags, TestOutcome, TestSet, WaveformTest};
pub use state::{ControlMode, LoopState};
pub use vector::{Channel, ControlVector, Source};

use crate::kernel::filter::FilterBank;

/// Everything built from the command file and its data files.
///
/// Built wholesale at startup and on every reload; never patched in place.
#[derive(Debug, Clone)]
pub struct LoopDefinition {
    pub readbacks: ControlVector,
    pub actuators: ControlVector,
    pub matrix: GainMatrix,
    pub filters: Option<FilterBank>,
    pub delta_limits: Option<Limits>,
    pub action_limits: Option<Limits>,
    pub readback_limits: Option<Limits>,
    pub control_limits: Option<Limits>,
    pub tests: Option<TestSet>,
    pub waveform_tests: Vec<WaveformTest>,
}

impl LoopDefinition {
    /// Every PV the loop reads or writes through the batched calls.
    pub fn pv_names(&self) -> Vec<String> {
        let mut names = self.readbacks.scalar_channels().1;
        names.extend(self.readbacks.waveforms().iter().cloned());
        names.extend(self.actuators.scalar_channels().1);
        names.extend(self.actuators.waveforms().iter().cloned());
        if let Some(tests) = &self.tests {
            names.extend(tests.pv_names());
        }
        names.extend(self.waveform_tests.iter().map(|t| t.pv.clone()));
        let mut seen = std::collections::HashSet::new();
        names.retain(|n| seen.insert(n.clone()));
        names
    }
}
