//! # PV Control Law
//!
//! Generalized feedback loop over process variables. Each iteration reads a
//! readback vector, forms an error against offsets or startup values, and
//! commands an actuator vector through `-gain · K · error`, with optional
//! IIR filtering, despiking, action gating, range tests and shared-factor
//! delta limiting. A table-driven feed-forward loop shares the kernels and
//! the cycle plumbing.
//!
//! ## Architecture
//!
//! 1. **Loader** builds an immutable [`model::LoopDefinition`] from the
//!    command file and its data files
//! 2. **Cycle** runs acquire, adjust, gate, test, correct, commit and record
//!    against that definition
//! 3. **Reload** replaces the definition wholesale, or not at all
//!
//! Signal handlers only set flags in [`signals`]; the loop thread polls them
//! at the top of every iteration and between sleep slices, and is the only
//! place teardown happens.

pub mod config;
pub mod control;
pub mod cycle;
pub mod error;
pub mod feedforward;
pub mod hook;
pub mod kernel;
pub mod loader;
pub mod model;
pub mod report;
pub mod server;
pub mod signals;
pub mod tunables;

pub use config::{CommandFile, ControlLawConfig, Overrides};
pub use cycle::{Action, ControlLaw, IterationReport, LoopStats};
pub use error::{ControlLawError, ErrorClass};
pub use feedforward::{Feedforward, FeedforwardConfig};
