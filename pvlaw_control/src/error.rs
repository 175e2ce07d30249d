//! Engine error type and its failure taxonomy.
//!
//! Every error maps onto one [`ErrorClass`]. The class decides whether the
//! loop aborts or degrades the current iteration and carries on.

use pvlaw_common::config::ConfigError;
use pvlaw_common::pv::PvError;
use pvlaw_common::run_control::RunControlError;
use pvlaw_common::table::TableError;
use std::path::PathBuf;
use thiserror::Error;

use crate::kernel::interp::InterpError;

/// Failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed input files or settings. Always fatal.
    Configuration,
    /// PV channels missing at setup. Always fatal.
    Connection,
    /// A single read/write/report failing mid-run.
    TransientIo,
    /// Interpolation edge cases detected at run time.
    Computation,
    /// Supervisor timeout/abort/denial. Always fatal.
    RunControl,
    /// Termination or fault signal.
    Signal,
}

/// Errors raised by the control-law engine.
#[derive(Debug, Error)]
pub enum ControlLawError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Table(#[from] TableError),

    /// Semantically invalid input file contents.
    #[error("{}: {message}", file.display())]
    Invalid { file: PathBuf, message: String },

    /// Names that found no match among the known devices.
    #[error("{}: unmatched name(s): {}", file.display(), names.join(", "))]
    Unmatched { file: PathBuf, names: Vec<String> },

    /// Interpolation table rejected at load time.
    #[error("{}: {source}", file.display())]
    Grid {
        file: PathBuf,
        #[source]
        source: InterpError,
    },

    /// Averaging window does not fit in the loop interval.
    #[error(
        "averaging {average} samples {spacing:.3}s apart needs {needed:.3}s, loop interval is only {interval:.3}s"
    )]
    AveragingWindow {
        average: usize,
        spacing: f64,
        needed: f64,
        interval: f64,
    },

    /// Channels could not be connected at setup.
    #[error("PV connection failed: {0}")]
    Connect(#[source] PvError),

    /// Steady-state PV read/write failure.
    #[error("PV I/O failed: {0}")]
    Pv(#[source] PvError),

    /// Run-time interpolation failure.
    #[error("interpolation failed: {0}")]
    Interp(#[from] InterpError),

    /// A test with ExitOnFailure went out of range.
    #[error("test {name} out of range with ExitOnFailure set (value {value}, range [{min}, {max}])")]
    TestFailure {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Post-change command reported failure.
    #[error("post-change command failed: {0}")]
    Hook(String),

    /// Output file could not be written.
    #[error("output {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    RunControl(#[from] RunControlError),

    /// PID file conflict or server setup failure.
    #[error("server mode: {0}")]
    Server(String),

    /// Termination requested by signal.
    #[error("terminated by signal {0}")]
    Signal(&'static str),
}

impl ControlLawError {
    /// Taxonomy class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_)
            | Self::Table(_)
            | Self::Invalid { .. }
            | Self::Unmatched { .. }
            | Self::Grid { .. }
            | Self::AveragingWindow { .. }
            | Self::Server(_) => ErrorClass::Configuration,
            Self::Connect(_) => ErrorClass::Connection,
            Self::Pv(_) | Self::TestFailure { .. } | Self::Hook(_) | Self::Output { .. } => {
                ErrorClass::TransientIo
            }
            Self::Interp(_) => ErrorClass::Computation,
            Self::RunControl(_) => ErrorClass::RunControl,
            Self::Signal(_) => ErrorClass::Signal,
        }
    }

    /// Whether the loop must stop.
    pub fn is_fatal(&self) -> bool {
        match self.class() {
            ErrorClass::TransientIo => matches!(self, Self::TestFailure { .. }),
            ErrorClass::Computation => false,
            _ => true,
        }
    }

    /// Shorthand for a file-level validation failure.
    pub fn invalid(file: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Invalid {
            file: file.into(),
            message: message.into(),
        }
    }
}
