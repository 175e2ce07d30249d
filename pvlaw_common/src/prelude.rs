//! Prelude module for common re-exports.
//!
//! This module provides convenient re-exports of commonly used types
//! so that consumers can do `use pvlaw_common::prelude::*;` and get
//! the most important types without listing individual paths.

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SearchPath, SharedConfig};

// ─── Tabular Files ──────────────────────────────────────────────────
pub use crate::table::{Column, Parameter, Table, TableError};

// ─── PV Transport ───────────────────────────────────────────────────
pub use crate::pv::registry::{TransportOptions, TransportRegistry};
pub use crate::pv::sim::{SimPvClient, SimResponse, SimulationConfig};
pub use crate::pv::{PvClient, PvError};

// ─── Run Control ────────────────────────────────────────────────────
pub use crate::run_control::{
    NullRunControl, RunControl, RunControlConfig, RunControlError, Severity,
};
