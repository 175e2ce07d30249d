//! PV Control-Law Common Library
//!
//! This crate provides the contracts the control-law engine needs from its
//! external collaborators, plus shared configuration plumbing.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and types
//! - [`table`] - Self-describing tabular data files
//! - [`pv`] - PV transport trait, registry and simulated transport
//! - [`run_control`] - Run-control supervisor contract
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use pvlaw_common::prelude::*;
//! ```

pub mod config;
pub mod prelude;
pub mod pv;
pub mod run_control;
pub mod table;
