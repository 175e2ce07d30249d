//! Numeric kernels: interpolation, despiking, IIR filtering and statistics.
//!
//! These are pure functions over slices with no PV or file I/O, so the
//! engine, the feed-forward loop and the benchmarks share them.

pub mod despike;
pub mod filter;
pub mod interp;
pub mod stats;
