//! Process-variable client contract.
//!
//! This module defines:
//! - `PvClient` trait - Interface for pluggable PV transports
//! - `PvError` enum - Error types for PV operations
//! - `registry` - Name-to-factory lookup of transports
//! - `sim` - In-memory transport used for dry runs and tests
//!
//! All operations are synchronous batched request/wait calls. A transport
//! is owned by the single control thread, so the trait only requires `Send`.

pub mod registry;
pub mod sim;

use std::time::Duration;
use thiserror::Error;

/// Error types for PV operations.
#[derive(Debug, Clone, Error)]
pub enum PvError {
    /// One or more channels could not be connected.
    #[error("not connected: {}", names.join(", "))]
    NotConnected { names: Vec<String> },

    /// Batched read failed.
    #[error("read failed for {name}: {reason}")]
    Read { name: String, reason: String },

    /// Batched write failed.
    #[error("write failed for {name}: {reason}")]
    Write { name: String, reason: String },

    /// Channel holds a different kind of value than requested.
    #[error("type mismatch on {name}: expected {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    /// Waveform shorter than the highest index addressed.
    #[error("{name}: waveform has {found} elements, need at least {needed}")]
    Length {
        name: String,
        needed: usize,
        found: usize,
    },

    /// Request did not complete in time.
    #[error("timeout after {timeout:?} waiting for {name}")]
    Timeout { name: String, timeout: Duration },

    /// Transport name not registered.
    #[error("unknown PV transport: {0}")]
    TransportNotFound(String),
}

/// Factory function type for creating transport instances.
pub type TransportFactory = fn(&registry::TransportOptions) -> Result<Box<dyn PvClient>, PvError>;

/// Interface to a PV transport.
///
/// # Lifecycle
///
/// 1. `connect()` - Called once per configuration load with every name the
///    loop will touch. Must report all unconnected names in one error.
/// 2. `get_*` / `put_*` - Called from the control loop every iteration.
/// 3. `disconnect()` - Called once at teardown.
pub trait PvClient: Send {
    /// Short identifier of the transport (e.g. "sim").
    fn name(&self) -> &'static str;

    /// Establish channels for `names`.
    ///
    /// # Errors
    /// `PvError::NotConnected` listing every name that failed.
    fn connect(&mut self, names: &[String], timeout: Duration) -> Result<(), PvError>;

    /// Batched scalar read, in the order of `names`.
    fn get_values(&mut self, names: &[String]) -> Result<Vec<f64>, PvError>;

    /// Batched scalar write. `names` and `values` are parallel.
    fn put_values(&mut self, names: &[String], values: &[f64]) -> Result<(), PvError>;

    /// Read a whole waveform.
    fn get_waveform(&mut self, name: &str) -> Result<Vec<f64>, PvError>;

    /// Write a whole waveform.
    fn put_waveform(&mut self, name: &str, values: &[f64]) -> Result<(), PvError>;

    fn get_string(&mut self, name: &str) -> Result<String, PvError>;

    fn put_string(&mut self, name: &str, value: &str) -> Result<(), PvError>;

    /// Read an enum PV as its index.
    fn get_enum(&mut self, name: &str) -> Result<u16, PvError>;

    fn put_enum(&mut self, name: &str, value: u16) -> Result<(), PvError>;

    /// Whether this client may write `name`.
    fn write_access(&mut self, name: &str) -> Result<bool, PvError>;

    /// Release all channels.
    fn disconnect(&mut self) -> Result<(), PvError> {
        Ok(())
    }
}
