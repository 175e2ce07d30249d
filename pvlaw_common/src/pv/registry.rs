//! Registry of PV transports.
//!
//! Binaries build a `TransportRegistry` at startup, register the transports
//! compiled in, and pick one by name (`--transport`). No global state.

use super::sim::{SimPvClient, SimulationConfig};
use super::{PvClient, PvError, TransportFactory};
use std::collections::HashMap;
use std::time::Duration;

/// Inputs handed to a transport factory.
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Per-request timeout for connect and batched I/O.
    pub timeout: Duration,
    /// Seed for the simulated transport.
    pub simulation: SimulationConfig,
}

/// Registry of available PV transports.
pub struct TransportRegistry {
    factories: HashMap<&'static str, TransportFactory>,
}

impl TransportRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding every transport built into this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("sim", SimPvClient::factory);
        registry
    }

    /// Register a transport factory. A later registration under the same
    /// name replaces the earlier one.
    pub fn register(&mut self, name: &'static str, factory: TransportFactory) {
        self.factories.insert(name, factory);
    }

    /// Create a transport instance by name.
    ///
    /// # Errors
    /// Returns `PvError::TransportNotFound` if no transport with the given name is registered.
    pub fn create(
        &self,
        name: &str,
        options: &TransportOptions,
    ) -> Result<Box<dyn PvClient>, PvError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| PvError::TransportNotFound(name.to_string()))?;
        factory(options)
    }

    /// List all registered transport names, sorted.
    pub fn list(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
