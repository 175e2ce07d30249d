//! In-memory PV transport.
//!
//! `SimPvClient` keeps every channel in a shared map so a test (or the
//! `--transport sim` dry-run mode) can inspect and perturb the values the
//! control loop sees. Cloning a client yields another handle onto the same
//! state.
//!
//! An optional linear plant response couples actuators to readbacks:
//! whenever a scalar actuator is written, each response entry naming it adds
//! `coefficient * (new - old)` to its readback.

use super::registry::TransportOptions;
use super::{PvClient, PvError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Value held by a simulated channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SimValue {
    Scalar(f64),
    Waveform(Vec<f64>),
    Text(String),
    Enum(u16),
}

/// One linear coupling from an actuator to a readback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimResponse {
    pub readback: String,
    pub actuator: String,
    pub coefficient: f64,
}

/// `[simulation]` section of a command file.
///
/// # TOML Example
///
/// ```toml
/// [simulation]
/// auto_create = true
///
/// [simulation.scalars]
/// "S1:BPM1:X" = 0.4
/// "S1:HCM1:SetCurrent" = 1.0
///
/// [[simulation.responses]]
/// readback = "S1:BPM1:X"
/// actuator = "S1:HCM1:SetCurrent"
/// coefficient = 0.8
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Create unknown channels as zero-valued scalars on connect.
    pub auto_create: bool,
    pub scalars: BTreeMap<String, f64>,
    pub waveforms: BTreeMap<String, Vec<f64>>,
    pub strings: BTreeMap<String, String>,
    pub enums: BTreeMap<String, u16>,
    /// Channels that refuse writes (write-access check returns false).
    pub read_only: Vec<String>,
    pub responses: Vec<SimResponse>,
}

#[derive(Debug, Default)]
struct SimState {
    channels: HashMap<String, SimValue>,
    responses: Vec<SimResponse>,
    auto_create: bool,
    failing_reads: HashSet<String>,
    failing_writes: HashSet<String>,
    read_only: HashSet<String>,
    put_count: u64,
}

impl SimState {
    fn lookup(&self, name: &str) -> Result<&SimValue, PvError> {
        if self.failing_reads.contains(name) {
            return Err(PvError::Read {
                name: name.to_string(),
                reason: "simulated read failure".to_string(),
            });
        }
        self.channels.get(name).ok_or_else(|| PvError::NotConnected {
            names: vec![name.to_string()],
        })
    }

    fn check_write(&self, name: &str) -> Result<(), PvError> {
        if self.failing_writes.contains(name) {
            return Err(PvError::Write {
                name: name.to_string(),
                reason: "simulated write failure".to_string(),
            });
        }
        if !self.channels.contains_key(name) {
            return Err(PvError::NotConnected {
                names: vec![name.to_string()],
            });
        }
        Ok(())
    }

    fn put_scalar(&mut self, name: &str, value: f64) -> Result<(), PvError> {
        let old = match self.channels.get(name) {
            Some(SimValue::Scalar(v)) => *v,
            Some(SimValue::Enum(v)) => f64::from(*v),
            _ => {
                return Err(PvError::TypeMismatch {
                    name: name.to_string(),
                    expected: "scalar",
                });
            }
        };
        self.channels
            .insert(name.to_string(), SimValue::Scalar(value));

        let delta = value - old;
        if delta != 0.0 {
            for response in self.responses.iter().filter(|r| r.actuator == name) {
                if let Some(SimValue::Scalar(rb)) = self.channels.get_mut(&response.readback) {
                    *rb += response.coefficient * delta;
                }
            }
        }
        Ok(())
    }
}

/// Simulated PV transport.
#[derive(Debug, Clone, Default)]
pub struct SimPvClient {
    state: Arc<Mutex<SimState>>,
}

impl SimPvClient {
    /// Empty transport. Channels must be created before `connect`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport seeded from a `[simulation]` section.
    pub fn from_config(config: &SimulationConfig) -> Self {
        let client = Self::new();
        {
            let mut state = client.state.lock();
            state.auto_create = config.auto_create;
            for (name, value) in &config.scalars {
                state.channels.insert(name.clone(), SimValue::Scalar(*value));
            }
            for (name, values) in &config.waveforms {
                state
                    .channels
                    .insert(name.clone(), SimValue::Waveform(values.clone()));
            }
            for (name, text) in &config.strings {
                state.channels.insert(name.clone(), SimValue::Text(text.clone()));
            }
            for (name, value) in &config.enums {
                state.channels.insert(name.clone(), SimValue::Enum(*value));
            }
            state.read_only = config.read_only.iter().cloned().collect();
            state.responses = config.responses.clone();
        }
        info!(
            "Simulation transport seeded with {} channel(s), {} response term(s)",
            client.state.lock().channels.len(),
            config.responses.len()
        );
        client
    }

    /// Registry factory.
    pub fn factory(options: &TransportOptions) -> Result<Box<dyn PvClient>, PvError> {
        Ok(Box::new(Self::from_config(&options.simulation)))
    }

    /// Another handle onto the same channel map.
    pub fn handle(&self) -> Self {
        self.clone()
    }

    pub fn set_auto_create(&self, enabled: bool) {
        self.state.lock().auto_create = enabled;
    }

    pub fn set_scalar(&self, name: &str, value: f64) {
        self.state
            .lock()
            .channels
            .insert(name.to_string(), SimValue::Scalar(value));
    }

    pub fn set_waveform(&self, name: &str, values: Vec<f64>) {
        self.state
            .lock()
            .channels
            .insert(name.to_string(), SimValue::Waveform(values));
    }

    pub fn set_string(&self, name: &str, value: &str) {
        self.state
            .lock()
            .channels
            .insert(name.to_string(), SimValue::Text(value.to_string()));
    }

    pub fn set_enum(&self, name: &str, value: u16) {
        self.state
            .lock()
            .channels
            .insert(name.to_string(), SimValue::Enum(value));
    }

    pub fn value(&self, name: &str) -> Option<SimValue> {
        self.state.lock().channels.get(name).cloned()
    }

    pub fn scalar(&self, name: &str) -> Option<f64> {
        match self.value(name)? {
            SimValue::Scalar(v) => Some(v),
            SimValue::Enum(v) => Some(f64::from(v)),
            _ => None,
        }
    }

    pub fn waveform(&self, name: &str) -> Option<Vec<f64>> {
        match self.value(name)? {
            SimValue::Waveform(v) => Some(v),
            _ => None,
        }
    }

    pub fn string(&self, name: &str) -> Option<String> {
        match self.value(name)? {
            SimValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Make reads of `name` fail until cleared.
    pub fn fail_reads(&self, name: &str, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing_reads.insert(name.to_string());
        } else {
            state.failing_reads.remove(name);
        }
    }

    /// Make writes of `name` fail until cleared.
    pub fn fail_writes(&self, name: &str, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing_writes.insert(name.to_string());
        } else {
            state.failing_writes.remove(name);
        }
    }

    pub fn set_writable(&self, name: &str, writable: bool) {
        let mut state = self.state.lock();
        if writable {
            state.read_only.remove(name);
        } else {
            state.read_only.insert(name.to_string());
        }
    }

    pub fn add_response(&self, response: SimResponse) {
        self.state.lock().responses.push(response);
    }

    /// Number of successful put requests (scalar batches, waveforms, strings, enums).
    pub fn put_count(&self) -> u64 {
        self.state.lock().put_count
    }
}

impl PvClient for SimPvClient {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn connect(&mut self, names: &[String], _timeout: Duration) -> Result<(), PvError> {
        let mut state = self.state.lock();
        let mut missing = Vec::new();
        for name in names {
            if state.channels.contains_key(name) {
                continue;
            }
            if state.auto_create {
                debug!("Auto-creating simulated channel {name}");
                state.channels.insert(name.clone(), SimValue::Scalar(0.0));
            } else if !missing.contains(name) {
                missing.push(name.clone());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PvError::NotConnected { names: missing })
        }
    }

    fn get_values(&mut self, names: &[String]) -> Result<Vec<f64>, PvError> {
        let state = self.state.lock();
        names
            .iter()
            .map(|name| match state.lookup(name)? {
                SimValue::Scalar(v) => Ok(*v),
                SimValue::Enum(v) => Ok(f64::from(*v)),
                _ => Err(PvError::TypeMismatch {
                    name: name.clone(),
                    expected: "scalar",
                }),
            })
            .collect()
    }

    fn put_values(&mut self, names: &[String], values: &[f64]) -> Result<(), PvError> {
        if names.len() != values.len() {
            return Err(PvError::Length {
                name: names.first().cloned().unwrap_or_default(),
                needed: names.len(),
                found: values.len(),
            });
        }
        let mut state = self.state.lock();
        for name in names {
            state.check_write(name)?;
        }
        for (name, value) in names.iter().zip(values) {
            state.put_scalar(name, *value)?;
        }
        state.put_count += 1;
        Ok(())
    }

    fn get_waveform(&mut self, name: &str) -> Result<Vec<f64>, PvError> {
        match self.state.lock().lookup(name)? {
            SimValue::Waveform(v) => Ok(v.clone()),
            _ => Err(PvError::TypeMismatch {
                name: name.to_string(),
                expected: "waveform",
            }),
        }
    }

    fn put_waveform(&mut self, name: &str, values: &[f64]) -> Result<(), PvError> {
        let mut state = self.state.lock();
        state.check_write(name)?;
        state
            .channels
            .insert(name.to_string(), SimValue::Waveform(values.to_vec()));
        state.put_count += 1;
        Ok(())
    }

    fn get_string(&mut self, name: &str) -> Result<String, PvError> {
        match self.state.lock().lookup(name)? {
            SimValue::Text(s) => Ok(s.clone()),
            SimValue::Scalar(v) => Ok(v.to_string()),
            _ => Err(PvError::TypeMismatch {
                name: name.to_string(),
                expected: "string",
            }),
        }
    }

    fn put_string(&mut self, name: &str, value: &str) -> Result<(), PvError> {
        let mut state = self.state.lock();
        state.check_write(name)?;
        state
            .channels
            .insert(name.to_string(), SimValue::Text(value.to_string()));
        state.put_count += 1;
        Ok(())
    }

    fn get_enum(&mut self, name: &str) -> Result<u16, PvError> {
        match self.state.lock().lookup(name)? {
            SimValue::Enum(v) => Ok(*v),
            SimValue::Scalar(v) if *v >= 0.0 && *v <= f64::from(u16::MAX) => Ok(*v as u16),
            _ => Err(PvError::TypeMismatch {
                name: name.to_string(),
                expected: "enum",
            }),
        }
    }

    fn put_enum(&mut self, name: &str, value: u16) -> Result<(), PvError> {
        let mut state = self.state.lock();
        state.check_write(name)?;
        state.channels.insert(name.to_string(), SimValue::Enum(value));
        state.put_count += 1;
        Ok(())
    }

    fn write_access(&mut self, name: &str) -> Result<bool, PvError> {
        let state = self.state.lock();
        if !state.channels.contains_key(name) {
            return Err(PvError::NotConnected {
                names: vec![name.to_string()],
            });
        }
        Ok(!state.read_only.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn connect_reports_every_missing_channel() {
        let mut client = SimPvClient::new();
        client.set_scalar("A", 1.0);
        let err = client
            .connect(&names(&["A", "B", "C"]), Duration::from_secs(1))
            .unwrap_err();
        match err {
            PvError::NotConnected { names } => assert_eq!(names, vec!["B", "C"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn auto_create_makes_zero_scalars() {
        let mut client = SimPvClient::new();
        client.set_auto_create(true);
        client
            .connect(&names(&["X"]), Duration::from_secs(1))
            .unwrap();
        assert_eq!(client.get_values(&names(&["X"])).unwrap(), vec![0.0]);
    }

    #[test]
    fn linear_response_moves_readback() {
        let mut client = SimPvClient::new();
        client.set_scalar("BPM", 1.0);
        client.set_scalar("HCM", 0.0);
        client.add_response(SimResponse {
            readback: "BPM".to_string(),
            actuator: "HCM".to_string(),
            coefficient: 2.0,
        });
        client.put_values(&names(&["HCM"]), &[-0.5]).unwrap();
        assert_eq!(client.scalar("BPM"), Some(0.0));
        assert_eq!(client.put_count(), 1);
    }

    #[test]
    fn failing_write_leaves_batch_untouched() {
        let mut client = SimPvClient::new();
        client.set_scalar("A", 1.0);
        client.set_scalar("B", 2.0);
        client.fail_writes("B", true);
        assert!(matches!(
            client.put_values(&names(&["A", "B"]), &[5.0, 6.0]),
            Err(PvError::Write { .. })
        ));
        assert_eq!(client.scalar("A"), Some(1.0));
        assert_eq!(client.put_count(), 0);
    }

    #[test]
    fn handles_share_state() {
        let client = SimPvClient::new();
        let mut other = client.handle();
        client.set_waveform("WF", vec![1.0, 2.0, 3.0]);
        assert_eq!(other.get_waveform("WF").unwrap(), vec![1.0, 2.0, 3.0]);
        other.put_string("STATUS", "x").unwrap_err();
        client.set_string("STATUS", "Idle");
        other.put_string("STATUS", "Running").unwrap();
        assert_eq!(client.string("STATUS").as_deref(), Some("Running"));
    }

    #[test]
    fn read_only_channels_deny_write_access() {
        let config: SimulationConfig = toml::from_str(
            r#"
read_only = ["HCM"]
[scalars]
HCM = 0.0
"#,
        )
        .unwrap();
        let mut client = SimPvClient::from_config(&config);
        assert!(!client.write_access("HCM").unwrap());
        client.set_writable("HCM", true);
        assert!(client.write_access("HCM").unwrap());
    }
}
