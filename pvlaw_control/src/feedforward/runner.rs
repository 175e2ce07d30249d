//! Feed-forward cycle.

use pvlaw_common::pv::PvClient;
use pvlaw_common::pv::registry::{TransportOptions, TransportRegistry};
use pvlaw_common::run_control::{RunControl, Severity};
use pvlaw_common::table::Table;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use super::FeedforwardConfig;
use super::table::{FeedforwardTable, load_table};
use crate::cycle::sleep::{self, Wake};
use crate::error::ControlLawError;
use crate::signals::{self, SignalFlags};

/// Outcome of one feed-forward iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedforwardReport {
    pub step: u64,
    /// Tables whose readbacks moved enough to be re-evaluated.
    pub evaluated: usize,
    /// Tables queried outside their domain.
    pub out_of_range: usize,
    /// Actuators given a new value, with that value.
    pub changes: Vec<(String, f64)>,
    /// Whether the changes were written.
    pub wrote: bool,
}

/// Counters for the whole run.
#[derive(Debug, Clone, Default)]
pub struct FeedforwardStats {
    pub iterations: u64,
    pub writes: u64,
    pub failed: u64,
    pub max_iteration: Duration,
}

/// Table files resolved, parsed and checked for conflicting actuators.
///
/// # Errors
/// Missing or malformed tables, and two tables driving one actuator.
pub fn load_tables(config: &FeedforwardConfig) -> Result<Vec<FeedforwardTable>, ControlLawError> {
    let search = config.search_path();
    let mut tables: Vec<FeedforwardTable> = Vec::with_capacity(config.feedforward.files.len());
    for name in &config.feedforward.files {
        let path = search.resolve(name)?;
        let table = load_table(&Table::read(&path)?)?;
        if let Some(other) = tables.iter().find(|t| t.actuator == table.actuator) {
            return Err(ControlLawError::invalid(
                &path,
                format!(
                    "actuator {} is already driven by {}",
                    table.actuator,
                    other.file.display()
                ),
            ));
        }
        debug!(
            "{}: {}-D table for {}",
            path.display(),
            table.dimensions(),
            table.actuator
        );
        tables.push(table);
    }
    Ok(tables)
}

pub struct Feedforward {
    config: FeedforwardConfig,
    tables: Vec<FeedforwardTable>,
    /// Distinct readback PVs, in first-use order.
    readbacks: Vec<String>,
    /// Per table, positions of its readbacks in `readbacks`.
    inputs: Vec<Vec<usize>>,
    actuators: Vec<String>,
    pv: Box<dyn PvClient>,
    run_control: Box<dyn RunControl>,
    flags: &'static SignalFlags,
    step: u64,
    stats: FeedforwardStats,
    shut_down: bool,
}

impl Feedforward {
    /// Load the tables, register with the supervisor and connect every PV.
    ///
    /// # Errors
    /// Table, connection and run-control failures.
    pub fn new(
        config: FeedforwardConfig,
        mut pv: Box<dyn PvClient>,
        mut run_control: Box<dyn RunControl>,
    ) -> Result<Self, ControlLawError> {
        let tables = load_tables(&config)?;

        let mut index: HashMap<String, usize> = HashMap::new();
        let mut readbacks = Vec::new();
        let inputs: Vec<Vec<usize>> = tables
            .iter()
            .map(|t| {
                t.readbacks
                    .iter()
                    .map(|name| {
                        *index.entry(name.clone()).or_insert_with(|| {
                            readbacks.push(name.clone());
                            readbacks.len() - 1
                        })
                    })
                    .collect()
            })
            .collect();
        let actuators: Vec<String> = tables.iter().map(|t| t.actuator.clone()).collect();

        let description = if config.run_control.description.is_empty() {
            config.shared.service_name.clone()
        } else {
            config.run_control.description.clone()
        };
        run_control.init(&description)?;

        let mut names = readbacks.clone();
        names.extend(actuators.iter().cloned());
        pv.connect(&names, config.pv_timeout())
            .map_err(ControlLawError::Connect)?;

        info!(
            "{description}: {} tables, {} readbacks via {} transport{}",
            tables.len(),
            readbacks.len(),
            pv.name(),
            if config.feedforward.dry_run { " (dry run)" } else { "" }
        );
        Ok(Self {
            config,
            tables,
            readbacks,
            inputs,
            actuators,
            pv,
            run_control,
            flags: signals::flags(),
            step: 0,
            stats: FeedforwardStats::default(),
            shut_down: false,
        })
    }

    /// Build the configured transport from `registry` and the configured
    /// supervisor.
    ///
    /// # Errors
    /// As [`Feedforward::new`]; an unknown transport is a connection error.
    pub fn with_transport(
        config: FeedforwardConfig,
        registry: &TransportRegistry,
    ) -> Result<Self, ControlLawError> {
        let options = TransportOptions {
            timeout: config.pv_timeout(),
            simulation: config.simulation.clone(),
        };
        let pv = registry
            .create(&config.feedforward.transport, &options)
            .map_err(ControlLawError::Connect)?;
        let run_control = config.run_control.build();
        Self::new(config, pv, run_control)
    }

    pub fn with_signal_flags(mut self, flags: &'static SignalFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn tables(&self) -> &[FeedforwardTable] {
        &self.tables
    }

    pub fn stats(&self) -> &FeedforwardStats {
        &self.stats
    }

    // ─── Main Loop ──────────────────────────────────────────────────

    /// Iterate until the step count or a stop request, then tear down.
    ///
    /// # Errors
    /// The fatal error or signal that ended the loop.
    pub fn run(&mut self) -> Result<FeedforwardStats, ControlLawError> {
        let result = self.run_loop();
        self.shutdown(result.as_ref().err());
        result.map(|()| self.stats.clone())
    }

    fn run_loop(&mut self) -> Result<(), ControlLawError> {
        let interval = self.config.interval();
        loop {
            if let Some(stop) = self.flags.stop_request() {
                return stop.into_error().map_or(Ok(()), Err);
            }

            let started = Instant::now();
            if let Err(e) = self.step_once() {
                if e.is_fatal() {
                    return Err(e);
                }
                error!("step {}: {e}", self.step);
                self.stats.failed += 1;
            }
            self.stats.max_iteration = self.stats.max_iteration.max(started.elapsed());

            if self.config.feedforward.steps.is_some_and(|n| self.step >= n) {
                info!("completed {} steps", self.step);
                return Ok(());
            }

            let nap = interval.saturating_sub(started.elapsed());
            trace!("sleeping {nap:?}");
            match sleep::pause(nap, self.run_control.as_mut(), self.flags)? {
                Wake::Elapsed => {}
                Wake::Reload => debug!("reload request ignored"),
                Wake::Stop(stop) => return stop.into_error().map_or(Ok(()), Err),
            }
        }
    }

    /// Read, evaluate every table and write the changed actuators.
    ///
    /// # Errors
    /// PV request failures (not fatal) and run-control failures.
    pub fn step_once(&mut self) -> Result<FeedforwardReport, ControlLawError> {
        self.step += 1;
        self.stats.iterations += 1;
        let step = self.step;
        let order = self.config.feedforward.order;

        trace!("step {step}: read readbacks");
        let readbacks = self
            .pv
            .get_values(&self.readbacks)
            .map_err(ControlLawError::Pv)?;
        trace!("step {step}: read actuators");
        let current = self
            .pv
            .get_values(&self.actuators)
            .map_err(ControlLawError::Pv)?;

        let mut report = FeedforwardReport {
            step,
            ..FeedforwardReport::default()
        };
        for ((table, inputs), &now) in self.tables.iter_mut().zip(&self.inputs).zip(&current) {
            let values: Vec<f64> = inputs.iter().map(|&i| readbacks[i]).collect();
            if values.iter().any(|v| v.is_nan()) {
                warn!("{}: NaN readback, skipped", table.actuator);
                continue;
            }
            let evaluation = match table.evaluate(&values, now, order) {
                Ok(Some(e)) => e,
                Ok(None) => continue,
                Err(e) => {
                    warn!("{}: {e}", table.file.display());
                    continue;
                }
            };
            report.evaluated += 1;
            if evaluation.status.is_out_of_range() {
                report.out_of_range += 1;
                warn!(
                    "{}: readbacks {values:?} outside table, clamped to {}",
                    table.actuator, evaluation.target
                );
            }
            if evaluation.value != now {
                report.changes.push((table.actuator.clone(), evaluation.value));
            }
        }

        trace!("step {step}: write {} actuators", report.changes.len());
        if !report.changes.is_empty() {
            if self.config.feedforward.dry_run {
                debug!("dry run: {:?}", report.changes);
            } else {
                let (names, values): (Vec<String>, Vec<f64>) =
                    report.changes.iter().cloned().unzip();
                self.pv
                    .put_values(&names, &values)
                    .map_err(ControlLawError::Pv)?;
                report.wrote = true;
                self.stats.writes += 1;
            }
        }
        debug!(
            "step {step}: {} evaluated, {} changed",
            report.evaluated,
            report.changes.len()
        );
        self.run_control.ping()?;
        Ok(report)
    }

    // ─── Teardown ───────────────────────────────────────────────────

    /// Report `error`, sign off from the supervisor and disconnect. Runs once.
    pub fn shutdown(&mut self, error: Option<&ControlLawError>) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        if let Some(e) = error {
            if let Err(rc) = self.run_control.log_message(Severity::Alarm, &e.to_string()) {
                warn!("run control message failed: {rc}");
            }
        }
        if let Err(e) = self.run_control.exit() {
            warn!("run control exit failed: {e}");
        }
        if let Err(e) = self.pv.disconnect() {
            warn!("PV disconnect failed: {e}");
        }
        info!(
            "stopped after {} iterations: {} writes, {} failed (max {:?})",
            self.stats.iterations, self.stats.writes, self.stats.failed, self.stats.max_iteration
        );
    }
}

impl Drop for Feedforward {
    fn drop(&mut self) {
        self.shutdown(None);
    }
}
