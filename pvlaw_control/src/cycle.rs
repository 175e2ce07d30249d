//! Control-law cycle runner.
//!
//! One iteration reads readbacks, adjusts them, gates on the action limit,
//! reads the actuators, evaluates tests, computes and limits the
//! correction, commits it, and records the outputs. Iterations are
//! separated by a sliced sleep that heartbeats the supervisor and watches
//! the signal flags.
//!
//! Everything the command file defines lives in one [`LoopDefinition`]. A
//! reload builds a complete replacement before swapping it in; a failed
//! reload leaves the running definition untouched.
//!
//! - [`acquire`] - Batched vector reads, averaging and writes
//! - [`sleep`] - Heartbeating, signal-aware sleep

pub mod acquire;
pub mod sleep;

use chrono::Utc;
use pvlaw_common::pv::registry::{TransportOptions, TransportRegistry};
use pvlaw_common::pv::PvClient;
use pvlaw_common::run_control::{RunControl, Severity};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::config::{CommandFile, ControlLawConfig, DespikeConfig};
use crate::control::correction::update_errors;
use crate::control::limiting::clamp_all;
use crate::control::{Correction, compute_correction};
use crate::error::ControlLawError;
use crate::hook::{CommandHook, PostChangeHook};
use crate::kernel::despike::{DespikeParams, ThresholdRamp, despike_masked};
use crate::kernel::stats::{nan_channels, summarize};
use crate::loader;
use crate::model::{LoopDefinition, LoopState, TestOutcome};
use crate::report::Snapshot;
use crate::report::audit::AuditLog;
use crate::report::glitch::{GlitchLog, GlitchThresholds};
use crate::report::output::TimeSeriesLog;
use crate::report::stats::{IterationStats, StatisticsLog};
use crate::signals::{self, SignalFlags, StopRequest};
use crate::tunables::{Tunables, check_averaging};
use acquire::Averaged;
use sleep::Wake;

/// Status text while corrections are being applied.
pub const STATUS_RUNNING: &str = "Running";
/// Status text while waiting out a test hold-off.
pub const STATUS_HOLDING: &str = "Holding off";
/// Status text after teardown.
pub const STATUS_STOPPED: &str = "Stopped";

// ─── Iteration Outcome ──────────────────────────────────────────────

/// What an iteration did with the actuators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// New values written.
    Wrote,
    /// Computed but not written (dry run).
    DryRun,
    /// Write permission check failed.
    WriteDenied,
    /// The write request failed.
    WriteFailed,
    /// Every readback inside its action limit.
    ActionGate,
    /// A test was out of range.
    OutOfRange,
    /// Tests cleared recently; waiting out the hold-off.
    HoldingOff,
    /// A readback or actuator read failed.
    Degraded,
    /// A stop or reload request cut the averaged read short.
    Interrupted,
}

/// Result of one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport {
    pub step: u64,
    pub action: Action,
    /// The correction computed, if the loop got that far.
    pub correction: Option<Correction>,
    pub failed_tests: Vec<String>,
    /// Back-off sleep requested by failing tests.
    pub backoff: Duration,
}

// ─── Loop Statistics ────────────────────────────────────────────────

/// Counters over the life of a loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopStats {
    pub iterations: u64,
    pub writes: u64,
    pub dry_runs: u64,
    pub gated: u64,
    pub held: u64,
    pub degraded: u64,
    /// Iterations ending in a non-fatal error.
    pub failed: u64,
    pub reloads: u64,
    pub min_iteration: Duration,
    pub max_iteration: Duration,
    total_iteration: Duration,
}

impl LoopStats {
    fn record(&mut self, action: Action, took: Duration) {
        self.iterations += 1;
        match action {
            Action::Wrote => self.writes += 1,
            Action::DryRun => self.dry_runs += 1,
            Action::ActionGate => self.gated += 1,
            Action::OutOfRange | Action::HoldingOff => self.held += 1,
            Action::Degraded | Action::WriteDenied | Action::WriteFailed => self.degraded += 1,
            Action::Interrupted => {}
        }
        if self.iterations == 1 || took < self.min_iteration {
            self.min_iteration = took;
        }
        self.max_iteration = self.max_iteration.max(took);
        self.total_iteration += took;
    }

    /// Mean iteration time (zero before the first iteration).
    pub fn avg_iteration(&self) -> Duration {
        match u32::try_from(self.iterations) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.total_iteration / n,
        }
    }
}

// ─── Despiking Stage ────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct DespikeStage {
    params: DespikeParams,
    ramp: Option<ThresholdRamp>,
    retrigger: Option<String>,
}

impl DespikeStage {
    fn from_config(c: &DespikeConfig) -> Option<Self> {
        c.enabled.then(|| Self {
            params: c.params(),
            ramp: c
                .ramp_start
                .map(|start| ThresholdRamp::new(start, c.threshold, c.ramp_steps)),
            retrigger: c.ramp_retrigger_pv.clone(),
        })
    }

    fn threshold(&self) -> f64 {
        self.ramp
            .as_ref()
            .map_or(self.params.threshold, ThresholdRamp::current)
    }

    fn poll_retrigger(&mut self, pv: &mut dyn PvClient) {
        let (Some(name), Some(ramp)) = (&self.retrigger, &mut self.ramp) else {
            return;
        };
        match pv.get_enum(name) {
            Ok(0) => {}
            Ok(_) => {
                info!("despike threshold ramp restarted by {name}");
                ramp.restart();
                if let Err(e) = pv.put_enum(name, 0) {
                    warn!("cannot clear {name}: {e}");
                }
            }
            Err(e) => warn!("cannot read {name}: {e}"),
        }
    }
}

// ─── Settings Derived From The Command File ─────────────────────────

struct Settings {
    tunables: Tunables,
    despike: Option<DespikeStage>,
    hook: Option<Box<dyn PostChangeHook>>,
    status_pv: Option<String>,
    write_check: bool,
    steps: Option<u64>,
}

impl Settings {
    fn from_config(c: &ControlLawConfig) -> Self {
        Self {
            tunables: Tunables::from_config(&c.tunables),
            despike: DespikeStage::from_config(&c.despike),
            hook: c
                .output
                .post_change_command
                .as_deref()
                .map(|cmd| Box::new(CommandHook::new(cmd)) as Box<dyn PostChangeHook>),
            status_pv: c.output.status_pv.clone(),
            write_check: c.loop_.write_check,
            steps: c.loop_.steps,
        }
    }

    /// PVs outside the loop definition that must be connected.
    fn pv_names(&self) -> Vec<String> {
        let mut names = self.tunables.pv_names();
        if let Some(name) = self.despike.as_ref().and_then(|d| d.retrigger.clone()) {
            names.push(name);
        }
        names.extend(self.status_pv.clone());
        names
    }
}

fn apply_loop_config(state: &mut LoopState, c: &ControlLawConfig) {
    let l = &c.loop_;
    state.gain = l.gain;
    state.interval = c.interval();
    state.mode = l.mode;
    state.average = l.average;
    state.average_interval = c.average_interval();
    state.dry_run = l.dry_run;
    state.hold_present = l.hold_present_values;
}

/// Connect every PV and capture startup values.
fn prepare(
    pv: &mut dyn PvClient,
    command: &CommandFile,
    def: &mut LoopDefinition,
    settings: &Settings,
) -> Result<(), ControlLawError> {
    let mut names = def.pv_names();
    for name in settings.pv_names() {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    debug!("connecting {} PVs", names.len());
    pv.connect(&names, command.config.pv_timeout())
        .map_err(ControlLawError::Connect)?;

    let readbacks = acquire::read_vector(pv, &def.readbacks).map_err(ControlLawError::Connect)?;
    def.readbacks.set_values(&readbacks);
    def.readbacks.capture_initial();
    let actuators = acquire::read_vector(pv, &def.actuators).map_err(ControlLawError::Connect)?;
    def.actuators.set_values(&actuators);
    def.actuators.capture_initial();
    Ok(())
}

// ─── Output Files ───────────────────────────────────────────────────

/// Column names of the time-series and glitch logs.
pub fn log_columns(def: &LoopDefinition) -> Vec<String> {
    let mut columns = def.readbacks.symbolic_names();
    columns.extend(def.actuators.symbolic_names());
    if let Some(tests) = &def.tests {
        columns.extend(tests.pv_names());
    }
    for wt in &def.waveform_tests {
        columns.extend(wt.elements.iter().map(|e| format!("{}[{}]", wt.pv, e.index)));
    }
    columns
}

fn log_values(def: &LoopDefinition, actuators: &[f64]) -> Vec<f64> {
    let mut values = def.readbacks.values();
    values.extend_from_slice(actuators);
    if let Some(tests) = &def.tests {
        values.extend(tests.values());
    }
    for wt in &def.waveform_tests {
        values.extend((0..wt.elements.len()).map(|i| wt.values.get(i).copied().unwrap_or(f64::NAN)));
    }
    values
}

#[derive(Default)]
struct Outputs {
    source: Option<(crate::config::OutputConfig, crate::config::GlitchConfig, Vec<String>)>,
    log: Option<TimeSeriesLog>,
    statistics: Option<StatisticsLog>,
    audit: Option<AuditLog>,
    glitch: Option<GlitchLog>,
}

impl Outputs {
    fn open(c: &ControlLawConfig, columns: Vec<String>) -> Result<Self, ControlLawError> {
        let now = Utc::now();
        let rotation = c.output.rotation;
        let log = c
            .output
            .log
            .as_deref()
            .map(|p| TimeSeriesLog::create(p, rotation, &columns, now))
            .transpose()?;
        let statistics = c
            .output
            .statistics
            .as_deref()
            .map(|p| StatisticsLog::create(p, rotation, now))
            .transpose()?;
        let audit = c
            .output
            .audit
            .as_deref()
            .map(|p| AuditLog::create(p, rotation, now))
            .transpose()?;
        let thresholds = GlitchThresholds {
            readback_rms: c.glitch.readback_rms,
            delta_rms: c.glitch.delta_rms,
        };
        let glitch = c
            .glitch
            .file
            .as_deref()
            .map(|p| GlitchLog::create(p, rotation, &columns, c.glitch.rows, thresholds, now))
            .transpose()?;
        Ok(Self {
            source: Some((c.output.clone(), c.glitch.clone(), columns)),
            log,
            statistics,
            audit,
            glitch,
        })
    }

    fn matches(&self, c: &ControlLawConfig, columns: &[String]) -> bool {
        self.source
            .as_ref()
            .is_some_and(|(o, g, cols)| *o == c.output && *g == c.glitch && cols == columns)
    }
}

// ─── Control Law ────────────────────────────────────────────────────

/// The control loop and everything it owns.
///
/// Teardown runs exactly once, from [`ControlLaw::run`] or on drop.
pub struct ControlLaw {
    command: CommandFile,
    def: LoopDefinition,
    state: LoopState,
    settings: Settings,
    pv: Box<dyn PvClient>,
    run_control: Box<dyn RunControl>,
    flags: &'static SignalFlags,
    outputs: Outputs,
    stats: LoopStats,
    /// Despike threshold set through the tunable PV.
    threshold_override: Option<f64>,
    /// Hold-off owed once failing tests clear.
    hold_off: Duration,
    holding_until: Option<Instant>,
    /// Reload request consumed during an averaged read.
    reload_pending: bool,
    status: String,
    shut_down: bool,
}

impl ControlLaw {
    /// Load the definition, register with the supervisor, connect every
    /// PV, capture startup values and open the outputs.
    ///
    /// # Errors
    /// Configuration, connection, run-control and output-file failures.
    pub fn new(
        command: CommandFile,
        mut pv: Box<dyn PvClient>,
        mut run_control: Box<dyn RunControl>,
    ) -> Result<Self, ControlLawError> {
        let mut def = loader::load(&command)?;
        let settings = Settings::from_config(&command.config);
        let c = &command.config;

        let mut state = LoopState::new(c.interval(), c.loop_.gain, c.loop_.mode);
        apply_loop_config(&mut state, c);
        check_averaging(&state)?;

        let description = if c.run_control.description.is_empty() {
            c.shared.service_name.clone()
        } else {
            c.run_control.description.clone()
        };
        run_control.init(&description)?;

        prepare(pv.as_mut(), &command, &mut def, &settings)?;
        let outputs = Outputs::open(c, log_columns(&def))?;

        info!(
            "{description}: {} readbacks, {} actuators via {} transport{}",
            def.readbacks.len(),
            def.actuators.len(),
            pv.name(),
            if state.dry_run { " (dry run)" } else { "" }
        );
        Ok(Self {
            command,
            def,
            state,
            settings,
            pv,
            run_control,
            flags: signals::flags(),
            outputs,
            stats: LoopStats::default(),
            threshold_override: None,
            hold_off: Duration::ZERO,
            holding_until: None,
            reload_pending: false,
            status: String::new(),
            shut_down: false,
        })
    }

    /// Build the transport named in the command file from `registry`, and
    /// the configured supervisor.
    ///
    /// # Errors
    /// As [`ControlLaw::new`]; an unknown transport is a connection error.
    pub fn with_transport(
        command: CommandFile,
        registry: &TransportRegistry,
    ) -> Result<Self, ControlLawError> {
        let options = TransportOptions {
            timeout: command.config.pv_timeout(),
            simulation: command.config.simulation.clone(),
        };
        let pv = registry
            .create(&command.config.loop_.transport, &options)
            .map_err(ControlLawError::Connect)?;
        let run_control = command.config.run_control.build();
        Self::new(command, pv, run_control)
    }

    /// Watch `flags` instead of the process-wide signal flags.
    pub fn with_signal_flags(mut self, flags: &'static SignalFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn definition(&self) -> &LoopDefinition {
        &self.def
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn command(&self) -> &CommandFile {
        &self.command
    }

    // ─── Main Loop ──────────────────────────────────────────────────

    /// Iterate until the configured step count, a stop signal or a fatal
    /// error, then tear down.
    ///
    /// # Errors
    /// The fatal error or signal that ended the loop. A server-exit request
    /// ends it cleanly.
    pub fn run(&mut self) -> Result<LoopStats, ControlLawError> {
        let result = self.run_loop();
        self.shutdown(result.as_ref().err());
        result.map(|()| self.stats.clone())
    }

    fn run_loop(&mut self) -> Result<(), ControlLawError> {
        self.publish_status(STATUS_RUNNING);
        loop {
            if let Some(stop) = self.flags.stop_request() {
                return stopped(stop);
            }
            if self.flags.take_reload() || std::mem::take(&mut self.reload_pending) {
                self.reload()?;
            }

            let started = Instant::now();
            let backoff = match self.step_once() {
                Ok(report) => report.backoff,
                Err(e) if !e.is_fatal() => {
                    error!("step {}: {e}", self.state.step);
                    self.stats.failed += 1;
                    Duration::ZERO
                }
                Err(e) => return Err(e),
            };
            if let Some(stop) = self.flags.stop_request() {
                return stopped(stop);
            }

            if self.settings.steps.is_some_and(|n| self.state.step >= n) {
                info!("completed {} steps", self.state.step);
                return Ok(());
            }

            let nap = self
                .state
                .interval
                .saturating_sub(started.elapsed())
                .max(backoff);
            trace!("sleeping {nap:?}");
            match sleep::pause(nap, self.run_control.as_mut(), self.flags)? {
                Wake::Elapsed => {}
                Wake::Reload => self.reload()?,
                Wake::Stop(stop) => return stopped(stop),
            }
        }
    }

    /// Run one iteration and advance the step counter.
    ///
    /// # Errors
    /// Fatal errors, and non-fatal ones that failed this iteration.
    pub fn step_once(&mut self) -> Result<IterationReport, ControlLawError> {
        let started = Instant::now();
        let result = self.iteration();
        if let Ok(report) = &result {
            self.stats.record(report.action, started.elapsed());
        }
        self.state.step += 1;
        result
    }

    fn iteration(&mut self) -> Result<IterationReport, ControlLawError> {
        self.state.tick();
        let step = self.state.step;

        trace!("step {step}: poll tunables");
        self.settings.tunables.poll(
            self.pv.as_mut(),
            &mut self.state,
            &mut self.threshold_override,
        )?;

        trace!("step {step}: read readbacks");
        let raw = match acquire::read_averaged(
            self.pv.as_mut(),
            &self.def.readbacks,
            self.state.average,
            self.state.average_interval,
            self.run_control.as_mut(),
            self.flags,
        )? {
            Averaged::Values(values) => values,
            Averaged::Failed(e) => {
                warn!("step {step}: readback read failed, actuators held: {e}");
                return Ok(degraded(step));
            }
            Averaged::Interrupted(wake) => {
                debug!("step {step}: averaged read interrupted ({wake:?})");
                self.reload_pending |= wake == Wake::Reload;
                return Ok(IterationReport {
                    action: Action::Interrupted,
                    ..degraded(step)
                });
            }
        };

        trace!("step {step}: adjust readbacks");
        let adjusted = self.adjust_readbacks(&raw);
        self.def.readbacks.set_values(&adjusted);
        update_errors(&mut self.def.readbacks, self.state.hold_present);

        let errors = self.def.readbacks.errors();
        let gate_open = self
            .def
            .action_limits
            .as_ref()
            .is_none_or(|limits| limits.any_reaches(&errors));

        trace!("step {step}: read controls");
        let old = match acquire::read_vector(self.pv.as_mut(), &self.def.actuators) {
            Ok(values) => values,
            Err(e) => {
                warn!("step {step}: actuator read failed, actuators held: {e}");
                return Ok(degraded(step));
            }
        };
        self.def.actuators.set_values(&old);

        trace!("step {step}: check tests");
        let mut outcome = self.evaluate_tests();
        if let Some((name, value, min, max)) = outcome.exit.take() {
            return Err(ControlLawError::TestFailure {
                name,
                value,
                min,
                max,
            });
        }
        if outcome.reset_filters {
            if let Some(filters) = &mut self.def.filters {
                info!("test out of range past its reset time; clearing filter histories");
                filters.reset();
            }
        }
        let held = self.hold_decision(&outcome);

        let (action, correction) = match held {
            Some(action) => (action, Correction::hold(&old)),
            None if !gate_open => {
                debug!("step {step}: all readbacks inside action limits");
                (Action::ActionGate, Correction::hold(&old))
            }
            None => {
                trace!("step {step}: compute correction");
                let c = compute_correction(&self.def, self.state.gain, self.state.mode, &old);
                if c.scale < 1.0 {
                    debug!("step {step}: delta limit scaled correction by {:.4}", c.scale);
                }
                if c.clamped > 0 {
                    debug!("step {step}: {} actuator(s) clamped", c.clamped);
                }
                let action = self.commit(step, &c, &old)?;
                (action, c)
            }
        };

        trace!("step {step}: record");
        self.record(step, &raw, &correction, &old, outcome.glitch);
        self.def.readbacks.commit_values();

        let status = match action {
            Action::OutOfRange => format!("Out of range: {}", outcome.failed.join(", ")),
            Action::HoldingOff => STATUS_HOLDING.to_string(),
            _ => STATUS_RUNNING.to_string(),
        };
        self.publish_status(&status);
        self.run_control.ping()?;

        Ok(IterationReport {
            step,
            action,
            correction: Some(correction),
            failed_tests: outcome.failed,
            backoff: outcome.sleep,
        })
    }

    /// Despike, clamp and NaN-check a fresh readback vector.
    fn adjust_readbacks(&mut self, raw: &[f64]) -> Vec<f64> {
        let mut values = raw.to_vec();
        if let Some(stage) = &mut self.settings.despike {
            stage.poll_retrigger(self.pv.as_mut());
            let threshold = self.threshold_override.unwrap_or_else(|| stage.threshold());
            let mask = self.def.readbacks.despike_mask();
            let replaced = despike_masked(&mut values, &mask, &stage.params, threshold);
            if replaced > 0 {
                debug!("despiked {replaced} readback(s) at threshold {threshold}");
            }
            if let Some(ramp) = &mut stage.ramp {
                ramp.advance();
            }
        }
        if let Some(limits) = &self.def.readback_limits {
            let clamped = clamp_all(&mut values, limits);
            if clamped > 0 {
                debug!("{clamped} readback(s) clamped to readback limits");
            }
        }
        let names = self.def.readbacks.symbolic_names();
        let nan = nan_channels(&values, &names);
        if !nan.is_empty() {
            warn!("NaN readback(s): {}", nan.join(", "));
        }
        values
    }

    /// Read and evaluate every scalar and waveform test. Unreadable tests
    /// count as out of range.
    fn evaluate_tests(&mut self) -> TestOutcome {
        let interval = self.state.interval;
        let mut outcome = TestOutcome::default();
        if let Some(tests) = &mut self.def.tests {
            match self.pv.get_values(&tests.pv_names()) {
                Ok(values) => outcome.merge(tests.evaluate(&values, interval, Instant::now())),
                Err(e) => {
                    warn!("test PVs unreadable: {e}");
                    outcome.failed.push("test PVs unreadable".to_string());
                }
            }
        }
        for wt in &mut self.def.waveform_tests {
            match self.pv.get_waveform(&wt.pv) {
                Ok(waveform) => match wt.evaluate(&waveform, interval) {
                    Ok(o) => outcome.merge(o),
                    Err(needed) => {
                        warn!(
                            "{}: waveform has {} elements, tests need {needed}",
                            wt.pv,
                            waveform.len()
                        );
                        outcome.failed.push(format!("{} too short", wt.pv));
                    }
                },
                Err(e) => {
                    warn!("waveform test {} unreadable: {e}", wt.pv);
                    outcome.failed.push(format!("{} unreadable", wt.pv));
                }
            }
        }
        if !outcome.passed() {
            warn!("out of range: {}", outcome.failed.join(", "));
        }
        outcome
    }

    /// `Some` when tests (or their hold-off) keep the actuators still.
    fn hold_decision(&mut self, outcome: &TestOutcome) -> Option<Action> {
        let now = Instant::now();
        if !outcome.passed() {
            self.hold_off = self.hold_off.max(outcome.hold_off);
            self.holding_until = None;
            return Some(Action::OutOfRange);
        }
        if !self.hold_off.is_zero() {
            info!("tests back in range; holding off {:?}", self.hold_off);
            self.holding_until = now.checked_add(self.hold_off);
            self.hold_off = Duration::ZERO;
        }
        match self.holding_until {
            Some(until) if now < until => Some(Action::HoldingOff),
            _ => {
                self.holding_until = None;
                None
            }
        }
    }

    // ─── Commit Boundary ────────────────────────────────────────────

    /// Write `c.values` unless dry-run or write access forbids it. Filter
    /// histories and committed values only move when the write succeeds.
    fn commit(
        &mut self,
        step: u64,
        c: &Correction,
        old: &[f64],
    ) -> Result<Action, ControlLawError> {
        if self.state.dry_run {
            debug!("step {step}: dry run, not writing {:?}", c.values);
            return Ok(Action::DryRun);
        }
        if self.settings.write_check {
            for name in acquire::write_targets(&self.def.actuators) {
                match self.pv.write_access(&name) {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!("step {step}: no write access to {name}; write skipped");
                        return Ok(Action::WriteDenied);
                    }
                    Err(e) => {
                        warn!("step {step}: write access check failed: {e}; write skipped");
                        return Ok(Action::WriteDenied);
                    }
                }
            }
        }
        if let Err(e) = acquire::write_vector(self.pv.as_mut(), &self.def.actuators, &c.values) {
            warn!("step {step}: actuator write failed: {e}");
            return Ok(Action::WriteFailed);
        }

        if let Some(filters) = &mut self.def.filters {
            filters.commit(&c.raw, &c.applied_filtered(old, self.state.mode));
        }
        self.def.actuators.set_values(&c.values);
        self.def.actuators.commit_values();
        if let Some(audit) = &mut self.outputs.audit {
            let names = self.def.actuators.symbolic_names();
            if let Err(e) = audit.record(step, Utc::now(), &names, old, &c.values) {
                warn!("{e}");
            }
        }
        if let Some(hook) = &mut self.settings.hook {
            hook.run(step)?;
        }
        Ok(Action::Wrote)
    }

    // ─── Reporting ──────────────────────────────────────────────────

    fn record(&mut self, step: u64, raw: &[f64], c: &Correction, old: &[f64], test_glitch: bool) {
        let rb_names = self.def.readbacks.symbolic_names();
        let act_names = self.def.actuators.symbolic_names();
        let stats = IterationStats {
            readback: summarize(raw, &rb_names),
            adjusted: summarize(&self.def.readbacks.errors(), &rb_names),
            control: summarize(&c.values, &act_names),
            delta: summarize(&c.deltas(old), &act_names),
        };
        debug!(
            "step {step}: error rms {:.6} (largest {} {:.6}), delta rms {:.6}",
            stats.adjusted.rms, stats.adjusted.largest_name, stats.adjusted.largest, stats.delta.rms
        );

        let snapshot = Snapshot {
            step,
            elapsed: self.state.elapsed,
            epoch: self.state.epoch(),
            values: log_values(&self.def, &c.values),
        };
        if let Some(log) = &mut self.outputs.log {
            if let Err(e) = log.record(&snapshot) {
                warn!("{e}");
            }
        }
        if let Some(statistics) = &mut self.outputs.statistics {
            if let Err(e) = statistics.record(&snapshot, &stats) {
                warn!("{e}");
            }
        }
        if let Some(glitch) = &mut self.outputs.glitch {
            let reason = glitch
                .thresholds()
                .reason(stats.adjusted.rms, stats.delta.rms, test_glitch);
            if let Err(e) = glitch.record(snapshot, reason.as_deref()) {
                warn!("{e}");
            }
        }
    }

    /// Publish a changed status to the log, the supervisor and the status PV.
    fn publish_status(&mut self, text: &str) {
        if self.status == text {
            return;
        }
        info!("status: {text}");
        let severity = if text.starts_with("Out of range") {
            Severity::Warning
        } else {
            Severity::Info
        };
        if let Err(e) = self.run_control.log_message(severity, text) {
            warn!("run control message failed: {e}");
        }
        if let Some(name) = &self.settings.status_pv {
            if let Err(e) = self.pv.put_string(name, text) {
                warn!("cannot write status to {name}: {e}");
            }
        }
        self.status = text.to_string();
    }

    // ─── Reload ─────────────────────────────────────────────────────

    /// Re-read the command file and rebuild everything derived from it.
    ///
    /// A command file or data file that fails to load is reported and the
    /// running configuration kept.
    ///
    /// # Errors
    /// Connection failures of the new configuration.
    pub fn reload(&mut self) -> Result<(), ControlLawError> {
        info!("reloading command file");
        let built = self
            .command
            .reload()
            .map_err(ControlLawError::from)
            .and_then(|command| loader::load(&command).map(|def| (command, def)));
        let (command, mut def) = match built {
            Ok(pair) => pair,
            Err(e) => {
                error!("reload failed, keeping current configuration: {e}");
                return Ok(());
            }
        };

        let settings = Settings::from_config(&command.config);
        prepare(self.pv.as_mut(), &command, &mut def, &settings)?;

        let columns = log_columns(&def);
        if !self.outputs.matches(&command.config, &columns) {
            match Outputs::open(&command.config, columns) {
                Ok(outputs) => self.outputs = outputs,
                Err(e) => {
                    error!("reload failed, keeping current configuration: {e}");
                    return Ok(());
                }
            }
        }

        apply_loop_config(&mut self.state, &command.config);
        self.def = def;
        self.command = command;
        self.settings = settings;
        self.threshold_override = None;
        self.hold_off = Duration::ZERO;
        self.holding_until = None;
        self.stats.reloads += 1;
        info!(
            "reloaded: {} readbacks, {} actuators",
            self.def.readbacks.len(),
            self.def.actuators.len()
        );
        Ok(())
    }

    // ─── Teardown ───────────────────────────────────────────────────

    /// Report `error` to the supervisor, publish the stopped status, close
    /// the outputs and disconnect. Runs once.
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
        self.publish_status(STATUS_STOPPED);
        self.outputs = Outputs::default();
        if let Err(e) = self.run_control.exit() {
            warn!("run control exit failed: {e}");
        }
        if let Err(e) = self.pv.disconnect() {
            warn!("PV disconnect failed: {e}");
        }
        info!(
            "stopped after {} iterations: {} writes, {} gated, {} held, {} degraded, {} failed (avg {:?}, max {:?})",
            self.stats.iterations,
            self.stats.writes,
            self.stats.gated,
            self.stats.held,
            self.stats.degraded,
            self.stats.failed,
            self.stats.avg_iteration(),
            self.stats.max_iteration
        );
    }
}

impl Drop for ControlLaw {
    fn drop(&mut self) {
        self.shutdown(None);
    }
}

fn degraded(step: u64) -> IterationReport {
    IterationReport {
        step,
        action: Action::Degraded,
        correction: None,
        failed_tests: Vec::new(),
        backoff: Duration::ZERO,
    }
}

fn stopped(stop: StopRequest) -> Result<(), ControlLawError> {
    match stop.into_error() {
        Some(e) => {
            warn!("stopping: {e}");
            Err(e)
        }
        None => {
            info!("server exit requested");
            Ok(())
        }
    }
}
