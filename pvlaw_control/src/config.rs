//! Command-file configuration with validation.
//!
//! The command file is a TOML document naming every data file and loop
//! setting. It is validated before any data file is opened. Command-line
//! flags are applied on top of the parsed file through [`Overrides`].
//!
//! ```toml
//! [shared]
//! service_name = "orbit-x"
//!
//! [loop]
//! gain = 0.5
//! interval = 2.0
//! steps = 1000
//!
//! [files]
//! matrix = "orbit-x.matrix.toml"
//!
//! [limits.delta]
//! value = 0.25
//! ```

use pvlaw_common::config::{ConfigError, ConfigLoader, SearchPath, SharedConfig, seconds};
use pvlaw_common::pv::sim::SimulationConfig;
use pvlaw_common::run_control::RunControlConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::kernel::despike::DespikeParams;
use crate::model::ControlMode;
use crate::report::Rotation;

// ─── Sections ───────────────────────────────────────────────────────

/// `[loop]`: iteration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopConfig {
    pub gain: f64,
    /// Seconds between iterations.
    pub interval: f64,
    /// Iterations to run; absent means run until stopped.
    pub steps: Option<u64>,
    pub mode: ControlMode,
    /// Regulate against the readbacks captured at startup.
    pub hold_present_values: bool,
    pub dry_run: bool,
    /// Samples averaged per read.
    pub average: usize,
    /// Seconds between averaged samples.
    pub average_interval: f64,
    /// Seconds allowed for connects and batched requests.
    pub pv_timeout: f64,
    /// Check write permission before every write.
    pub write_check: bool,
    /// PV transport name.
    pub transport: String,
    /// Matrix column holding actuator names; defaults to the first string column.
    pub actuator_column: Option<String>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            gain: 1.0,
            interval: 1.0,
            steps: None,
            mode: ControlMode::Integral,
            hold_present_values: false,
            dry_run: false,
            average: 1,
            average_interval: 0.0,
            pv_timeout: 10.0,
            write_check: false,
            transport: "sim".to_string(),
            actuator_column: None,
        }
    }
}

/// `[files]`: data files, resolved through the search path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilesConfig {
    /// Gain matrix (required).
    pub matrix: PathBuf,
    /// Filter coefficients (`DeviceName`, `a0..`, `b0..`).
    pub coefficients: Option<PathBuf>,
    /// Symbolic-to-PV cross reference for readbacks and actuators.
    pub xref: Option<PathBuf>,
    /// Readback setpoints (`ControlName`, `Offset`).
    pub offsets: Option<PathBuf>,
    /// Despike eligibility (`ControlName`, `Despike`).
    pub despike: Option<PathBuf>,
    /// Extra directories tried after the command file's directory.
    pub search_path: Vec<PathBuf>,
}

/// One limit block: exactly one of `value`, `min`/`max`, or `file`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitSpec {
    pub value: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub file: Option<PathBuf>,
}

impl LimitSpec {
    pub fn validate(&self, name: &str) -> Result<(), String> {
        let forms = usize::from(self.value.is_some())
            + usize::from(self.min.is_some() || self.max.is_some())
            + usize::from(self.file.is_some());
        if forms != 1 {
            return Err(format!(
                "limits.{name}: give exactly one of value, min/max or file"
            ));
        }
        if let Some(v) = self.value {
            if !v.is_finite() {
                return Err(format!("limits.{name}.value must be finite"));
            }
        }
        match (self.min, self.max) {
            (Some(min), Some(max)) if !(min <= max) => {
                Err(format!("limits.{name}: min ({min}) exceeds max ({max})"))
            }
            (Some(_), None) | (None, Some(_)) => {
                Err(format!("limits.{name}: min and max must be given together"))
            }
            _ => Ok(()),
        }
    }
}

/// `[limits.*]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum change per step of each actuator.
    pub delta: Option<LimitSpec>,
    /// No correction while every readback is below its action limit.
    pub action: Option<LimitSpec>,
    /// Readbacks clamped into these bounds before use.
    pub readback: Option<LimitSpec>,
    /// Absolute actuator bounds applied after delta limiting.
    pub control: Option<LimitSpec>,
}

/// `[despike]`: readback despiking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DespikeConfig {
    pub enabled: bool,
    pub neighbors: usize,
    pub passes: usize,
    pub average_of: usize,
    /// Final (or fixed) threshold.
    pub threshold: f64,
    pub count_limit: usize,
    /// Starting threshold of a ramp ending at `threshold`.
    pub ramp_start: Option<f64>,
    /// Iterations over which the ramp runs.
    pub ramp_steps: u32,
    /// Enum PV; non-zero restarts the ramp and is written back to zero.
    pub ramp_retrigger_pv: Option<String>,
}

impl Default for DespikeConfig {
    fn default() -> Self {
        let p = DespikeParams::default();
        Self {
            enabled: false,
            neighbors: p.neighbors,
            passes: p.passes,
            average_of: p.average_of,
            threshold: p.threshold,
            count_limit: p.count_limit,
            ramp_start: None,
            ramp_steps: 0,
            ramp_retrigger_pv: None,
        }
    }
}

impl DespikeConfig {
    pub fn params(&self) -> DespikeParams {
        DespikeParams {
            neighbors: self.neighbors,
            passes: self.passes,
            average_of: self.average_of,
            threshold: self.threshold,
            count_limit: self.count_limit,
        }
    }
}

/// `[tunables]`: PVs polled every iteration for live settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TunablesConfig {
    pub gain_pv: Option<String>,
    pub interval_pv: Option<String>,
    pub average_pv: Option<String>,
    pub despike_threshold_pv: Option<String>,
}

/// `[tests]`: scalar range tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestsConfig {
    pub file: Option<PathBuf>,
    /// Despike applied to test values of tests flagged `Despike`.
    pub despike: Option<DespikeParams>,
}

/// One `[[waveforms.readback]]` / `[[waveforms.actuator]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaveformLinkConfig {
    pub pv: String,
    /// `DeviceName`, `Index`.
    pub file: PathBuf,
}

/// One `[[waveforms.test]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaveformTestConfig {
    pub pv: String,
    /// `DeviceName`, `Index`, `MinimumValue`, `MaximumValue`, optional `Ignore`.
    pub file: PathBuf,
    #[serde(default)]
    pub despike: Option<DespikeParams>,
    #[serde(default)]
    pub sleep: Option<f64>,
    #[serde(default)]
    pub hold_off: Option<f64>,
    #[serde(default)]
    pub glitch_log: bool,
    #[serde(default)]
    pub exit_on_failure: bool,
}

/// `[waveforms]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WaveformsConfig {
    pub readback: Vec<WaveformLinkConfig>,
    pub actuator: Vec<WaveformLinkConfig>,
    pub test: Vec<WaveformTestConfig>,
}

/// `[output]`: per-iteration files and side channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Time-series log of every value.
    pub log: Option<PathBuf>,
    /// Summary statistics per iteration.
    pub statistics: Option<PathBuf>,
    /// One row per commanded actuator change.
    pub audit: Option<PathBuf>,
    pub rotation: Rotation,
    /// String PV receiving the loop state.
    pub status_pv: Option<String>,
    /// Shell command run after each committed write.
    pub post_change_command: Option<String>,
}

/// `[glitch]`: pre-event history capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GlitchConfig {
    pub file: Option<PathBuf>,
    /// Snapshots retained before a glitch.
    pub rows: usize,
    /// Readback RMS above which a glitch is declared.
    pub readback_rms: Option<f64>,
    /// Control-delta RMS above which a glitch is declared.
    pub delta_rms: Option<f64>,
}

impl Default for GlitchConfig {
    fn default() -> Self {
        Self {
            file: None,
            rows: 10,
            readback_rms: None,
            delta_rms: None,
        }
    }
}

/// `[server]`: long-running mode with hot reload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub enabled: bool,
    pub pid_file: Option<PathBuf>,
}

// ─── Top Level ──────────────────────────────────────────────────────

/// Complete command file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlLawConfig {
    pub shared: SharedConfig,
    #[serde(rename = "loop")]
    pub loop_: LoopConfig,
    pub files: FilesConfig,
    pub limits: LimitsConfig,
    pub despike: DespikeConfig,
    pub tunables: TunablesConfig,
    pub tests: TestsConfig,
    pub waveforms: WaveformsConfig,
    pub output: OutputConfig,
    pub glitch: GlitchConfig,
    pub run_control: RunControlConfig,
    pub server: ServerConfig,
    pub simulation: SimulationConfig,
}

/// Command-line values that replace command-file settings.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub gain: Option<f64>,
    pub interval: Option<f64>,
    pub steps: Option<u64>,
    pub dry_run: bool,
    pub average: Option<usize>,
    pub search_path: Vec<PathBuf>,
    pub transport: Option<String>,
    pub server: bool,
    pub pid_file: Option<PathBuf>,
}

impl ControlLawConfig {
    pub fn apply_overrides(&mut self, o: &Overrides) {
        if let Some(v) = o.gain {
            self.loop_.gain = v;
        }
        if let Some(v) = o.interval {
            self.loop_.interval = v;
        }
        if let Some(v) = o.steps {
            self.loop_.steps = Some(v);
        }
        if o.dry_run {
            self.loop_.dry_run = true;
        }
        if let Some(v) = o.average {
            self.loop_.average = v;
        }
        self.files.search_path.extend(o.search_path.iter().cloned());
        if let Some(t) = &o.transport {
            self.loop_.transport = t.clone();
        }
        if o.server {
            self.server.enabled = true;
        }
        if let Some(p) = &o.pid_file {
            self.server.pid_file = Some(p.clone());
        }
    }

    /// Check bounds before any data file is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::ValidationError(msg));
        self.shared.validate()?;

        let l = &self.loop_;
        if !l.gain.is_finite() {
            return fail(format!("loop.gain must be finite (got {})", l.gain));
        }
        if seconds("loop.interval", l.interval)?.is_zero() {
            return fail(format!("loop.interval must be > 0 (got {})", l.interval));
        }
        if l.average == 0 {
            return fail("loop.average must be >= 1".to_string());
        }
        seconds("loop.average_interval", l.average_interval)?;
        if u32::try_from(l.average).is_err() {
            return fail(format!("loop.average too large (got {})", l.average));
        }
        let span = (l.average - 1) as f64 * l.average_interval;
        if span > l.interval {
            return fail(format!(
                "averaging {} samples {}s apart needs {span}s, more than loop.interval ({}s)",
                l.average, l.average_interval, l.interval
            ));
        }
        if seconds("loop.pv_timeout", l.pv_timeout)?.is_zero() {
            return fail(format!("loop.pv_timeout must be > 0 (got {})", l.pv_timeout));
        }
        if l.steps == Some(0) {
            return fail("loop.steps must be >= 1 when given".to_string());
        }
        if self.files.matrix.as_os_str().is_empty() {
            return fail("files.matrix is required".to_string());
        }

        for (name, spec) in [
            ("delta", &self.limits.delta),
            ("action", &self.limits.action),
            ("readback", &self.limits.readback),
            ("control", &self.limits.control),
        ] {
            if let Some(spec) = spec {
                spec.validate(name).map_err(ConfigError::ValidationError)?;
            }
        }
        if let Some(spec) = &self.limits.delta {
            if let (Some(min), Some(max)) = (spec.min, spec.max) {
                if min > 0.0 || max < 0.0 {
                    return fail(format!(
                        "limits.delta: interval [{min}, {max}] must contain zero"
                    ));
                }
            }
        }

        if self.despike.enabled {
            self.despike
                .params()
                .validate()
                .map_err(ConfigError::ValidationError)?;
            if let Some(start) = self.despike.ramp_start {
                if !(start.is_finite() && start >= 0.0) {
                    return fail(format!("despike.ramp_start must be >= 0 (got {start})"));
                }
            }
        }
        if let Some(p) = &self.tests.despike {
            p.validate().map_err(ConfigError::ValidationError)?;
        }
        for wt in &self.waveforms.test {
            if let Some(p) = &wt.despike {
                p.validate().map_err(ConfigError::ValidationError)?;
            }
        }

        if self.glitch.file.is_some() && self.glitch.rows == 0 {
            return fail("glitch.rows must be >= 1".to_string());
        }
        self.run_control
            .validate()
            .map_err(ConfigError::ValidationError)?;
        if self.server.enabled && self.server.pid_file.is_none() {
            return fail("server mode requires server.pid_file".to_string());
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.loop_.interval).unwrap_or_default()
    }

    pub fn average_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.loop_.average_interval).unwrap_or_default()
    }

    pub fn pv_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.loop_.pv_timeout).unwrap_or_default()
    }
}

// ─── Loaded Command File ────────────────────────────────────────────

/// A command file parsed, overridden and validated.
#[derive(Debug, Clone)]
pub struct CommandFile {
    /// Path the configuration came from, if any (reload source).
    pub path: Option<PathBuf>,
    pub config: ControlLawConfig,
    pub overrides: Overrides,
}

impl CommandFile {
    /// Parse `path`, apply `overrides`, validate.
    pub fn load(path: &Path, overrides: Overrides) -> Result<Self, ConfigError> {
        let mut config = ControlLawConfig::load(path)?;
        config.apply_overrides(&overrides);
        config.validate()?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            config,
            overrides,
        })
    }

    /// Wrap an in-memory configuration (tests, embedding).
    pub fn from_config(config: ControlLawConfig, base: Option<&Path>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            path: base.map(|b| b.join("<inline>")),
            config,
            overrides: Overrides::default(),
        })
    }

    /// Re-read the same file with the same overrides.
    pub fn reload(&self) -> Result<Self, ConfigError> {
        match &self.path {
            Some(path) if path.exists() => Self::load(path, self.overrides.clone()),
            _ => Ok(self.clone()),
        }
    }

    /// Search path rooted at the command file's directory.
    pub fn search_path(&self) -> SearchPath {
        let base = self.path.as_deref().and_then(Path::parent);
        SearchPath::new(base, &self.config.files.search_path)
    }
}
