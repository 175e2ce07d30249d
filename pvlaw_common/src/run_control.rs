//! Run-control supervisor contract.
//!
//! A control loop registers with a supervisory service at startup, pings it
//! at a bounded period for as long as it runs, may post status/alarm
//! messages, and deregisters on exit. Every protocol error is fatal to the
//! loop.
//!
//! Two implementations ship here:
//! - [`NullRunControl`] - no supervisor configured
//! - [`StatusFileRunControl`] - JSON status file, with an abort file the
//!   operator can create to stop the loop

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default interval between heartbeats.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(2);

/// Default supervisor deadline for a missed heartbeat.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised by the run-control service.
#[derive(Debug, Error)]
pub enum RunControlError {
    /// Heartbeat deadline missed.
    #[error("run control timeout: no ping for {0:?}")]
    Timeout(Duration),

    /// Supervisor requested an abort.
    #[error("run control abort requested")]
    Aborted,

    /// Another process already owns this run-control slot.
    #[error("run control denied: {0}")]
    Denied(String),

    /// Status could not be published.
    #[error("run control I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Message severity posted to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Alarm,
}

/// Supervisor interface.
pub trait RunControl: Send {
    /// Register with the supervisor.
    fn init(&mut self, description: &str) -> Result<(), RunControlError>;

    /// Heartbeat. Must be called at least once per [`RunControl::heartbeat_period`].
    fn ping(&mut self) -> Result<(), RunControlError>;

    /// Post a status message.
    fn log_message(&mut self, severity: Severity, message: &str) -> Result<(), RunControlError>;

    /// Deregister. Safe to call more than once.
    fn exit(&mut self) -> Result<(), RunControlError>;

    /// Longest time the loop may go without pinging.
    fn heartbeat_period(&self) -> Duration;
}

/// Run control that accepts everything.
#[derive(Debug, Clone)]
pub struct NullRunControl {
    period: Duration,
}

impl NullRunControl {
    pub fn new() -> Self {
        Self {
            period: DEFAULT_HEARTBEAT,
        }
    }
}

impl Default for NullRunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl for NullRunControl {
    fn init(&mut self, _description: &str) -> Result<(), RunControlError> {
        Ok(())
    }

    fn ping(&mut self) -> Result<(), RunControlError> {
        Ok(())
    }

    fn log_message(&mut self, _severity: Severity, _message: &str) -> Result<(), RunControlError> {
        Ok(())
    }

    fn exit(&mut self) -> Result<(), RunControlError> {
        Ok(())
    }

    fn heartbeat_period(&self) -> Duration {
        self.period
    }
}

// ─── Status File ────────────────────────────────────────────────────

/// Lifecycle state recorded in the status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Starting,
    Running,
    Stopped,
}

/// Contents of the status file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub pid: u32,
    pub description: String,
    pub state: LoopState,
    pub heartbeat_us: u64,
    pub severity: Severity,
    pub message: String,
}

/// Run control backed by a JSON status file.
///
/// The record is rewritten atomically (temp file + rename) on every ping and
/// message. If the abort file exists at ping time the loop is told to abort.
/// Registration is refused while a live process other than this one owns
/// the status file.
pub struct StatusFileRunControl {
    path: PathBuf,
    abort_path: PathBuf,
    period: Duration,
    timeout: Duration,
    last_ping: Option<Instant>,
    record: StatusRecord,
    registered: bool,
}

impl StatusFileRunControl {
    pub fn new(path: &Path, abort_path: Option<&Path>, period: Duration, timeout: Duration) -> Self {
        let abort_path = abort_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.with_extension("abort"));
        Self {
            path: path.to_path_buf(),
            abort_path,
            period,
            timeout,
            last_ping: None,
            record: StatusRecord {
                pid: std::process::id(),
                description: String::new(),
                state: LoopState::Starting,
                heartbeat_us: current_timestamp_us(),
                severity: Severity::Info,
                message: String::new(),
            },
            registered: false,
        }
    }

    /// Last record written.
    pub fn record(&self) -> &StatusRecord {
        &self.record
    }

    fn publish(&self) -> Result<(), RunControlError> {
        let io_err = |source| RunControlError::Io {
            path: self.path.clone(),
            source,
        };
        let serialized = serde_json::to_vec_pretty(&self.record)
            .map_err(|e| io_err(std::io::Error::other(e)))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serialized).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }

    fn owner_alive(&self) -> Option<u32> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        let existing: StatusRecord = serde_json::from_str(&text).ok()?;
        if existing.state == LoopState::Stopped || existing.pid == self.record.pid {
            return None;
        }
        let pid = i32::try_from(existing.pid).ok()?;
        match kill(Pid::from_raw(pid), None) {
            Ok(()) | Err(Errno::EPERM) => Some(existing.pid),
            Err(_) => None,
        }
    }
}

impl RunControl for StatusFileRunControl {
    fn init(&mut self, description: &str) -> Result<(), RunControlError> {
        if let Some(pid) = self.owner_alive() {
            return Err(RunControlError::Denied(format!(
                "{} is owned by running process {pid}",
                self.path.display()
            )));
        }
        if self.abort_path.exists() {
            warn!(
                "Removing stale abort file {}",
                self.abort_path.display()
            );
            let _ = std::fs::remove_file(&self.abort_path);
        }
        self.record.description = description.to_string();
        self.record.state = LoopState::Running;
        self.record.heartbeat_us = current_timestamp_us();
        self.publish()?;
        self.last_ping = Some(Instant::now());
        self.registered = true;
        info!("Run control registered at {}", self.path.display());
        Ok(())
    }

    fn ping(&mut self) -> Result<(), RunControlError> {
        if self.abort_path.exists() {
            return Err(RunControlError::Aborted);
        }
        let now = Instant::now();
        if let Some(last) = self.last_ping {
            let gap = now.duration_since(last);
            if gap > self.timeout {
                return Err(RunControlError::Timeout(gap));
            }
        }
        self.last_ping = Some(now);
        self.record.heartbeat_us = current_timestamp_us();
        self.publish()
    }

    fn log_message(&mut self, severity: Severity, message: &str) -> Result<(), RunControlError> {
        debug!("Run control message ({severity:?}): {message}");
        self.record.severity = severity;
        self.record.message = message.to_string();
        self.publish()
    }

    fn exit(&mut self) -> Result<(), RunControlError> {
        if !self.registered {
            return Ok(());
        }
        self.registered = false;
        self.record.state = LoopState::Stopped;
        self.record.heartbeat_us = current_timestamp_us();
        self.publish()
    }

    fn heartbeat_period(&self) -> Duration {
        self.period
    }
}

// ─── Configuration ──────────────────────────────────────────────────

/// Which supervisor to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunControlKind {
    #[default]
    None,
    StatusFile,
}

/// `[run_control]` section of a command file.
///
/// # TOML Example
///
/// ```toml
/// [run_control]
/// kind = "status_file"
/// description = "Orbit feedback X"
/// status_file = "/var/run/pvlaw/orbit-x.json"
/// heartbeat_secs = 2.0
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunControlConfig {
    pub kind: RunControlKind,
    pub description: String,
    pub status_file: Option<PathBuf>,
    pub abort_file: Option<PathBuf>,
    pub heartbeat_secs: f64,
    pub timeout_secs: f64,
}

impl Default for RunControlConfig {
    fn default() -> Self {
        Self {
            kind: RunControlKind::None,
            description: String::new(),
            status_file: None,
            abort_file: None,
            heartbeat_secs: DEFAULT_HEARTBEAT.as_secs_f64(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs_f64(),
        }
    }
}

impl RunControlConfig {
    /// Check bounds and required fields.
    pub fn validate(&self) -> Result<(), String> {
        if !matches!(Duration::try_from_secs_f64(self.heartbeat_secs), Ok(d) if !d.is_zero()) {
            return Err(format!(
                "run_control.heartbeat_secs must be > 0 (got {})",
                self.heartbeat_secs
            ));
        }
        if Duration::try_from_secs_f64(self.timeout_secs).is_err()
            || self.timeout_secs < self.heartbeat_secs
        {
            return Err(format!(
                "run_control.timeout_secs ({}) must be >= heartbeat_secs ({})",
                self.timeout_secs, self.heartbeat_secs
            ));
        }
        if self.kind == RunControlKind::StatusFile && self.status_file.is_none() {
            return Err("run_control.kind = \"status_file\" requires status_file".to_string());
        }
        Ok(())
    }

    fn heartbeat(&self) -> Duration {
        Duration::try_from_secs_f64(self.heartbeat_secs).unwrap_or_default()
    }

    /// Build the configured supervisor.
    pub fn build(&self) -> Box<dyn RunControl> {
        match (self.kind, &self.status_file) {
            (RunControlKind::StatusFile, Some(path)) => Box::new(StatusFileRunControl::new(
                path,
                self.abort_file.as_deref(),
                self.heartbeat(),
                Duration::try_from_secs_f64(self.timeout_secs).unwrap_or_default(),
            )),
            _ => Box::new(NullRunControl {
                period: self.heartbeat(),
            }),
        }
    }
}

/// Get current timestamp in microseconds since UNIX epoch.
fn current_timestamp_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
