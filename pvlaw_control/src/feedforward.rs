//! Table-driven feed-forward loop.
//!
//! Each table file maps one or two readbacks onto one actuator. Every
//! iteration reads all readbacks and actuators in two batched requests,
//! interpolates each table whose readbacks moved, bounds the result and
//! writes every changed actuator in one batched request.
//!
//! ```toml
//! [shared]
//! service_name = "s1-quad-ff"
//!
//! [feedforward]
//! files = ["qf.ff.toml", "qd.ff.toml"]
//! interval = 0.5
//! order = 1
//! ```
//!
//! - [`table`] - Feed-forward table files and their evaluation
//! - [`runner`] - The feed-forward cycle

pub mod runner;
pub mod table;

pub use runner::{Feedforward, FeedforwardReport};
pub use table::{Evaluation, FeedforwardTable, Lookup, load_table};

use pvlaw_common::config::{ConfigError, ConfigLoader, SearchPath, SharedConfig, seconds};
use pvlaw_common::pv::sim::SimulationConfig;
use pvlaw_common::run_control::RunControlConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// `[feedforward]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedforwardSection {
    /// Table files, one actuator each.
    pub files: Vec<PathBuf>,
    /// Seconds between iterations.
    pub interval: f64,
    pub steps: Option<u64>,
    /// Interpolation order.
    pub order: usize,
    pub dry_run: bool,
    pub pv_timeout: f64,
    pub transport: String,
    pub search_path: Vec<PathBuf>,
}

impl Default for FeedforwardSection {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            interval: 1.0,
            steps: None,
            order: 1,
            dry_run: false,
            pv_timeout: 10.0,
            transport: "sim".to_string(),
            search_path: Vec::new(),
        }
    }
}

/// Complete feed-forward command file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedforwardConfig {
    pub shared: SharedConfig,
    pub feedforward: FeedforwardSection,
    pub run_control: RunControlConfig,
    pub simulation: SimulationConfig,
    /// Directory relative table names resolve against first.
    #[serde(skip)]
    pub base: Option<PathBuf>,
}

/// Command-line values that replace `[feedforward]` settings.
#[derive(Debug, Clone, Default)]
pub struct FeedforwardOverrides {
    pub interval: Option<f64>,
    pub steps: Option<u64>,
    pub dry_run: bool,
    pub search_path: Vec<PathBuf>,
    pub transport: Option<String>,
}

impl FeedforwardConfig {
    /// Parse `path`, apply `overrides` and validate.
    ///
    /// # Errors
    /// Unreadable, malformed or out-of-bounds configuration.
    pub fn load_file(path: &Path, overrides: &FeedforwardOverrides) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.base = path.parent().map(Path::to_path_buf);
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, o: &FeedforwardOverrides) {
        let f = &mut self.feedforward;
        if let Some(v) = o.interval {
            f.interval = v;
        }
        if let Some(v) = o.steps {
            f.steps = Some(v);
        }
        if o.dry_run {
            f.dry_run = true;
        }
        f.search_path.extend(o.search_path.iter().cloned());
        if let Some(t) = &o.transport {
            f.transport = t.clone();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::ValidationError(msg));
        self.shared.validate()?;
        let f = &self.feedforward;
        if f.files.is_empty() {
            return fail("feedforward.files must name at least one table".to_string());
        }
        if seconds("feedforward.interval", f.interval)?.is_zero() {
            return fail(format!("feedforward.interval must be > 0 (got {})", f.interval));
        }
        if f.order == 0 {
            return fail("feedforward.order must be >= 1".to_string());
        }
        if f.steps == Some(0) {
            return fail("feedforward.steps must be >= 1 when given".to_string());
        }
        if seconds("feedforward.pv_timeout", f.pv_timeout)?.is_zero() {
            return fail(format!(
                "feedforward.pv_timeout must be > 0 (got {})",
                f.pv_timeout
            ));
        }
        self.run_control
            .validate()
            .map_err(ConfigError::ValidationError)
    }

    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.feedforward.interval).unwrap_or_default()
    }

    pub fn pv_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.feedforward.pv_timeout).unwrap_or_default()
    }

    pub fn search_path(&self) -> SearchPath {
        SearchPath::new(self.base.as_deref(), &self.feedforward.search_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        let mut c = FeedforwardConfig::load_str(
            "[feedforward]\nfiles = [\"a.toml\"]\ninterval = 2.0\n",
        )
        .unwrap();
        assert_eq!(c.feedforward.order, 1);
        assert!(c.validate().is_ok());
        c.apply_overrides(&FeedforwardOverrides {
            interval: Some(0.25),
            dry_run: true,
            ..Default::default()
        });
        assert_eq!(c.interval(), Duration::from_millis(250));
        assert!(c.feedforward.dry_run);
    }

    #[test]
    fn rejects_bad_values() {
        let c = FeedforwardConfig::default();
        assert!(c.validate().unwrap_err().to_string().contains("files"));

        let c = FeedforwardConfig::load_str(
            "[feedforward]\nfiles = [\"a.toml\"]\norder = 0\n",
        )
        .unwrap();
        assert!(c.validate().unwrap_err().to_string().contains("order"));

        let c = FeedforwardConfig::load_str(
            "[feedforward]\nfiles = [\"a.toml\"]\ninterval = 1e30\n",
        )
        .unwrap();
        assert!(c.validate().unwrap_err().to_string().contains("interval"));

        assert!(FeedforwardConfig::load_str("[feedforward]\nspeed = 3\n").is_err());
    }
}
