//! Configuration loading traits and types.
//!
//! Command files are TOML documents deserialized straight into the
//! application's config structs through [`ConfigLoader`]. Data files named
//! inside a command file are resolved with [`SearchPath`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use pvlaw_common::config::{ConfigLoader, SharedConfig, ConfigError};
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct MyLoopConfig {
//!     shared: SharedConfig,
//!     gain: f64,
//! }
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = MyLoopConfig::load(Path::new("loop.toml"))?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration (or referenced data) file not found.
    #[error("Configuration file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Per-stage loop tracing.
    Trace,
    /// Per-iteration summaries.
    Debug,
    /// General information about loop operation.
    #[default]
    Info,
    /// Degraded iterations, clamps, skipped writes.
    Warn,
    /// Fatal conditions only.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub const fn as_level(&self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

/// Common configuration fields shared by the loop binaries.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "orbit-feedback-x"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Loop instance identifier, used in run-control descriptions and logs.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: "pvlaw".to_string(),
        }
    }
}

/// `secs` as a [`Duration`].
///
/// # Errors
///
/// `ConfigError::ValidationError` naming `field` when `secs` is negative,
/// NaN or too large to represent.
pub fn seconds(field: &str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        ConfigError::ValidationError(format!("{field} is not a valid duration (got {secs}s)"))
    })
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid or a field
///   does not match the target struct
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.to_path_buf())
            } else {
                ConfigError::ParseError(format!("{}: {e}", path.display()))
            }
        })?;

        Self::load_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))
    }

    /// Parse configuration from TOML text.
    fn load_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── Search Path ────────────────────────────────────────────────────

/// Resolution of relative data-file names.
///
/// Absolute names are used as-is. Relative names are tried against the
/// base directory (the command file's directory) first, then each extra
/// directory in order. The first existing candidate wins.
#[derive(Debug, Clone, Default)]
pub struct SearchPath {
    base: Option<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    /// Search path rooted at `base` with additional directories.
    pub fn new(base: Option<&Path>, dirs: &[PathBuf]) -> Self {
        Self {
            base: base.map(Path::to_path_buf),
            dirs: dirs.to_vec(),
        }
    }

    /// Resolve a file name.
    ///
    /// # Errors
    /// `ConfigError::FileNotFound` naming the file as given when no
    /// candidate exists.
    pub fn resolve(&self, name: &Path) -> Result<PathBuf, ConfigError> {
        if name.is_absolute() {
            return if name.exists() {
                Ok(name.to_path_buf())
            } else {
                Err(ConfigError::FileNotFound(name.to_path_buf()))
            };
        }

        self.base
            .iter()
            .chain(self.dirs.iter())
            .map(|dir| dir.join(name))
            .chain(std::iter::once(name.to_path_buf()))
            .find(|candidate| candidate.exists())
            .ok_or_else(|| ConfigError::FileNotFound(name.to_path_buf()))
    }
}
