//! Post-change command hook.
//!
//! Runs after every committed actuator write. A non-zero exit fails the
//! iteration.

use std::process::Command;
use tracing::debug;

use crate::error::ControlLawError;

/// Action invoked after a committed write.
pub trait PostChangeHook: Send {
    /// # Errors
    /// `Hook` when the action reports failure.
    fn run(&mut self, step: u64) -> Result<(), ControlLawError>;
}

/// Shell command run through `sh -c`, with `PVLAW_STEP` in its environment.
#[derive(Debug, Clone)]
pub struct CommandHook {
    command: String,
}

impl CommandHook {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl PostChangeHook for CommandHook {
    fn run(&mut self, step: u64) -> Result<(), ControlLawError> {
        debug!("running post-change command: {}", self.command);
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("PVLAW_STEP", step.to_string())
            .output()
            .map_err(|e| ControlLawError::Hook(format!("cannot run `{}`: {e}", self.command)))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ControlLawError::Hook(format!(
            "`{}` exited with {}: {}",
            self.command,
            output.status,
            stderr.trim()
        )))
    }
}
