//! Server mode: PID file ownership.
//!
//! A server-mode loop claims its PID file at startup and releases it at
//! teardown. A file naming a live process other than this one blocks
//! startup; a stale file is taken over.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::ControlLawError;

/// Whether `pid` names a running process.
fn process_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        // Exists but belongs to someone else.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// PID recorded in `path`, if the file exists and parses.
pub fn read_pid(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Exclusive claim on a PID file, released on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl PidFile {
    /// Write this process's PID to `path`.
    ///
    /// # Errors
    /// `Server` when a live process other than this one owns the file, or
    /// the file cannot be written.
    pub fn claim(path: &Path) -> Result<Self, ControlLawError> {
        let pid = std::process::id();
        if let Some(owner) = read_pid(path) {
            if u32::try_from(owner).ok() != Some(pid) && owner > 0 && process_alive(owner) {
                return Err(ControlLawError::Server(format!(
                    "{} is owned by running process {owner}",
                    path.display()
                )));
            }
            warn!("taking over stale PID file {} (pid {owner})", path.display());
        }

        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(path)?;
            writeln!(file, "{pid}")?;
            file.sync_all()
        };
        write().map_err(|e| {
            ControlLawError::Server(format!("cannot write {}: {e}", path.display()))
        })?;
        info!("PID file {} claimed (pid {pid})", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            pid,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Remove the file if it still names this process. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if read_pid(&self.path).and_then(|p| u32::try_from(p).ok()) != Some(self.pid) {
            debug!("PID file {} no longer ours; leaving it", self.path.display());
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("cannot remove PID file {}: {e}", self.path.display());
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.release();
    }
}
