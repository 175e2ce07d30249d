//! Signal wiring.
//!
//! Handlers only store into atomics. The control thread polls the flags at
//! the top of every iteration and inside every sleep slice, and performs
//! all teardown itself.
//!
//! | Signal | Effect |
//! |---|---|
//! | SIGINT, SIGTERM, SIGQUIT | graceful shutdown, exit 1 |
//! | SIGHUP, SIGILL, SIGABRT, SIGFPE, SIGSEGV, SIGTRAP, SIGBUS | fatal, exit 1 |
//! | SIGUSR1 (server mode) | reparse the command file |
//! | SIGUSR2 (server mode) | server exit, status 0 |

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use tracing::debug;

use crate::error::ControlLawError;

const GRACEFUL: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGQUIT];

const FATAL: [Signal; 7] = [
    Signal::SIGHUP,
    Signal::SIGILL,
    Signal::SIGABRT,
    Signal::SIGFPE,
    Signal::SIGSEGV,
    Signal::SIGTRAP,
    Signal::SIGBUS,
];

/// What a pending signal asks the loop to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
    /// Graceful shutdown; exit status 1.
    Terminate(&'static str),
    /// Fatal signal; exit status 1.
    Fatal(&'static str),
    /// Server exit; exit status 0.
    ServerExit,
}

impl StopRequest {
    /// Error reported for this stop, `None` for a clean exit.
    pub fn into_error(self) -> Option<ControlLawError> {
        match self {
            Self::Terminate(name) | Self::Fatal(name) => Some(ControlLawError::Signal(name)),
            Self::ServerExit => None,
        }
    }
}

/// Flags shared between the handlers and the control thread.
#[derive(Debug)]
pub struct SignalFlags {
    terminate: AtomicI32,
    fatal: AtomicI32,
    reload: AtomicBool,
    server_exit: AtomicBool,
}

impl SignalFlags {
    pub const fn new() -> Self {
        Self {
            terminate: AtomicI32::new(0),
            fatal: AtomicI32::new(0),
            reload: AtomicBool::new(false),
            server_exit: AtomicBool::new(false),
        }
    }

    /// Record `signum`. Async-signal-safe.
    pub fn raise(&self, signum: i32) {
        match signum {
            libc::SIGUSR1 => self.reload.store(true, Ordering::SeqCst),
            libc::SIGUSR2 => self.server_exit.store(true, Ordering::SeqCst),
            libc::SIGINT | libc::SIGTERM | libc::SIGQUIT => {
                self.terminate.store(signum, Ordering::SeqCst)
            }
            _ => self.fatal.store(signum, Ordering::SeqCst),
        }
    }

    /// Pending stop, fatal signals first.
    pub fn stop_request(&self) -> Option<StopRequest> {
        let fatal = self.fatal.load(Ordering::SeqCst);
        if fatal != 0 {
            return Some(StopRequest::Fatal(signal_name(fatal)));
        }
        let term = self.terminate.load(Ordering::SeqCst);
        if term != 0 {
            return Some(StopRequest::Terminate(signal_name(term)));
        }
        self.server_exit
            .load(Ordering::SeqCst)
            .then_some(StopRequest::ServerExit)
    }

    /// Consume a pending reload request.
    pub fn take_reload(&self) -> bool {
        self.reload.swap(false, Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.terminate.store(0, Ordering::SeqCst);
        self.fatal.store(0, Ordering::SeqCst);
        self.reload.store(false, Ordering::SeqCst);
        self.server_exit.store(false, Ordering::SeqCst);
    }
}

impl Default for SignalFlags {
    fn default() -> Self {
        Self::new()
    }
}

static FLAGS: SignalFlags = SignalFlags::new();

/// Process-wide flags written by the installed handlers.
pub fn flags() -> &'static SignalFlags {
    &FLAGS
}

fn signal_name(signum: i32) -> &'static str {
    Signal::try_from(signum).map_or("unknown signal", Signal::as_str)
}

extern "C" fn handle_signal(signum: libc::c_int) {
    FLAGS.raise(signum);
}

/// Install the handlers. SIGUSR1/SIGUSR2 are only caught in server mode.
///
/// # Errors
/// `Server` when `sigaction` fails.
pub fn install(server: bool) -> Result<(), ControlLawError> {
    let graceful = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // One-shot: a fault that recurs after the handler returns takes the
    // default action.
    let fatal = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::SA_RESETHAND,
        SigSet::empty(),
    );

    let mut plan: Vec<(Signal, &SigAction)> = GRACEFUL.iter().map(|s| (*s, &graceful)).collect();
    plan.extend(FATAL.iter().map(|s| (*s, &fatal)));
    if server {
        plan.push((Signal::SIGUSR1, &graceful));
        plan.push((Signal::SIGUSR2, &graceful));
    }

    for (signal, action) in plan {
        // SAFETY: the handler only performs atomic stores.
        unsafe { sigaction(signal, action) }
            .map_err(|e| ControlLawError::Server(format!("sigaction({signal}) failed: {e}")))?;
    }
    debug!("signal handlers installed (server mode: {server})");
    Ok(())
}
