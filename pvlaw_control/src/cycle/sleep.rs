//! Inter-iteration sleep.
//!
//! The sleep is sliced so the supervisor is pinged at its heartbeat period
//! and the signal flags are seen within [`POLL_SLICE`].

use pvlaw_common::run_control::RunControl;
use std::time::{Duration, Instant};

use crate::error::ControlLawError;
use crate::signals::{SignalFlags, StopRequest};

/// Longest uninterrupted sleep.
pub const POLL_SLICE: Duration = Duration::from_millis(50);

/// Why a sleep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Elapsed,
    Reload,
    Stop(StopRequest),
}

/// Sleep for `total`, pinging `run_control` every heartbeat period.
///
/// Returns early on a stop or reload request (the reload flag is consumed).
///
/// # Errors
/// Run-control ping failures.
pub fn pause(
    total: Duration,
    run_control: &mut dyn RunControl,
    flags: &SignalFlags,
) -> Result<Wake, ControlLawError> {
    let start = Instant::now();
    let deadline = start + total;
    let period = run_control.heartbeat_period().max(Duration::from_millis(1));
    let mut next_ping = start + period;

    loop {
        if let Some(stop) = flags.stop_request() {
            return Ok(Wake::Stop(stop));
        }
        if flags.take_reload() {
            return Ok(Wake::Reload);
        }
        let now = Instant::now();
        if now >= next_ping {
            run_control.ping()?;
            next_ping = now + period;
        }
        if now >= deadline {
            return Ok(Wake::Elapsed);
        }
        let slice = deadline
            .saturating_duration_since(now)
            .min(next_ping.saturating_duration_since(now))
            .min(POLL_SLICE);
        std::thread::sleep(slice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvlaw_common::run_control::{RunControlError, Severity};

    struct CountingRunControl {
        period: Duration,
        pings: usize,
    }

    impl RunControl for CountingRunControl {
        fn init(&mut self, _description: &str) -> Result<(), RunControlError> {
            Ok(())
        }
        fn ping(&mut self) -> Result<(), RunControlError> {
            self.pings += 1;
            Ok(())
        }
        fn log_message(&mut self, _s: Severity, _m: &str) -> Result<(), RunControlError> {
            Ok(())
        }
        fn exit(&mut self) -> Result<(), RunControlError> {
            Ok(())
        }
        fn heartbeat_period(&self) -> Duration {
            self.period
        }
    }

    #[test]
    fn heartbeats_during_sleep() {
        let mut rc = CountingRunControl {
            period: Duration::from_millis(20),
            pings: 0,
        };
        let flags = SignalFlags::new();
        let wake = pause(Duration::from_millis(110), &mut rc, &flags).unwrap();
        assert_eq!(wake, Wake::Elapsed);
        assert!(rc.pings >= 4, "only {} pings", rc.pings);
    }

    #[test]
    fn stop_ends_sleep_early() {
        let mut rc = CountingRunControl {
            period: Duration::from_secs(1),
            pings: 0,
        };
        let flags = SignalFlags::new();
        flags.raise(libc::SIGINT);
        let start = Instant::now();
        let wake = pause(Duration::from_secs(10), &mut rc, &flags).unwrap();
        assert_eq!(wake, Wake::Stop(StopRequest::Terminate("SIGINT")));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn reload_consumed() {
        let mut rc = CountingRunControl {
            period: Duration::from_secs(1),
            pings: 0,
        };
        let flags = SignalFlags::new();
        flags.raise(libc::SIGUSR1);
        assert_eq!(pause(Duration::from_secs(10), &mut rc, &flags).unwrap(), Wake::Reload);
        assert!(!flags.take_reload());
    }

    #[test]
    fn ping_failure_propagates() {
        struct Aborting;
        impl RunControl for Aborting {
            fn init(&mut self, _d: &str) -> Result<(), RunControlError> {
                Ok(())
            }
            fn ping(&mut self) -> Result<(), RunControlError> {
                Err(RunControlError::Aborted)
            }
            fn log_message(&mut self, _s: Severity, _m: &str) -> Result<(), RunControlError> {
                Ok(())
            }
            fn exit(&mut self) -> Result<(), RunControlError> {
                Ok(())
            }
            fn heartbeat_period(&self) -> Duration {
                Duration::from_millis(5)
            }
        }
        let err = pause(Duration::from_millis(50), &mut Aborting, &SignalFlags::new()).unwrap_err();
        assert!(err.is_fatal());
    }
}
