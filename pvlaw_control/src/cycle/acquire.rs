//! Batched reads and writes of whole control vectors.
//!
//! Scalar channels go out in one batched request; each waveform feeding the
//! vector is one more request.

use pvlaw_common::pv::{PvClient, PvError};
use pvlaw_common::run_control::RunControl;
use std::time::Duration;

use super::sleep::{self, Wake};
use crate::error::ControlLawError;
use crate::model::ControlVector;
use crate::signals::SignalFlags;

fn short_waveform(name: &str, needed: usize, found: usize) -> PvError {
    PvError::Length {
        name: name.to_string(),
        needed,
        found,
    }
}

/// One sample of every channel of `vector`, in channel order.
///
/// # Errors
/// The first failing request; nothing is partially applied.
pub fn read_vector(pv: &mut dyn PvClient, vector: &ControlVector) -> Result<Vec<f64>, PvError> {
    let mut values = vector.values();
    let (indices, names) = vector.scalar_channels();
    if !names.is_empty() {
        let read = pv.get_values(&names)?;
        for (i, v) in indices.into_iter().zip(read) {
            values[i] = v;
        }
    }
    for (w, name) in vector.waveforms().iter().enumerate() {
        let waveform = pv.get_waveform(name)?;
        for (chan, elem) in vector.waveform_channels(w) {
            let v = waveform
                .get(elem)
                .ok_or_else(|| short_waveform(name, elem + 1, waveform.len()))?;
            values[chan] = *v;
        }
    }
    Ok(values)
}

/// How an averaged read ended.
#[derive(Debug)]
pub enum Averaged {
    /// Mean of every sample.
    Values(Vec<f64>),
    /// A read failed.
    Failed(PvError),
    /// A stop or reload request arrived between samples.
    Interrupted(Wake),
}

/// Mean of `samples` reads spaced `spacing` apart. The waits between
/// samples heartbeat `run_control` and end early on `flags`.
///
/// # Errors
/// Run-control ping failures during the waits.
pub fn read_averaged(
    pv: &mut dyn PvClient,
    vector: &ControlVector,
    samples: usize,
    spacing: Duration,
    run_control: &mut dyn RunControl,
    flags: &SignalFlags,
) -> Result<Averaged, ControlLawError> {
    let mut sum = match read_vector(pv, vector) {
        Ok(values) => values,
        Err(e) => return Ok(Averaged::Failed(e)),
    };
    for _ in 1..samples {
        if !spacing.is_zero() {
            match sleep::pause(spacing, run_control, flags)? {
                Wake::Elapsed => {}
                wake => return Ok(Averaged::Interrupted(wake)),
            }
        }
        match read_vector(pv, vector) {
            Ok(values) => sum.iter_mut().zip(values).for_each(|(s, v)| *s += v),
            Err(e) => return Ok(Averaged::Failed(e)),
        }
    }
    let n = samples.max(1) as f64;
    Ok(Averaged::Values(sum.into_iter().map(|s| s / n).collect()))
}

/// Write `values` (parallel to `vector`): scalars in one batch, then each
/// waveform read, patched at its channels' elements and written whole.
///
/// # Errors
/// The first failing request. Scalars may already be written when a
/// waveform request fails.
pub fn write_vector(
    pv: &mut dyn PvClient,
    vector: &ControlVector,
    values: &[f64],
) -> Result<(), PvError> {
    let (indices, names) = vector.scalar_channels();
    if !names.is_empty() {
        let batch: Vec<f64> = indices.iter().map(|&i| values[i]).collect();
        pv.put_values(&names, &batch)?;
    }
    for (w, name) in vector.waveforms().iter().enumerate() {
        let mut waveform = pv.get_waveform(name)?;
        for (chan, elem) in vector.waveform_channels(w) {
            let found = waveform.len();
            let slot = waveform
                .get_mut(elem)
                .ok_or_else(|| short_waveform(name, elem + 1, found))?;
            *slot = values[chan];
        }
        pv.put_waveform(name, &waveform)?;
    }
    Ok(())
}

/// Every PV a write of `vector` touches.
pub fn write_targets(vector: &ControlVector) -> Vec<String> {
    let mut names = vector.scalar_channels().1;
    names.extend(vector.waveforms().iter().cloned());
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Source;
    use pvlaw_common::pv::sim::SimPvClient;
    use pvlaw_common::run_control::{NullRunControl, RunControlError, Severity};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// A, B scalar; C from element 2 of WF.
    fn mixed_vector() -> ControlVector {
        let mut v = ControlVector::new(&names(&["A", "B", "C"]), &names(&["PA", "PB", "PC"]))
            .unwrap();
        let w = v.add_waveform("WF");
        v.get_mut(2).unwrap().source = Source::Waveform { waveform: w, index: 2 };
        v
    }

    #[test]
    fn scalars_and_waveform_elements() {
        let sim = SimPvClient::new();
        sim.set_scalar("PA", 1.0);
        sim.set_scalar("PB", 2.0);
        sim.set_waveform("WF", vec![0.0, 0.0, 7.0]);
        let mut client = sim.handle();
        assert_eq!(read_vector(&mut client, &mixed_vector()).unwrap(), vec![1.0, 2.0, 7.0]);
    }

    #[test]
    fn short_waveform_is_an_error() {
        let sim = SimPvClient::new();
        sim.set_scalar("PA", 1.0);
        sim.set_scalar("PB", 2.0);
        sim.set_waveform("WF", vec![0.0]);
        let mut client = sim.handle();
        let err = read_vector(&mut client, &mixed_vector()).unwrap_err();
        assert!(matches!(err, PvError::Length { needed: 3, found: 1, .. }));
    }

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

    fn single() -> ControlVector {
        ControlVector::new(&names(&["X"]), &names(&["X"])).unwrap()
    }

    #[test]
    fn averaging_takes_the_mean() {
        let sim = SimPvClient::new();
        sim.set_scalar("X", 4.0);
        let mut client = sim.handle();
        let mut rc = NullRunControl::new();
        let flags = SignalFlags::new();
        let got = read_averaged(&mut client, &single(), 3, Duration::ZERO, &mut rc, &flags).unwrap();
        assert!(matches!(got, Averaged::Values(v) if v == vec![4.0]));
    }

    #[test]
    fn averaging_waits_keep_the_heartbeat() {
        let sim = SimPvClient::new();
        sim.set_scalar("X", 1.0);
        let mut client = sim.handle();
        let mut rc = CountingRunControl {
            period: Duration::from_millis(10),
            pings: 0,
        };
        let flags = SignalFlags::new();
        let got = read_averaged(
            &mut client,
            &single(),
            3,
            Duration::from_millis(60),
            &mut rc,
            &flags,
        )
        .unwrap();
        assert!(matches!(got, Averaged::Values(_)));
        assert!(rc.pings >= 8, "only {} pings over 120ms", rc.pings);
    }

    #[test]
    fn averaging_stops_on_signal() {
        let sim = SimPvClient::new();
        sim.set_scalar("X", 1.0);
        let mut client = sim.handle();
        let mut rc = NullRunControl::new();
        let flags = SignalFlags::new();
        flags.raise(libc::SIGTERM);
        let start = std::time::Instant::now();
        let got = read_averaged(
            &mut client,
            &single(),
            5,
            Duration::from_secs(10),
            &mut rc,
            &flags,
        )
        .unwrap();
        assert!(matches!(got, Averaged::Interrupted(Wake::Stop(_))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn averaging_read_failure_reported() {
        let sim = SimPvClient::new();
        sim.set_scalar("X", 1.0);
        sim.fail_reads("X", true);
        let mut client = sim.handle();
        let mut rc = NullRunControl::new();
        let flags = SignalFlags::new();
        let got = read_averaged(&mut client, &single(), 2, Duration::ZERO, &mut rc, &flags).unwrap();
        assert!(matches!(got, Averaged::Failed(_)));
    }

    #[test]
    fn waveform_write_patches_elements() {
        let sim = SimPvClient::new();
        sim.set_scalar("PA", 0.0);
        sim.set_scalar("PB", 0.0);
        sim.set_waveform("WF", vec![9.0, 9.0, 9.0, 9.0]);
        let mut client = sim.handle();
        let v = mixed_vector();
        write_vector(&mut client, &v, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(sim.scalar("PA"), Some(1.0));
        assert_eq!(sim.scalar("PB"), Some(2.0));
        assert_eq!(sim.waveform("WF"), Some(vec![9.0, 9.0, 3.0, 9.0]));
        assert_eq!(write_targets(&v), names(&["PA", "PB", "WF"]));
    }
}
