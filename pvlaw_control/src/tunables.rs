//! Live-tunable loop settings read from PVs every iteration.
//!
//! A failed or nonsensical read keeps the last known value. The one fatal
//! case is an interval/averaging combination whose averaging span no longer
//! fits in the interval.

use pvlaw_common::pv::PvClient;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::TunablesConfig;
use crate::error::ControlLawError;
use crate::model::LoopState;

#[derive(Debug, Clone, Default)]
pub struct Tunables {
    gain: Option<String>,
    interval: Option<String>,
    average: Option<String>,
    despike_threshold: Option<String>,
}

fn read_scalar(pv: &mut dyn PvClient, name: &str) -> Option<f64> {
    match pv.get_values(&[name.to_string()]) {
        Ok(v) => v.first().copied(),
        Err(e) => {
            warn!("tunable {name} unreadable, keeping last value: {e}");
            None
        }
    }
}

impl Tunables {
    pub fn from_config(config: &TunablesConfig) -> Self {
        Self {
            gain: config.gain_pv.clone(),
            interval: config.interval_pv.clone(),
            average: config.average_pv.clone(),
            despike_threshold: config.despike_threshold_pv.clone(),
        }
    }

    pub fn pv_names(&self) -> Vec<String> {
        [&self.gain, &self.interval, &self.average, &self.despike_threshold]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// Poll every configured PV into `state`; a despike threshold read
    /// replaces `*threshold`.
    ///
    /// # Errors
    /// `AveragingWindow` when the averaging span exceeds the interval.
    pub fn poll(
        &self,
        pv: &mut dyn PvClient,
        state: &mut LoopState,
        threshold: &mut Option<f64>,
    ) -> Result<(), ControlLawError> {
        if let Some(name) = &self.gain {
            match read_scalar(pv, name) {
                Some(g) if g.is_finite() => {
                    if g != state.gain {
                        info!("gain {} -> {g}", state.gain);
                        state.gain = g;
                    }
                }
                Some(g) => warn!("ignoring gain {g} from {name}"),
                None => {}
            }
        }
        if let Some(name) = &self.interval {
            match read_scalar(pv, name) {
                Some(s) => match Duration::try_from_secs_f64(s) {
                    Ok(interval) if !interval.is_zero() => {
                        if interval != state.interval {
                            info!("interval {:?} -> {interval:?}", state.interval);
                            state.interval = interval;
                        }
                    }
                    _ => warn!("ignoring interval {s} from {name}"),
                },
                None => {}
            }
        }
        if let Some(name) = &self.average {
            match read_scalar(pv, name) {
                Some(n) if n >= 1.0 && n <= f64::from(u32::MAX) => {
                    let n = n.round() as usize;
                    if n != state.average {
                        info!("averaging {} -> {n} samples", state.average);
                        state.average = n;
                    }
                }
                Some(n) => warn!("ignoring average count {n} from {name}"),
                None => {}
            }
        }
        if let Some(name) = &self.despike_threshold {
            match read_scalar(pv, name) {
                Some(t) if t.is_finite() && t >= 0.0 => *threshold = Some(t),
                Some(t) => warn!("ignoring despike threshold {t} from {name}"),
                None => {}
            }
        }
        check_averaging(state)
    }
}

/// Fail when the averaging span does not fit in the loop interval.
pub fn check_averaging(state: &LoopState) -> Result<(), ControlLawError> {
    if state.effective_sleep().is_some() {
        return Ok(());
    }
    Err(ControlLawError::AveragingWindow {
        average: state.average,
        spacing: state.average_interval.as_secs_f64(),
        needed: state.averaging_span().as_secs_f64(),
        interval: state.interval.as_secs_f64(),
    })
}
