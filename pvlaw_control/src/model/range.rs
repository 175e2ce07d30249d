//! Range tests on monitored PVs, scalar and waveform.
//!
//! A test holds a `[min, max]` window for one value. Any test out of range
//! suspends correction for the iteration; per-test options add a back-off
//! sleep, a hold-off once the test clears, a filter-history reset after a
//! long excursion, a glitch-log trigger, or a fatal exit.

use bitflags::bitflags;
use std::time::{Duration, Instant};

use crate::kernel::despike::{DespikeParams, despike_masked};

bitflags! {
    /// Optional test-file columns present in a loaded test set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TestFlags: u32 {
        const SLEEP           = 1 << 0;
        const HOLD_OFF        = 1 << 1;
        const RESET           = 1 << 2;
        const DESPIKE         = 1 << 3;
        const GLITCH_LOG      = 1 << 4;
        const EXIT_ON_FAILURE = 1 << 5;
    }
}

/// Longest back-off or hold-off a test can request.
pub const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 3600);

/// Duration given either in seconds or in loop intervals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Wait {
    Seconds(f64),
    Intervals(f64),
}

impl Wait {
    /// Zero for non-positive or NaN waits, at most [`MAX_WAIT`].
    pub fn resolve(self, interval: Duration) -> Duration {
        let secs = match self {
            Self::Seconds(s) => s,
            Self::Intervals(n) => n * interval.as_secs_f64(),
        };
        if !(secs > 0.0) {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs).map_or(MAX_WAIT, |d| d.min(MAX_WAIT))
    }
}

/// One scalar range test.
#[derive(Debug, Clone)]
pub struct RangeTest {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub sleep: Option<Wait>,
    pub hold_off: Option<Wait>,
    pub reset: Option<Duration>,
    pub despike: bool,
    pub glitch_log: bool,
    pub exit_on_failure: bool,
    /// Value seen by the last evaluation (after despiking).
    pub value: f64,
    pub out_of_range: bool,
    out_since: Option<Instant>,
}

impl RangeTest {
    pub fn new(name: &str, min: f64, max: f64) -> Self {
        Self {
            name: name.to_string(),
            min,
            max,
            sleep: None,
            hold_off: None,
            reset: None,
            despike: false,
            glitch_log: false,
            exit_on_failure: false,
            value: 0.0,
            out_of_range: false,
            out_since: None,
        }
    }

    /// NaN is out of range.
    pub fn check(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// What the loop must do after evaluating tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestOutcome {
    /// Names of tests out of range.
    pub failed: Vec<String>,
    /// Longest back-off sleep among failing tests.
    pub sleep: Duration,
    /// Longest hold-off among failing tests, applied once they clear.
    pub hold_off: Duration,
    /// A test has stayed out of range for its reset time.
    pub reset_filters: bool,
    /// A failing test asked for a glitch-log flush.
    pub glitch: bool,
    /// First failing test with ExitOnFailure: (name, value, min, max).
    pub exit: Option<(String, f64, f64, f64)>,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.failed.is_empty()
    }

    /// Fold another outcome into this one.
    pub fn merge(&mut self, other: TestOutcome) {
        self.failed.extend(other.failed);
        self.sleep = self.sleep.max(other.sleep);
        self.hold_off = self.hold_off.max(other.hold_off);
        self.reset_filters |= other.reset_filters;
        self.glitch |= other.glitch;
        if self.exit.is_none() {
            self.exit = other.exit;
        }
    }
}

/// Loaded scalar tests.
#[derive(Debug, Clone, Default)]
pub struct TestSet {
    pub tests: Vec<RangeTest>,
    pub flags: TestFlags,
    pub despike: Option<DespikeParams>,
}

impl TestSet {
    pub fn pv_names(&self) -> Vec<String> {
        self.tests.iter().map(|t| t.name.clone()).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.tests.iter().map(|t| t.value).collect()
    }

    /// Evaluate against freshly read `values` (parallel to `tests`).
    pub fn evaluate(&mut self, values: &[f64], interval: Duration, now: Instant) -> TestOutcome {
        let mut values = values.to_vec();
        if let Some(params) = &self.despike {
            if self.flags.contains(TestFlags::DESPIKE) {
                let mask: Vec<bool> = self.tests.iter().map(|t| t.despike).collect();
                despike_masked(&mut values, &mask, params, params.threshold);
            }
        }

        let mut outcome = TestOutcome::default();
        for (test, &value) in self.tests.iter_mut().zip(&values) {
            test.value = value;
            let ok = test.check(value);
            test.out_of_range = !ok;
            if ok {
                test.out_since = None;
                continue;
            }

            let since = *test.out_since.get_or_insert(now);
            outcome.failed.push(test.name.clone());
            if let Some(w) = test.sleep {
                outcome.sleep = outcome.sleep.max(w.resolve(interval));
            }
            if let Some(w) = test.hold_off {
                outcome.hold_off = outcome.hold_off.max(w.resolve(interval));
            }
            if let Some(reset) = test.reset {
                if now.duration_since(since) >= reset {
                    outcome.reset_filters = true;
                }
            }
            outcome.glitch |= test.glitch_log;
            if test.exit_on_failure && outcome.exit.is_none() {
                outcome.exit = Some((test.name.clone(), value, test.min, test.max));
            }
        }
        outcome
    }
}

// ─── Waveform Tests ─────────────────────────────────────────────────

/// One checked element of a waveform.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformElement {
    pub name: String,
    pub index: usize,
    pub min: f64,
    pub max: f64,
    pub ignore: bool,
}

/// Range test over selected elements of one waveform PV.
#[derive(Debug, Clone)]
pub struct WaveformTest {
    pub pv: String,
    /// Sorted by `index`.
    pub elements: Vec<WaveformElement>,
    pub despike: Option<DespikeParams>,
    pub sleep: Option<Wait>,
    pub hold_off: Option<Wait>,
    pub glitch_log: bool,
    pub exit_on_failure: bool,
    /// Element values after the last evaluation.
    pub values: Vec<f64>,
}

impl WaveformTest {
    /// Waveform length needed to address every element.
    pub fn required_len(&self) -> usize {
        self.elements.iter().map(|e| e.index + 1).max().unwrap_or(0)
    }

    /// Evaluate against a freshly read waveform.
    ///
    /// The selected elements, in index order, are despiked as neighbors
    /// when configured; ignored elements are despiked but never checked.
    pub fn evaluate(&mut self, waveform: &[f64], interval: Duration) -> Result<TestOutcome, usize> {
        let needed = self.required_len();
        if waveform.len() < needed {
            return Err(needed);
        }
        let mut values: Vec<f64> = self.elements.iter().map(|e| waveform[e.index]).collect();
        if let Some(params) = &self.despike {
            crate::kernel::despike::despike(&mut values, params);
        }

        let mut outcome = TestOutcome::default();
        for (e, &v) in self.elements.iter().zip(&values) {
            if e.ignore || (v >= e.min && v <= e.max) {
                continue;
            }
            outcome.failed.push(format!("{}[{}] {}", self.pv, e.index, e.name));
            if self.exit_on_failure && outcome.exit.is_none() {
                outcome.exit = Some((e.name.clone(), v, e.min, e.max));
            }
        }
        if !outcome.passed() {
            if let Some(w) = self.sleep {
                outcome.sleep = w.resolve(interval);
            }
            if let Some(w) = self.hold_off {
                outcome.hold_off = w.resolve(interval);
            }
            outcome.glitch = self.glitch_log;
        }
        self.values = values;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(tests: Vec<RangeTest>) -> TestSet {
        TestSet {
            tests,
            flags: TestFlags::empty(),
            despike: None,
        }
    }

    #[test]
    fn wait_resolution_is_bounded() {
        let interval = Duration::from_secs(2);
        assert_eq!(Wait::Intervals(3.0).resolve(interval), Duration::from_secs(6));
        assert_eq!(Wait::Seconds(-1.0).resolve(interval), Duration::ZERO);
        assert_eq!(Wait::Seconds(f64::NAN).resolve(interval), Duration::ZERO);
        assert_eq!(Wait::Intervals(1e300).resolve(interval), MAX_WAIT);
        assert_eq!(Wait::Seconds(f64::INFINITY).resolve(interval), MAX_WAIT);
    }

    #[test]
    fn flags_accumulate_with_or() {
        let mut flags = TestFlags::empty();
        flags |= TestFlags::SLEEP;
        flags |= TestFlags::SLEEP;
        flags |= TestFlags::GLITCH_LOG;
        assert_eq!(flags, TestFlags::SLEEP | TestFlags::GLITCH_LOG);
        assert_eq!(flags.bits(), 0b1_0001);
    }

    #[test]
    fn failing_test_reports_sleep_and_hold_off() {
        let mut a = RangeTest::new("DCCT", 10.0, 500.0);
        a.sleep = Some(Wait::Intervals(3.0));
        a.hold_off = Some(Wait::Seconds(5.0));
        let b = RangeTest::new("VAC", 0.0, 1e-8);
        let mut tests = set(vec![a, b]);

        let out = tests.evaluate(&[5.0, 0.0], Duration::from_secs(2), Instant::now());
        assert_eq!(out.failed, vec!["DCCT"]);
        assert_eq!(out.sleep, Duration::from_secs(6));
        assert_eq!(out.hold_off, Duration::from_secs(5));
        assert!(!out.glitch);
        assert!(out.exit.is_none());

        let out = tests.evaluate(&[100.0, 0.0], Duration::from_secs(2), Instant::now());
        assert!(out.passed());
    }

    #[test]
    fn nan_is_out_of_range() {
        let mut tests = set(vec![RangeTest::new("X", -1.0, 1.0)]);
        let out = tests.evaluate(&[f64::NAN], Duration::from_secs(1), Instant::now());
        assert!(!out.passed());
    }

    #[test]
    fn reset_after_continuous_excursion() {
        let mut t = RangeTest::new("X", 0.0, 1.0);
        t.reset = Some(Duration::from_secs(10));
        let mut tests = set(vec![t]);
        let t0 = Instant::now();
        let interval = Duration::from_secs(1);

        assert!(!tests.evaluate(&[2.0], interval, t0).reset_filters);
        assert!(
            !tests
                .evaluate(&[2.0], interval, t0 + Duration::from_secs(5))
                .reset_filters
        );
        assert!(
            tests
                .evaluate(&[2.0], interval, t0 + Duration::from_secs(10))
                .reset_filters
        );
        // Clearing restarts the clock.
        tests.evaluate(&[0.5], interval, t0 + Duration::from_secs(11));
        assert!(
            !tests
                .evaluate(&[2.0], interval, t0 + Duration::from_secs(12))
                .reset_filters
        );
    }

    #[test]
    fn exit_on_failure_reported() {
        let mut t = RangeTest::new("BEAM", 1.0, 2.0);
        t.exit_on_failure = true;
        t.glitch_log = true;
        let mut tests = set(vec![t]);
        let out = tests.evaluate(&[0.0], Duration::from_secs(1), Instant::now());
        assert!(out.glitch);
        assert_eq!(out.exit, Some(("BEAM".to_string(), 0.0, 1.0, 2.0)));
    }

    #[test]
    fn waveform_test_skips_ignored_elements() {
        let mut wt = WaveformTest {
            pv: "BPM:WF".to_string(),
            elements: vec![
                WaveformElement {
                    name: "BPM1".to_string(),
                    index: 0,
                    min: -1.0,
                    max: 1.0,
                    ignore: false,
                },
                WaveformElement {
                    name: "BPM3".to_string(),
                    index: 2,
                    min: -1.0,
                    max: 1.0,
                    ignore: true,
                },
            ],
            despike: None,
            sleep: Some(Wait::Seconds(1.0)),
            hold_off: None,
            glitch_log: false,
            exit_on_failure: false,
            values: Vec::new(),
        };
        assert_eq!(wt.required_len(), 3);
        assert_eq!(wt.evaluate(&[0.0, 9.0], Duration::from_secs(1)), Err(3));

        let out = wt.evaluate(&[0.0, 9.0, 9.0], Duration::from_secs(1)).unwrap();
        assert!(out.passed());
        assert_eq!(out.sleep, Duration::ZERO);

        let out = wt.evaluate(&[5.0, 0.0, 0.0], Duration::from_secs(1)).unwrap();
        assert_eq!(out.failed.len(), 1);
        assert!(out.failed[0].contains("BPM1"));
        assert_eq!(out.sleep, Duration::from_secs(1));
    }
}
