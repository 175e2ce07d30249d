//! Direct-form IIR filter for actuator deltas.
//!
//! ```text
//! a0·y[k] = Σ_{i>=0} b_i·x[k-i] − Σ_{i>0} a_i·y[k-i]
//! ```
//!
//! `x` is the raw computed delta, `y` the filtered delta actually applied.
//! Past inputs and outputs live in fixed-capacity rings. Evaluation and
//! commit are split so that an iteration whose write is abandoned leaves the
//! histories untouched.

// ─── History Ring ───────────────────────────────────────────────────

/// Fixed-capacity ring of past samples. Age 0 is the newest.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRing {
    data: Vec<f64>,
    head: usize,
}

impl HistoryRing {
    /// Ring of `depth` zeros (at least one slot).
    pub fn new(depth: usize) -> Self {
        Self {
            data: vec![0.0; depth.max(1)],
            head: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.data.len()
    }

    /// Overwrite the oldest slot with `value`, making it the newest.
    #[inline]
    pub fn push(&mut self, value: f64) {
        self.head = (self.head + 1) % self.data.len();
        self.data[self.head] = value;
    }

    /// Sample pushed `age` pushes ago. Ages beyond the depth read as zero.
    #[inline]
    pub fn get(&self, age: usize) -> f64 {
        let depth = self.data.len();
        if age >= depth {
            return 0.0;
        }
        self.data[(self.head + depth - age) % depth]
    }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
        self.head = 0;
    }
}

// ─── Single-Channel Filter ──────────────────────────────────────────

/// IIR filter for one actuator.
#[derive(Debug, Clone)]
pub struct IirFilter {
    a: Vec<f64>,
    b: Vec<f64>,
    inputs: HistoryRing,
    outputs: HistoryRing,
}

impl IirFilter {
    /// Build a filter. `a[0]` must be non-zero; the loader rejects zero.
    pub fn new(a: Vec<f64>, b: Vec<f64>) -> Self {
        let inputs = HistoryRing::new(b.len());
        let outputs = HistoryRing::new(a.len());
        Self {
            a,
            b,
            inputs,
            outputs,
        }
    }

    /// Pass-through filter (`a = [1]`, `b = [1]`).
    pub fn identity() -> Self {
        Self::new(vec![1.0], vec![1.0])
    }

    pub fn a(&self) -> &[f64] {
        &self.a
    }

    pub fn b(&self) -> &[f64] {
        &self.b
    }

    /// Filtered output for `input` given the committed history.
    #[inline]
    pub fn compute(&self, input: f64) -> f64 {
        let mut acc = self.b.first().copied().unwrap_or(0.0) * input;
        for (i, b) in self.b.iter().enumerate().skip(1) {
            acc += b * self.inputs.get(i - 1);
        }
        for (i, a) in self.a.iter().enumerate().skip(1) {
            acc -= a * self.outputs.get(i - 1);
        }
        acc / self.a[0]
    }

    /// Record an input/output pair as the newest history entry.
    #[inline]
    pub fn commit(&mut self, input: f64, output: f64) {
        self.inputs.push(input);
        self.outputs.push(output);
    }

    /// Compute and commit in one go.
    pub fn apply(&mut self, input: f64) -> f64 {
        let output = self.compute(input);
        self.commit(input, output);
        output
    }

    /// Zero both histories.
    pub fn reset(&mut self) {
        self.inputs.clear();
        self.outputs.clear();
    }

    /// Steady-state gain `Σb / Σa`.
    pub fn dc_gain(&self) -> f64 {
        self.b.iter().sum::<f64>() / self.a.iter().sum::<f64>()
    }
}

// ─── Filter Bank ────────────────────────────────────────────────────

/// One filter per actuator, indexed like the actuator vector.
#[derive(Debug, Clone, Default)]
pub struct FilterBank {
    filters: Vec<IirFilter>,
}

impl FilterBank {
    pub fn new(filters: Vec<IirFilter>) -> Self {
        Self { filters }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn filter(&self, i: usize) -> Option<&IirFilter> {
        self.filters.get(i)
    }

    /// Filtered deltas for `raw`, without touching history.
    pub fn compute(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter()
            .zip(&self.filters)
            .map(|(x, f)| f.compute(*x))
            .collect()
    }

    /// Commit the raw and filtered deltas of an applied iteration.
    pub fn commit(&mut self, raw: &[f64], filtered: &[f64]) {
        for ((f, x), y) in self.filters.iter_mut().zip(raw).zip(filtered) {
            f.commit(*x, *y);
        }
    }

    pub fn reset(&mut self) {
        self.filters.iter_mut().for_each(IirFilter::reset);
    }
}
