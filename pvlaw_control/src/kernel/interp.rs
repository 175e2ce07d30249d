//! Lagrange interpolation over 1-D tables and rectangular 2-D grids.
//!
//! The bracketing interval is found by binary search and the `order + 1`
//! point window is centered on it, clamped to the table ends. Queries
//! outside the table return the nearest endpoint value together with an
//! out-of-range status; the caller decides how loudly to complain.

use thiserror::Error;

/// Errors raised while building or evaluating an interpolation table.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InterpError {
    #[error("interpolation table is empty")]
    Empty,

    #[error("length mismatch: {x} independent values, {y} dependent values")]
    Length { x: usize, y: usize },

    #[error("independent values not strictly increasing at row {row}")]
    NotMonotonic { row: usize },

    #[error("not a rectangular grid: {n1} x {n2} != {rows} rows")]
    NotRectangular { n1: usize, n2: usize, rows: usize },

    #[error("grid not sorted ascending on the {axis} axis at row {row}")]
    GridOrder { axis: &'static str, row: usize },

    #[error("zero denominator in Lagrange interpolation")]
    ZeroDenominator,
}

/// Where the query fell relative to the table domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpStatus {
    InRange,
    BelowRange,
    AboveRange,
}

impl InterpStatus {
    pub fn is_out_of_range(self) -> bool {
        self != Self::InRange
    }

    fn or(self, other: Self) -> Self {
        if self.is_out_of_range() { self } else { other }
    }
}

/// Interpolate `y(x)` at `q`.
///
/// `x` must be strictly increasing (checked by the table constructors, not
/// here). `order` is reduced to `x.len() - 1` when the table is too short.
pub fn lagrange(x: &[f64], y: &[f64], q: f64, order: usize) -> Result<(f64, InterpStatus), InterpError> {
    let n = x.len();
    if n == 0 {
        return Err(InterpError::Empty);
    }
    if y.len() != n {
        return Err(InterpError::Length { x: n, y: y.len() });
    }
    if q < x[0] {
        return Ok((y[0], InterpStatus::BelowRange));
    }
    if q > x[n - 1] {
        return Ok((y[n - 1], InterpStatus::AboveRange));
    }

    let order = order.min(n - 1);
    let window = window(x, q, order);

    let mut sum = 0.0;
    for j in window.clone() {
        let mut term = y[j];
        for k in window.clone() {
            if k == j {
                continue;
            }
            let denom = x[j] - x[k];
            if denom == 0.0 {
                return Err(InterpError::ZeroDenominator);
            }
            term *= (q - x[k]) / denom;
        }
        sum += term;
    }
    Ok((sum, InterpStatus::InRange))
}

/// Index range of the `order + 1` points used for a query at `q`.
fn window(x: &[f64], q: f64, order: usize) -> std::ops::Range<usize> {
    let n = x.len();
    // Largest i with x[i] <= q, kept below the last point so [i, i+1] brackets q.
    let below = x.partition_point(|&v| v <= q).saturating_sub(1);
    let bracket = below.min(n.saturating_sub(2));
    let left = ((order + 1) / 2).max(1);
    let start = (bracket + 1).saturating_sub(left).min(n - 1 - order);
    start..start + order + 1
}

// ─── 1-D Table ──────────────────────────────────────────────────────

/// Validated 1-D lookup table.
#[derive(Debug, Clone)]
pub struct Table1d {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl Table1d {
    /// Build a table. `x` must be strictly increasing.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self, InterpError> {
        if x.is_empty() {
            return Err(InterpError::Empty);
        }
        if x.len() != y.len() {
            return Err(InterpError::Length {
                x: x.len(),
                y: y.len(),
            });
        }
        if let Some(row) = x.windows(2).position(|w| !(w[1] > w[0])) {
            return Err(InterpError::NotMonotonic { row: row + 1 });
        }
        Ok(Self { x, y })
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Domain of the table.
    pub fn domain(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    pub fn interpolate(&self, q: f64, order: usize) -> Result<(f64, InterpStatus), InterpError> {
        lagrange(&self.x, &self.y, q, order)
    }
}

// ─── 2-D Grid ───────────────────────────────────────────────────────

/// Rectangular grid `z(x1, x2)` stored row-major with `x1` as the slow axis.
#[derive(Debug, Clone)]
pub struct Grid2d {
    x1: Vec<f64>,
    x2: Vec<f64>,
    z: Vec<f64>,
}

impl Grid2d {
    /// Arrange flat columns into a grid.
    ///
    /// Rows must be ordered with `x1` varying slowest: every block of equal
    /// `x1` holds the same strictly increasing `x2` values, and the blocks
    /// appear in strictly increasing `x1` order.
    pub fn gridify(x1: &[f64], x2: &[f64], z: &[f64]) -> Result<Self, InterpError> {
        let rows = x1.len();
        if rows == 0 {
            return Err(InterpError::Empty);
        }
        if x2.len() != rows || z.len() != rows {
            return Err(InterpError::Length {
                x: rows,
                y: x2.len().min(z.len()),
            });
        }

        let n2 = x1.iter().take_while(|&&v| v == x1[0]).count();
        let n1 = rows / n2;
        if n1 * n2 != rows {
            return Err(InterpError::NotRectangular { n1, n2, rows });
        }

        let fast: Vec<f64> = x2[..n2].to_vec();
        if let Some(row) = fast.windows(2).position(|w| !(w[1] > w[0])) {
            return Err(InterpError::GridOrder {
                axis: "fast",
                row: row + 1,
            });
        }

        let mut slow = Vec::with_capacity(n1);
        for block in 0..n1 {
            let base = block * n2;
            let level = x1[base];
            for offset in 0..n2 {
                let row = base + offset;
                if x1[row] != level {
                    return Err(InterpError::NotRectangular { n1, n2, rows });
                }
                if x2[row] != fast[offset] {
                    return Err(InterpError::GridOrder { axis: "fast", row });
                }
            }
            if let Some(&prev) = slow.last() {
                if !(level > prev) {
                    return Err(InterpError::GridOrder { axis: "slow", row: base });
                }
            }
            slow.push(level);
        }

        Ok(Self {
            x1: slow,
            x2: fast,
            z: z.to_vec(),
        })
    }

    /// Grid dimensions `(n1, n2)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.x1.len(), self.x2.len())
    }

    /// Nested interpolation: along `x2` on each candidate `x1` row, then
    /// across those results along `x1`.
    pub fn interpolate(
        &self,
        q1: f64,
        q2: f64,
        order: usize,
    ) -> Result<(f64, InterpStatus), InterpError> {
        let n1 = self.x1.len();
        let n2 = self.x2.len();
        let q1_clamped = q1.clamp(self.x1[0], self.x1[n1 - 1]);
        let rows = window(&self.x1, q1_clamped, order.min(n1 - 1));

        let mut status = InterpStatus::InRange;
        let mut partial = Vec::with_capacity(rows.len());
        for r in rows.clone() {
            let (value, s) = lagrange(&self.x2, &self.z[r * n2..(r + 1) * n2], q2, order)?;
            status = status.or(s);
            partial.push(value);
        }

        let (value, s) = lagrange(&self.x1[rows], &partial, q1, order)?;
        Ok((value, s.or(status)))
    }
}
