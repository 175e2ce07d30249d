//! Dense gain matrix.

/// `K[i][j]`: sensitivity of actuator `i` to readback `j`, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct GainMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl GainMatrix {
    /// Matrix from row-major data.
    ///
    /// # Errors
    /// When `data.len() != rows * cols`.
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, String> {
        if data.len() != rows * cols {
            return Err(format!(
                "gain matrix {rows}x{cols} needs {} entries, got {}",
                rows * cols,
                data.len()
            ));
        }
        Ok(Self { rows, cols, data })
    }

    /// Matrix from column vectors (one per readback), each `rows` long.
    pub fn from_columns(rows: usize, columns: &[Vec<f64>]) -> Result<Self, String> {
        let cols = columns.len();
        let mut data = vec![0.0; rows * cols];
        for (j, column) in columns.iter().enumerate() {
            if column.len() != rows {
                return Err(format!(
                    "gain matrix column {j} has {} entries, expected {rows}",
                    column.len()
                ));
            }
            for (i, v) in column.iter().enumerate() {
                data[i * cols + j] = *v;
            }
        }
        Ok(Self { rows, cols, data })
    }

    /// Actuator count.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Readback count.
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.cols + j]
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// `K · v`.
    pub fn mul_vec(&self, v: &[f64]) -> Vec<f64> {
        (0..self.rows)
            .map(|i| self.row(i).iter().zip(v).map(|(k, x)| k * x).sum())
            .collect()
    }
}
