//! Per-vector summary statistics.

/// RMS, mean, mean absolute deviation and the largest-magnitude value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Summary {
    pub rms: f64,
    pub mean: f64,
    pub mad: f64,
    /// Signed value with the largest magnitude.
    pub largest: f64,
    /// Channel holding `largest`.
    pub largest_name: String,
}

/// Summarize `values`; `names` runs parallel to it. Non-finite samples are
/// skipped. An empty (or all-NaN) vector yields zeros and an empty name.
pub fn summarize(values: &[f64], names: &[String]) -> Summary {
    let finite = || values.iter().enumerate().filter(|(_, v)| v.is_finite());
    let count = finite().count();
    if count == 0 {
        return Summary::default();
    }
    let n = count as f64;

    let mean = finite().map(|(_, v)| v).sum::<f64>() / n;
    let rms = (finite().map(|(_, v)| v * v).sum::<f64>() / n).sqrt();
    let mad = finite().map(|(_, v)| (v - mean).abs()).sum::<f64>() / n;

    let (index, largest) = finite()
        .map(|(i, v)| (i, *v))
        .reduce(|best, (i, v)| if v.abs() > best.1.abs() { (i, v) } else { best })
        .unwrap_or((0, 0.0));
    let largest_name = names.get(index).cloned().unwrap_or_default();

    Summary {
        rms,
        mean,
        mad,
        largest,
        largest_name,
    }
}

/// Count of NaN entries, with their names.
pub fn nan_channels<'a>(values: &[f64], names: &'a [String]) -> Vec<&'a str> {
    values
        .iter()
        .zip(names)
        .filter(|(v, _)| v.is_nan())
        .map(|(_, n)| n.as_str())
        .collect()
}
