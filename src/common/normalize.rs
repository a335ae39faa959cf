/// Drop non-finite values to `None`.
#[inline]
pub fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Min-max rescale to [0, 1] over the non-null entries.
///
/// If no entries are valid, or the valid range is zero, every output is
/// `None`. Null inputs stay null.
pub fn min_max(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let (lo, hi) = values.iter()
        .filter_map(|v| finite(*v))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));

    if !(hi > lo) {
        return vec![None; values.len()];
    }
    let span = hi - lo;
    values.iter()
        .map(|v| finite(*v).map(|v| ((v - lo) / span).clamp(0.0, 1.0)))
        .collect()
}

/// Mean of the non-null entries; `None` if all are null.
pub fn partial_mean(values: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, n) = values.into_iter()
        .filter_map(finite)
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    partial_mean(values.iter().copied().map(Some))
}

/// Median with the midpoint rule for even counts.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 { (sorted[mid - 1] + sorted[mid]) / 2.0 } else { sorted[mid] })
}
