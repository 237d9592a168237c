// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
// SMA = arithmetic mean of the last `period` closes.
// =============================================================================

/// Mean of the last `period` values.
///
/// Returns `None` when `period` is zero, there are fewer than `period`
/// values, or the mean is non-finite.
pub fn calculate_sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    mean.is_finite().then_some(mean)
}
