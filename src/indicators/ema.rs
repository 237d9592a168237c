// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_0      = close_0
//   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The series is seeded with the first available close and runs over the
// whole input, so every close has an EMA value.
// =============================================================================

/// Compute the EMA series over all of `closes`.
///
/// Returns an empty `Vec` when the input is empty or the period is zero.
/// Output element `i` is the EMA after consuming `closes[i]`.
///
/// # Edge cases
/// - Non-finite intermediate values stop the series; downstream consumers
///   should not trust anything after a broken point.
pub fn calculate_ema(closes: &[f64], period: usize) -> Vec<f64> {
    let Some(&seed) = closes.first() else {
        return Vec::new();
    };
    if period == 0 || !seed.is_finite() {
        return Vec::new();
    }

    let multiplier = 2.0 / (period + 1) as f64;

    let mut result = Vec::with_capacity(closes.len());
    result.push(seed);

    let mut prev_ema = seed;
    for &close in &closes[1..] {
        let ema = close * multiplier + prev_ema * (1.0 - multiplier);
        if !ema.is_finite() {
            break;
        }
        result.push(ema);
        prev_ema = ema;
    }

    result
}

/// Most recent EMA value, if the whole series was computable.
pub fn latest_ema(closes: &[f64], period: usize) -> Option<f64> {
    let series = calculate_ema(closes, period);
    if series.len() == closes.len() {
        series.last().copied()
    } else {
        None
    }
}
