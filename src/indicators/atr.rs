// =============================================================================
// Average True Range (ATR), simple-average variant
// =============================================================================
//
// True Range (TR) for each bar:
//   TR_0 = H - L
//   TR_t = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is the plain SMA of the last `period` TR values (not Wilder's
// smoothing), matching the Keltner Channel definition used by the engine.
// =============================================================================

use crate::indicators::sma::calculate_sma;
use crate::types::CandleRecord;

/// True-range series, one value per candle (oldest first).
pub fn true_range_series(candles: &[CandleRecord]) -> Vec<f64> {
    let mut tr_values = Vec::with_capacity(candles.len());
    let mut prev_close: Option<f64> = None;

    for c in candles {
        let hl = c.high - c.low;
        // f64::max skips NaN, so non-finite inputs must poison the bar explicitly.
        let tr = match prev_close {
            _ if !c.high.is_finite() || !c.low.is_finite() => f64::NAN,
            Some(pc) if !pc.is_finite() => f64::NAN,
            Some(pc) => hl.max((c.high - pc).abs()).max((c.low - pc).abs()),
            None => hl,
        };
        tr_values.push(tr);
        prev_close = Some(c.close);
    }

    tr_values
}

/// Most recent ATR value.
///
/// # Returns
/// `None` when:
/// - `period` is zero.
/// - There are fewer than `period` true-range values (one per candle).
/// - The average is non-finite.
pub fn calculate_atr(candles: &[CandleRecord], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    calculate_sma(&true_range_series(candles), period)
}
