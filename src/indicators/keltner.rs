// =============================================================================
// Keltner Channels
// =============================================================================
//
//   middle = EMA(period) over every available close, seeded by the first
//   upper  = middle + atr_mult * ATR(period)
//   lower  = middle - atr_mult * ATR(period)
//
// ATR here is the simple average of the true-range series (see atr.rs).

use crate::indicators::atr::calculate_atr;
use crate::indicators::ema::latest_ema;
use crate::types::CandleRecord;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeltnerResult {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Latest Keltner Channel values, or `None` until `period` true-range
/// values exist.
pub fn calculate_keltner(candles: &[CandleRecord], period: usize, atr_mult: f64) -> Option<KeltnerResult> {
    let atr = calculate_atr(candles, period)?;
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let middle = latest_ema(&closes, period)?;

    let upper = middle + atr_mult * atr;
    let lower = middle - atr_mult * atr;
    if !upper.is_finite() || !lower.is_finite() {
        return None;
    }
    Some(KeltnerResult { upper, middle, lower })
}
