// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators the engine
// computes over the candle history. Every math function returns `Option<T>`
// so callers are forced to handle insufficient-data and numerical-edge-case
// scenarios.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod engine;
pub mod keltner;
pub mod settings;
pub mod sma;

use serde::Serialize;

pub use engine::IndicatorEngine;
pub use settings::{Indicator, IndicatorName, IndicatorSpec, IndicatorUpdate};

/// Value emitted for one indicator after a recomputation.
///
/// Serialized untagged so moving averages look like `{period, value}` and
/// channel indicators look like `{upper, middle, lower}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IndicatorOutput {
    Average { period: usize, value: f64 },
    Bands { upper: f64, middle: f64, lower: f64 },
}
