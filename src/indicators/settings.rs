// =============================================================================
// Indicator settings
// =============================================================================
//
// One typed parameter record per indicator kind. The serialized form mirrors
// the JSON config layout:
//
//   "sma_fast":         { "enabled": false, "period": 9 }
//   "bollinger_bands":  { "enabled": false, "period": 20, "std_dev": 2.0 }
//   "keltner_channels": { "enabled": false, "period": 20, "atr_mult": 2.0 }

use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::indicators::bollinger::calculate_bollinger;
use crate::indicators::keltner::calculate_keltner;
use crate::indicators::sma::calculate_sma;
use crate::indicators::IndicatorOutput;
use crate::types::CandleRecord;

// -----------------------------------------------------------------------------
// Parameter records
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmaParams {
    pub period: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerParams {
    pub period: usize,
    pub std_dev: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeltnerParams {
    pub period: usize,
    pub atr_mult: f64,
}

/// An indicator's parameters plus its on/off switch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Toggle<P> {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub params: P,
}

impl<P> Toggle<P> {
    fn off(params: P) -> Self {
        Self { enabled: false, params }
    }
}

// -----------------------------------------------------------------------------
// Names
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorName {
    SmaFast,
    SmaSlow,
    BollingerBands,
    KeltnerChannels,
}

impl IndicatorName {
    pub const ALL: [IndicatorName; 4] = [
        Self::SmaFast,
        Self::SmaSlow,
        Self::BollingerBands,
        Self::KeltnerChannels,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SmaFast => "sma_fast",
            Self::SmaSlow => "sma_slow",
            Self::BollingerBands => "bollinger_bands",
            Self::KeltnerChannels => "keltner_channels",
        }
    }
}

impl std::fmt::Display for IndicatorName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// -----------------------------------------------------------------------------
// Indicator: one enabled indicator with its parameters
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Indicator {
    SmaFast(SmaParams),
    SmaSlow(SmaParams),
    BollingerBands(BollingerParams),
    KeltnerChannels(KeltnerParams),
}

impl Indicator {
    pub fn name(&self) -> IndicatorName {
        match self {
            Self::SmaFast(_) => IndicatorName::SmaFast,
            Self::SmaSlow(_) => IndicatorName::SmaSlow,
            Self::BollingerBands(_) => IndicatorName::BollingerBands,
            Self::KeltnerChannels(_) => IndicatorName::KeltnerChannels,
        }
    }

    /// Check parameter domains: periods ≥ 1 (≥ 2 for Bollinger, whose
    /// sample σ needs two closes), multipliers finite and > 0.
    pub fn validate(&self) -> Result<(), FeedError> {
        let (period, min_period, mult) = match *self {
            Self::SmaFast(p) | Self::SmaSlow(p) => (p.period, 1, None),
            Self::BollingerBands(p) => (p.period, 2, Some(("std_dev", p.std_dev))),
            Self::KeltnerChannels(p) => (p.period, 1, Some(("atr_mult", p.atr_mult))),
        };
        if period < min_period {
            return Err(self.invalid(format!("period must be at least {min_period}, got {period}")));
        }
        if let Some((field, value)) = mult {
            if !value.is_finite() || value <= 0.0 {
                return Err(self.invalid(format!("{field} must be a positive number, got {value}")));
            }
        }
        Ok(())
    }

    /// Compute over `candles` (oldest first).
    ///
    /// `Ok(None)` means there is not enough history yet, which is not an
    /// error. Invalid parameters are reported as `IndicatorComputation`.
    pub fn compute(&self, candles: &[CandleRecord]) -> Result<Option<IndicatorOutput>, FeedError> {
        self.validate()?;
        let closes = || candles.iter().map(|c| c.close).collect::<Vec<f64>>();

        let output = match *self {
            Self::SmaFast(p) | Self::SmaSlow(p) => {
                calculate_sma(&closes(), p.period).map(|value| IndicatorOutput::Average {
                    period: p.period,
                    value,
                })
            }
            Self::BollingerBands(p) => {
                calculate_bollinger(&closes(), p.period, p.std_dev).map(|bb| IndicatorOutput::Bands {
                    upper: bb.upper,
                    middle: bb.middle,
                    lower: bb.lower,
                })
            }
            Self::KeltnerChannels(p) => {
                calculate_keltner(candles, p.period, p.atr_mult).map(|k| IndicatorOutput::Bands {
                    upper: k.upper,
                    middle: k.middle,
                    lower: k.lower,
                })
            }
        };
        Ok(output)
    }

    fn invalid(&self, reason: String) -> FeedError {
        FeedError::IndicatorComputation {
            indicator: self.name().to_string(),
            reason,
        }
    }
}

// -----------------------------------------------------------------------------
// IndicatorSpec: the full set, as stored in config
// -----------------------------------------------------------------------------

fn default_sma_fast() -> Toggle<SmaParams> {
    Toggle::off(SmaParams { period: 9 })
}

fn default_sma_slow() -> Toggle<SmaParams> {
    Toggle::off(SmaParams { period: 21 })
}

fn default_bollinger() -> Toggle<BollingerParams> {
    Toggle::off(BollingerParams { period: 20, std_dev: 2.0 })
}

fn default_keltner() -> Toggle<KeltnerParams> {
    Toggle::off(KeltnerParams { period: 20, atr_mult: 2.0 })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSpec {
    #[serde(default = "default_sma_fast")]
    pub sma_fast: Toggle<SmaParams>,
    #[serde(default = "default_sma_slow")]
    pub sma_slow: Toggle<SmaParams>,
    #[serde(default = "default_bollinger")]
    pub bollinger_bands: Toggle<BollingerParams>,
    #[serde(default = "default_keltner")]
    pub keltner_channels: Toggle<KeltnerParams>,
}

impl Default for IndicatorSpec {
    fn default() -> Self {
        Self {
            sma_fast: default_sma_fast(),
            sma_slow: default_sma_slow(),
            bollinger_bands: default_bollinger(),
            keltner_channels: default_keltner(),
        }
    }
}

impl IndicatorSpec {
    /// Every indicator regardless of its switch, in `IndicatorName::ALL` order.
    pub fn all(&self) -> [(bool, Indicator); 4] {
        [
            (self.sma_fast.enabled, Indicator::SmaFast(self.sma_fast.params)),
            (self.sma_slow.enabled, Indicator::SmaSlow(self.sma_slow.params)),
            (self.bollinger_bands.enabled, Indicator::BollingerBands(self.bollinger_bands.params)),
            (self.keltner_channels.enabled, Indicator::KeltnerChannels(self.keltner_channels.params)),
        ]
    }

    /// Indicators switched on, in a stable order.
    pub fn enabled(&self) -> Vec<Indicator> {
        self.all()
            .into_iter()
            .filter_map(|(on, ind)| on.then_some(ind))
            .collect()
    }

    /// Apply a partial update. The candidate is validated first; on error
    /// the current settings are left unchanged.
    pub fn apply(&mut self, update: &IndicatorUpdate) -> Result<Indicator, FeedError> {
        let reject = |reason: &str| FeedError::IndicatorComputation {
            indicator: update.name.to_string(),
            reason: reason.to_string(),
        };

        let (enabled, candidate) = match update.name {
            IndicatorName::SmaFast | IndicatorName::SmaSlow => {
                if update.std_dev.is_some() || update.atr_mult.is_some() {
                    return Err(reject("moving averages only take a period"));
                }
                let current = if update.name == IndicatorName::SmaFast {
                    self.sma_fast
                } else {
                    self.sma_slow
                };
                let params = SmaParams {
                    period: update.period.unwrap_or(current.params.period),
                };
                let ind = if update.name == IndicatorName::SmaFast {
                    Indicator::SmaFast(params)
                } else {
                    Indicator::SmaSlow(params)
                };
                (update.enabled.unwrap_or(current.enabled), ind)
            }
            IndicatorName::BollingerBands => {
                if update.atr_mult.is_some() {
                    return Err(reject("bollinger bands take period and std_dev"));
                }
                let current = self.bollinger_bands;
                let params = BollingerParams {
                    period: update.period.unwrap_or(current.params.period),
                    std_dev: update.std_dev.unwrap_or(current.params.std_dev),
                };
                (update.enabled.unwrap_or(current.enabled), Indicator::BollingerBands(params))
            }
            IndicatorName::KeltnerChannels => {
                if update.std_dev.is_some() {
                    return Err(reject("keltner channels take period and atr_mult"));
                }
                let current = self.keltner_channels;
                let params = KeltnerParams {
                    period: update.period.unwrap_or(current.params.period),
                    atr_mult: update.atr_mult.unwrap_or(current.params.atr_mult),
                };
                (update.enabled.unwrap_or(current.enabled), Indicator::KeltnerChannels(params))
            }
        };

        candidate.validate()?;

        match candidate {
            Indicator::SmaFast(params) => self.sma_fast = Toggle { enabled, params },
            Indicator::SmaSlow(params) => self.sma_slow = Toggle { enabled, params },
            Indicator::BollingerBands(params) => self.bollinger_bands = Toggle { enabled, params },
            Indicator::KeltnerChannels(params) => self.keltner_channels = Toggle { enabled, params },
        }
        Ok(candidate)
    }
}

/// Partial change to one indicator, as accepted by the control API.
#[derive(Debug, Clone, Deserialize)]
pub struct IndicatorUpdate {
    pub name: IndicatorName,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub period: Option<usize>,
    #[serde(default)]
    pub std_dev: Option<f64>,
    #[serde(default)]
    pub atr_mult: Option<f64>,
}

impl IndicatorUpdate {
    pub fn toggle(name: IndicatorName, enabled: bool) -> Self {
        Self {
            name,
            enabled: Some(enabled),
            period: None,
            std_dev: None,
            atr_mult: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closes(values: &[f64]) -> Vec<CandleRecord> {
        values
            .iter()
            .enumerate()
            .map(|(i, &c)| CandleRecord {
                timestamp: i as i64,
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1.0,
            })
            .collect()
    }

    #[test]
    fn defaults_are_all_disabled() {
        let spec = IndicatorSpec::default();
        assert!(spec.enabled().is_empty());
        assert_eq!(spec.sma_fast.params.period, 9);
        assert_eq!(spec.sma_slow.params.period, 21);
        assert_eq!(spec.bollinger_bands.params, BollingerParams { period: 20, std_dev: 2.0 });
        assert_eq!(spec.keltner_channels.params, KeltnerParams { period: 20, atr_mult: 2.0 });
    }

    #[test]
    fn spec_json_layout() {
        let json = serde_json::to_value(IndicatorSpec::default()).unwrap();
        assert_eq!(json["sma_fast"], serde_json::json!({ "enabled": false, "period": 9 }));
        assert_eq!(json["keltner_channels"]["atr_mult"], 2.0);
    }

    #[test]
    fn partial_spec_fills_defaults() {
        let spec: IndicatorSpec =
            serde_json::from_str(r#"{ "sma_fast": { "enabled": true, "period": 2 } }"#).unwrap();
        assert_eq!(spec.enabled(), vec![Indicator::SmaFast(SmaParams { period: 2 })]);
        assert_eq!(spec.sma_slow, default_sma_slow());
    }

    #[test]
    fn zero_period_fails_validation() {
        let ind = Indicator::SmaSlow(SmaParams { period: 0 });
        let err = ind.compute(&closes(&[1.0, 2.0])).unwrap_err();
        assert!(matches!(err, FeedError::IndicatorComputation { ref indicator, .. } if indicator == "sma_slow"));
    }

    #[test]
    fn bollinger_rejects_single_close_window() {
        let bb = Indicator::BollingerBands(BollingerParams { period: 1, std_dev: 2.0 });
        assert!(bb.validate().is_err());
        assert!(Indicator::BollingerBands(BollingerParams { period: 2, std_dev: 2.0 }).validate().is_ok());
        assert!(Indicator::SmaFast(SmaParams { period: 1 }).validate().is_ok());

        let mut spec = IndicatorSpec::default();
        let update = IndicatorUpdate {
            name: IndicatorName::BollingerBands,
            enabled: Some(true),
            period: Some(1),
            std_dev: None,
            atr_mult: None,
        };
        assert!(spec.apply(&update).is_err());
        assert_eq!(spec.bollinger_bands, default_bollinger());
    }

    #[test]
    fn non_positive_multiplier_fails_validation() {
        let bb = Indicator::BollingerBands(BollingerParams { period: 3, std_dev: 0.0 });
        assert!(bb.validate().is_err());
        let kc = Indicator::KeltnerChannels(KeltnerParams { period: 3, atr_mult: f64::NAN });
        assert!(kc.validate().is_err());
    }

    #[test]
    fn insufficient_history_is_not_an_error() {
        let ind = Indicator::SmaFast(SmaParams { period: 2 });
        assert_eq!(ind.compute(&closes(&[1.5])).unwrap(), None);
    }

    #[test]
    fn sma_output_carries_period() {
        let ind = Indicator::SmaFast(SmaParams { period: 2 });
        let out = ind.compute(&closes(&[1.5, 2.0, 2.5])).unwrap();
        assert_eq!(out, Some(IndicatorOutput::Average { period: 2, value: 2.25 }));
    }

    #[test]
    fn constant_series_collapses_bollinger() {
        let ind = Indicator::BollingerBands(BollingerParams { period: 5, std_dev: 2.0 });
        let out = ind.compute(&closes(&[7.0; 5])).unwrap();
        assert_eq!(out, Some(IndicatorOutput::Bands { upper: 7.0, middle: 7.0, lower: 7.0 }));
    }

    #[test]
    fn apply_update_merges_fields() {
        let mut spec = IndicatorSpec::default();
        let update = IndicatorUpdate {
            name: IndicatorName::BollingerBands,
            enabled: Some(true),
            period: None,
            std_dev: Some(2.5),
            atr_mult: None,
        };
        spec.apply(&update).unwrap();
        assert!(spec.bollinger_bands.enabled);
        assert_eq!(spec.bollinger_bands.params, BollingerParams { period: 20, std_dev: 2.5 });
    }

    #[test]
    fn rejected_update_leaves_spec_untouched() {
        let mut spec = IndicatorSpec::default();
        let update = IndicatorUpdate {
            name: IndicatorName::KeltnerChannels,
            enabled: Some(true),
            period: Some(0),
            std_dev: None,
            atr_mult: None,
        };
        assert!(spec.apply(&update).is_err());
        assert_eq!(spec, IndicatorSpec::default());

        let wrong_field = IndicatorUpdate {
            name: IndicatorName::SmaFast,
            enabled: Some(true),
            period: None,
            std_dev: Some(1.0),
            atr_mult: None,
        };
        assert!(spec.apply(&wrong_field).is_err());
        assert!(!spec.sma_fast.enabled);
    }

    #[test]
    fn toggle_update_keeps_params() {
        let mut spec = IndicatorSpec::default();
        spec.apply(&IndicatorUpdate::toggle(IndicatorName::SmaSlow, true)).unwrap();
        assert_eq!(spec.enabled(), vec![Indicator::SmaSlow(SmaParams { period: 21 })]);
    }
}
