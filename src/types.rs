// =============================================================================
// Shared types used across the market data pipeline
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// A single order-book level: `(price, quantity)`.
pub type PriceLevel = (f64, f64);

// =============================================================================
// Interval
// =============================================================================

/// Candle granularities supported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "8h")]
    EightHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "3d")]
    ThreeDays,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1M")]
    OneMonth,
}

impl Interval {
    /// Every interval, shortest first.
    pub const ALL: [Interval; 15] = [
        Self::OneMinute,
        Self::ThreeMinutes,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::OneHour,
        Self::TwoHours,
        Self::FourHours,
        Self::SixHours,
        Self::EightHours,
        Self::TwelveHours,
        Self::OneDay,
        Self::ThreeDays,
        Self::OneWeek,
        Self::OneMonth,
    ];

    /// Exchange wire code, e.g. `"15m"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::ThreeMinutes => "3m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::TwoHours => "2h",
            Self::FourHours => "4h",
            Self::SixHours => "6h",
            Self::EightHours => "8h",
            Self::TwelveHours => "12h",
            Self::OneDay => "1d",
            Self::ThreeDays => "3d",
            Self::OneWeek => "1w",
            Self::OneMonth => "1M",
        }
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::OneMinute
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Interval {
    type Err = FeedError;

    // Case-sensitive: "1m" is one minute, "1M" is one month.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|iv| iv.as_str() == s)
            .ok_or_else(|| FeedError::Parse(format!("unsupported interval: {s}")))
    }
}

/// Symbols offered to the presentation layer as quick picks.
pub const POPULAR_SYMBOLS: &[&str] = &[
    "BTCUSDT", "ETHUSDT", "BNBUSDT", "ADAUSDT", "XRPUSDT", "SOLUSDT", "DOTUSDT", "DOGEUSDT",
    "AVAXUSDT", "MATICUSDT",
];

/// Canonical uppercase form of an exchange symbol.
pub fn canonical_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

// =============================================================================
// Market frames and history records
// =============================================================================

/// One fully assembled market observation: OHLCV plus the order book as it
/// was cached when the frame was built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketFrame {
    /// Exchange epoch-ms; unique key within a symbol/interval.
    pub timestamp: i64,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub interval: Interval,
    /// Most aggressive first. Empty until the first depth update arrives.
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
}

impl MarketFrame {
    /// History-resident projection of this frame.
    pub fn to_record(&self) -> CandleRecord {
        CandleRecord {
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// OHLCV-only candle kept in history. Order-book data is deliberately not
/// retained here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandleRecord {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// =============================================================================
// Connection status
// =============================================================================

/// Lifecycle state of the streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Streaming,
    Errored,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl ConnectionStatus {
    /// Only `Streaming` counts as connected for presentation purposes.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Streaming)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Errored => write!(f, "Errored"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_parses_case_sensitively() {
        assert_eq!("1m".parse::<Interval>().unwrap(), Interval::OneMinute);
        assert_eq!("1M".parse::<Interval>().unwrap(), Interval::OneMonth);
        assert!("2m".parse::<Interval>().is_err());
    }

    #[test]
    fn interval_serde_uses_wire_codes() {
        let json = serde_json::to_string(&Interval::FifteenMinutes).unwrap();
        assert_eq!(json, "\"15m\"");
        let back: Interval = serde_json::from_str("\"4h\"").unwrap();
        assert_eq!(back, Interval::FourHours);
    }

    #[test]
    fn every_interval_round_trips_through_display() {
        for iv in Interval::ALL {
            assert_eq!(iv.to_string().parse::<Interval>().unwrap(), iv);
        }
    }

    #[test]
    fn frame_projection_drops_book() {
        let frame = MarketFrame {
            timestamp: 100,
            symbol: "BTCUSDT".into(),
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
            interval: Interval::OneMinute,
            bids: vec![(1.4, 3.0)],
            asks: vec![(1.6, 2.0)],
        };
        let rec = frame.to_record();
        assert_eq!(rec.timestamp, 100);
        assert_eq!(rec.close, 1.5);
        assert_eq!(rec.volume, 10.0);
    }

    #[test]
    fn canonical_symbol_uppercases() {
        assert_eq!(canonical_symbol(" btcusdt "), "BTCUSDT");
    }

    #[test]
    fn only_streaming_is_connected() {
        assert!(ConnectionStatus::Streaming.is_connected());
        assert!(!ConnectionStatus::Connecting.is_connected());
        assert!(!ConnectionStatus::Errored.is_connected());
    }
}
