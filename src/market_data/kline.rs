// =============================================================================
// Kline Parsing — push-stream candles and REST snapshot rows
// =============================================================================
//
// Binance ships OHLCV values as decimal strings; both the WebSocket kline
// payload and the `/api/v3/klines` rows are decoded here into typed candles.
// =============================================================================

use crate::error::FeedError;
use crate::market_data::order_book::OrderBookCache;
use crate::types::{canonical_symbol, Interval, MarketFrame};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A candle as delivered by the kline push stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleMessage {
    pub symbol: String,
    pub interval: Interval,
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// `true` once the candle's time window has closed.
    pub is_final: bool,
}

/// One row of the REST klines snapshot, before it is tied to a symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandleRow {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl CandleRow {
    /// Build a frame for `symbol`/`interval`, merging the cached book.
    pub fn into_frame(self, symbol: &str, interval: Interval, book: &OrderBookCache) -> MarketFrame {
        MarketFrame {
            timestamp: self.timestamp,
            symbol: canonical_symbol(symbol),
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            interval,
            bids: book.bids.clone(),
            asks: book.asks.clone(),
        }
    }
}

impl CandleMessage {
    pub fn into_frame(self, book: &OrderBookCache) -> MarketFrame {
        MarketFrame {
            timestamp: self.timestamp,
            symbol: self.symbol,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            interval: self.interval,
            bids: book.bids.clone(),
            asks: book.asks.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a kline push message.
///
/// Expected shape (single stream, or wrapped in `{ "stream", "data" }`):
/// ```json
/// { "e": "kline", "s": "BTCUSDT", "k": { "t": 1700000000000, "i": "1m",
///   "o": "37000.00", "h": "37050.00", "l": "36990.00", "c": "37020.00",
///   "v": "123.456", "x": false } }
/// ```
pub fn parse_kline_message(text: &str) -> Result<CandleMessage, FeedError> {
    let root: serde_json::Value = serde_json::from_str(text)?;
    let data = root.get("data").unwrap_or(&root);

    let k = data
        .get("k")
        .ok_or_else(|| FeedError::Parse("missing field k".into()))?;

    // The symbol lives on the envelope, but some relays put it in `k`.
    let symbol = data["s"]
        .as_str()
        .or_else(|| k["s"].as_str())
        .map(canonical_symbol)
        .ok_or_else(|| FeedError::Parse("missing field s".into()))?;

    let interval: Interval = k["i"]
        .as_str()
        .ok_or_else(|| FeedError::Parse("missing field k.i".into()))?
        .parse()?;

    let timestamp = k["t"]
        .as_i64()
        .ok_or_else(|| FeedError::Parse("missing field k.t".into()))?;
    let is_final = k["x"]
        .as_bool()
        .ok_or_else(|| FeedError::Parse("missing field k.x".into()))?;

    Ok(CandleMessage {
        symbol,
        interval,
        timestamp,
        open: parse_string_f64(&k["o"], "k.o")?,
        high: parse_string_f64(&k["h"], "k.h")?,
        low: parse_string_f64(&k["l"], "k.l")?,
        close: parse_string_f64(&k["c"], "k.c")?,
        volume: parse_string_f64(&k["v"], "k.v")?,
        is_final,
    })
}

/// Parse one entry of the `/api/v3/klines` array-of-arrays response.
///
/// Array indices used: `[0]` openTime, `[1]` open, `[2]` high, `[3]` low,
/// `[4]` close, `[5]` volume. Later fields are ignored.
pub fn parse_rest_row(entry: &serde_json::Value) -> Result<CandleRow, FeedError> {
    let arr = entry
        .as_array()
        .ok_or_else(|| FeedError::Parse("kline entry is not an array".into()))?;

    if arr.len() < 6 {
        return Err(FeedError::Parse(format!(
            "kline entry has {} elements, expected at least 6",
            arr.len()
        )));
    }

    let timestamp = arr[0]
        .as_i64()
        .ok_or_else(|| FeedError::Parse("kline open time is not an integer".into()))?;

    Ok(CandleRow {
        timestamp,
        open: parse_string_f64(&arr[1], "open")?,
        high: parse_string_f64(&arr[2], "high")?,
        low: parse_string_f64(&arr[3], "low")?,
        close: parse_string_f64(&arr[4], "close")?,
        volume: parse_string_f64(&arr[5], "volume")?,
    })
}

/// Helper: Binance sends numeric values as JSON strings inside kline objects.
pub(crate) fn parse_string_f64(val: &serde_json::Value, name: &str) -> Result<f64, FeedError> {
    let parsed = match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| FeedError::Parse(format!("failed to parse {name} as f64: {s}")))?,
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| FeedError::Parse(format!("field {name} is not a valid f64")))?,
        _ => return Err(FeedError::Parse(format!("field {name} has unexpected JSON type"))),
    };
    if parsed.is_finite() {
        Ok(parsed)
    } else {
        Err(FeedError::Parse(format!("field {name} is not finite")))
    }
}
