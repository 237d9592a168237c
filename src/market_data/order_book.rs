// =============================================================================
// Order Book Cache — last-write-wins depth snapshot
// =============================================================================
//
// The cache is replaced wholesale by every depth message; levels are never
// merged incrementally. The next constructed MarketFrame copies whatever the
// cache holds at that moment.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::market_data::kline::parse_string_f64;
use crate::types::PriceLevel;

/// Most recent bids/asks, most aggressive level first on each side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookCache {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl OrderBookCache {
    pub fn new(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> Self {
        Self { bids, asks }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|(p, _)| *p)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|(p, _)| *p)
    }

    /// Spread in basis points of the mid price; `None` without both sides.
    pub fn spread_bps(&self) -> Option<f64> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        let mid = (bid + ask) / 2.0;
        if mid > 0.0 {
            Some(((ask - bid) / mid) * 10_000.0)
        } else {
            None
        }
    }

    /// (bid depth - ask depth) / total depth, in [-1, 1]. Zero when empty.
    pub fn imbalance(&self) -> f64 {
        let bid_depth: f64 = self.bids.iter().map(|(_, q)| q).sum();
        let ask_depth: f64 = self.asks.iter().map(|(_, q)| q).sum();
        let total = bid_depth + ask_depth;
        if total > 0.0 {
            (bid_depth - ask_depth) / total
        } else {
            0.0
        }
    }

    /// Compact view for dashboards and logs.
    pub fn summary(&self) -> BookSummary {
        BookSummary {
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
            spread_bps: self.spread_bps(),
            imbalance: self.imbalance(),
            bid_levels: self.bids.len(),
            ask_levels: self.asks.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BookSummary {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub spread_bps: Option<f64>,
    pub imbalance: f64,
    pub bid_levels: usize,
    pub ask_levels: usize,
}

// ---------------------------------------------------------------------------
// Depth message parsing
// ---------------------------------------------------------------------------

/// Parse a Binance depth message into a fresh cache.
///
/// Accepts the diff-depth shape and the partial-depth shape, optionally
/// wrapped in a combined-stream envelope:
/// ```json
/// { "e": "depthUpdate", "b": [["37000.00", "1.5"]], "a": [["37001.00", "1.2"]] }
/// { "lastUpdateId": 12345, "bids": [...], "asks": [...] }
/// ```
///
/// Zero-quantity levels (removals in the diff stream) are dropped. A single
/// unparsable level rejects the whole message.
pub fn parse_depth_message(text: &str) -> Result<OrderBookCache, FeedError> {
    let root: serde_json::Value = serde_json::from_str(text)?;
    let data = root.get("data").unwrap_or(&root);

    let bids = data.get("b").or_else(|| data.get("bids"));
    let asks = data.get("a").or_else(|| data.get("asks"));
    if bids.is_none() && asks.is_none() {
        return Err(FeedError::Parse("depth message has no bids or asks".into()));
    }

    let mut bids = parse_levels(bids, "bids")?;
    let mut asks = parse_levels(asks, "asks")?;

    bids.sort_by(|a, b| b.0.total_cmp(&a.0));
    asks.sort_by(|a, b| a.0.total_cmp(&b.0));

    Ok(OrderBookCache { bids, asks })
}

fn parse_levels(
    side: Option<&serde_json::Value>,
    name: &str,
) -> Result<Vec<PriceLevel>, FeedError> {
    let Some(side) = side else {
        return Ok(Vec::new());
    };
    let levels = side
        .as_array()
        .ok_or_else(|| FeedError::Parse(format!("{name} is not an array")))?;

    let mut out = Vec::with_capacity(levels.len());
    for level in levels {
        let pair = level
            .as_array()
            .filter(|p| p.len() >= 2)
            .ok_or_else(|| FeedError::Parse(format!("malformed {name} level: {level}")))?;
        let price = parse_string_f64(&pair[0], name)?;
        let qty = parse_string_f64(&pair[1], name)?;
        if qty > 0.0 {
            out.push((price, qty));
        }
    }
    Ok(out)
}
