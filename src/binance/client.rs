// =============================================================================
// Binance Feed — REST klines snapshot + kline/depth WebSocket subscriptions
// =============================================================================
//
// Implements `FeedPort` against the public Binance spot API. The REST client
// carries a 10 s timeout, which is the bound the session relies on when it
// fetches the startup snapshot. Each push subscription is a spawned task that
// forwards raw text frames into the session's `MessageSink` and reconnects
// after 5 s whenever the socket drops. Unsubscribing aborts that task.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, instrument, warn};

use crate::binance::rate_limit::{RateLimitSnapshot, RateLimitTracker};
use crate::error::FeedError;
use crate::feed::{FeedPort, MessageSink, RawMessage, SubscriptionHandle};
use crate::market_data::kline::{parse_rest_row, CandleRow};
use crate::runtime_config::BinanceConfig;
use crate::types::Interval;

/// Request timeout for every REST call.
const REST_TIMEOUT: Duration = Duration::from_secs(10);
/// Pause before re-dialing a dropped stream.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Request weight of `GET /api/v3/klines` for limits up to 1000.
const KLINES_WEIGHT: u32 = 2;

/// Binance public market-data feed.
pub struct BinanceFeed {
    rest_url: String,
    ws_url: String,
    client: reqwest::Client,
    rate_limit: RateLimitTracker,
    next_id: AtomicU64,
    streams: Mutex<HashMap<SubscriptionHandle, JoinHandle<()>>>,
    reconnect_delay: Duration,
}

impl BinanceFeed {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new(config: &BinanceConfig) -> Result<Self, FeedError> {
        let mut default_headers = HeaderMap::new();
        if let Some(key) = config.api_key.as_deref() {
            if let Ok(val) = HeaderValue::from_str(key) {
                default_headers.insert("X-MBX-APIKEY", val);
            }
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(REST_TIMEOUT)
            .build()?;

        debug!(rest = config.rest_url(), ws = config.ws_url(), "BinanceFeed initialised");

        Ok(Self {
            rest_url: config.rest_url().to_string(),
            ws_url: config.ws_url().to_string(),
            client,
            rate_limit: RateLimitTracker::new(),
            next_id: AtomicU64::new(1),
            streams: Mutex::new(HashMap::new()),
            reconnect_delay: RECONNECT_DELAY,
        })
    }

    pub fn rate_limit(&self) -> RateLimitSnapshot {
        self.rate_limit.snapshot()
    }

    pub fn active_streams(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn kline_stream_url(&self, symbol: &str, interval: Interval) -> String {
        format!("{}/{}@kline_{}", self.ws_url, symbol.to_lowercase(), interval)
    }

    pub fn depth_stream_url(&self, symbol: &str) -> String {
        format!("{}/{}@depth", self.ws_url, symbol.to_lowercase())
    }

    fn spawn_stream(&self, url: String, label: &'static str, wrap: fn(String) -> RawMessage, sink: MessageSink) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let delay = self.reconnect_delay;
        info!(%handle, url = %url, stream = label, generation = sink.generation(), "subscribing");
        let task = tokio::spawn(stream_task(url, label, wrap, sink, delay));
        self.streams.lock().insert(handle, task);
        handle
    }
}

impl Drop for BinanceFeed {
    fn drop(&mut self) {
        for (_, task) in self.streams.lock().drain() {
            task.abort();
        }
    }
}

#[async_trait]
impl FeedPort for BinanceFeed {
    /// GET /api/v3/klines.
    #[instrument(skip(self), name = "binance::fetch_recent_candles")]
    async fn fetch_recent_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<CandleRow>, FeedError> {
        if !self.rate_limit.can_send_request(KLINES_WEIGHT) {
            return Err(FeedError::Transport("request weight limit reached".into()));
        }

        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.rest_url, symbol, interval, limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FeedError::Transport(format!("GET /api/v3/klines request failed: {e}")))?;

        self.rate_limit.update_from_headers(resp.headers());

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| FeedError::Transport(format!("failed to parse klines response: {e}")))?;

        if !status.is_success() {
            return Err(FeedError::Transport(format!(
                "Binance GET /api/v3/klines returned {status}: {body}"
            )));
        }

        let rows = parse_klines_body(&body)?;
        debug!(symbol, %interval, count = rows.len(), "klines fetched");
        Ok(rows)
    }

    async fn subscribe_candles(
        &self,
        symbol: &str,
        interval: Interval,
        sink: MessageSink,
    ) -> Result<SubscriptionHandle, FeedError> {
        let url = self.kline_stream_url(symbol, interval);
        Ok(self.spawn_stream(url, "kline", RawMessage::Candle, sink))
    }

    async fn subscribe_depth(&self, symbol: &str, sink: MessageSink) -> Result<SubscriptionHandle, FeedError> {
        let url = self.depth_stream_url(symbol);
        Ok(self.spawn_stream(url, "depth", RawMessage::Depth, sink))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), FeedError> {
        let task = self
            .streams
            .lock()
            .remove(&handle)
            .ok_or_else(|| FeedError::Transport(format!("unknown subscription {handle}")))?;
        task.abort();
        info!(%handle, "unsubscribed");
        Ok(())
    }
}

/// Decode the klines array-of-arrays body. Any malformed row fails the whole
/// snapshot, since a partial snapshot would leave gaps in history.
pub fn parse_klines_body(body: &serde_json::Value) -> Result<Vec<CandleRow>, FeedError> {
    let raw = body
        .as_array()
        .ok_or_else(|| FeedError::Transport("klines response is not an array".into()))?;

    raw.iter()
        .map(|entry| {
            parse_rest_row(entry).map_err(|e| FeedError::Transport(format!("malformed kline row: {e}")))
        })
        .collect()
}

// -----------------------------------------------------------------------------
// Stream tasks
// -----------------------------------------------------------------------------

enum StreamEnd {
    /// The session dropped its receiver; nothing left to deliver to.
    SinkClosed,
    /// The exchange closed the socket.
    Disconnected,
}

async fn stream_task(
    url: String,
    label: &'static str,
    wrap: fn(String) -> RawMessage,
    sink: MessageSink,
    delay: Duration,
) {
    loop {
        match run_stream(&url, label, wrap, &sink).await {
            Ok(StreamEnd::SinkClosed) => {
                info!(stream = label, "message sink closed — stream task exiting");
                return;
            }
            Ok(StreamEnd::Disconnected) => {
                warn!(stream = label, url = %url, "stream ended — reconnecting in 5s");
            }
            Err(e) => {
                error!(stream = label, url = %url, error = %e, "stream error — reconnecting in 5s");
            }
        }
        if sink.is_closed() {
            return;
        }
        tokio::time::sleep(delay).await;
    }
}

async fn run_stream(
    url: &str,
    label: &'static str,
    wrap: fn(String) -> RawMessage,
    sink: &MessageSink,
) -> Result<StreamEnd, FeedError> {
    let (ws_stream, _response) = connect_async(url).await?;
    info!(stream = label, url = %url, "WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                if !sink.send(wrap(text)) {
                    return Ok(StreamEnd::SinkClosed);
                }
            }
            // Ping / Pong / Binary / Close: tungstenite answers pings itself.
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => return Ok(StreamEnd::Disconnected),
        }
    }
}
