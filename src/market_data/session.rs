// =============================================================================
// Streaming Session Controller
// =============================================================================
//
// Owns the subscription handles and the active symbol/interval pair. Push
// messages from every subscription arrive tagged with the generation that
// opened them on one channel, drained by a single routing task. The router
// only touches the store while holding the generation gate and only when the
// message's generation is the active one, so once `stop()` has cleared the
// gate no message from a superseded subscription can reach the store.
//
// Lifecycle:
//   Disconnected → Connecting → Streaming → Disconnected
//   Disconnected → Connecting → Errored   → Disconnected   (snapshot failure)
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::FeedError;
use crate::feed::{FeedPort, MessageSink, RawMessage, SubscriptionHandle, TaggedMessage};
use crate::market_data::kline::{parse_kline_message, CandleRow};
use crate::market_data::order_book::parse_depth_message;
use crate::market_data::store::MarketStateStore;
use crate::types::{canonical_symbol, ConnectionStatus, Interval};

/// Upper bound on a single unsubscribe call during `stop()`.
const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Active generation, or `None` while no session is streaming.
type Gate = Arc<Mutex<Option<u64>>>;

struct SessionInner {
    generation: u64,
    symbol: String,
    interval: Interval,
    candle_sub: Option<SubscriptionHandle>,
    depth_sub: Option<SubscriptionHandle>,
}

pub struct StreamingSession {
    feed: Arc<dyn FeedPort>,
    store: Arc<MarketStateStore>,
    snapshot_limit: u32,
    gate: Gate,
    status: Mutex<ConnectionStatus>,
    inner: tokio::sync::Mutex<SessionInner>,
    tx: mpsc::UnboundedSender<TaggedMessage>,
    router: JoinHandle<()>,
}

impl StreamingSession {
    /// Build a session and spawn its routing task. Must be called from
    /// within a tokio runtime.
    pub fn new(feed: Arc<dyn FeedPort>, store: Arc<MarketStateStore>, snapshot_limit: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let gate: Gate = Arc::new(Mutex::new(None));
        let router = tokio::spawn(route_messages(rx, Arc::clone(&store), Arc::clone(&gate)));
        let (symbol, interval) = store.symbol_interval();

        Self {
            feed,
            store,
            snapshot_limit,
            gate,
            status: Mutex::new(ConnectionStatus::Disconnected),
            inner: tokio::sync::Mutex::new(SessionInner {
                generation: 0,
                symbol,
                interval,
                candle_sub: None,
                depth_sub: None,
            }),
            tx,
            router,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock()
    }

    /// Generation currently allowed through the gate.
    pub fn active_generation(&self) -> Option<u64> {
        *self.gate.lock()
    }

    /// Symbol/interval of the most recent `start`.
    pub async fn pair(&self) -> (String, Interval) {
        let inner = self.inner.lock().await;
        (inner.symbol.clone(), inner.interval)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Stop any running session, load the REST snapshot and open both push
    /// subscriptions. A snapshot failure leaves the session `Errored` with no
    /// subscriptions and is returned to the caller; nothing is retried here.
    pub async fn start(&self, symbol: &str, interval: Interval) -> Result<(), FeedError> {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await;
        self.start_locked(&mut inner, symbol, interval).await
    }

    /// Close both subscriptions. Always ends `Disconnected`; unsubscribe
    /// failures are logged and otherwise ignored.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await;
    }

    /// `stop` then `start`, under one exclusive hold of the session state.
    pub async fn change_symbol_interval(&self, symbol: &str, interval: Interval) -> Result<(), FeedError> {
        let mut inner = self.inner.lock().await;
        info!(
            from = %format!("{}@{}", inner.symbol, inner.interval),
            to = %format!("{}@{}", canonical_symbol(symbol), interval),
            "changing symbol/interval"
        );
        self.stop_locked(&mut inner).await;
        self.start_locked(&mut inner, symbol, interval).await
    }

    async fn start_locked(&self, inner: &mut SessionInner, symbol: &str, interval: Interval) -> Result<(), FeedError> {
        let symbol = canonical_symbol(symbol);
        if symbol.is_empty() {
            return Err(FeedError::Parse("symbol must not be empty".into()));
        }

        inner.generation += 1;
        let generation = inner.generation;
        inner.symbol = symbol.clone();
        inner.interval = interval;

        self.set_status(ConnectionStatus::Connecting);
        self.store.set_symbol_interval(&symbol, interval);

        let rows = match self
            .feed
            .fetch_recent_candles(&symbol, interval, self.snapshot_limit)
            .await
        {
            Ok(rows) => rows,
            Err(e) => return Err(self.fail(&symbol, interval, "snapshot fetch failed", e)),
        };
        self.load_snapshot(&symbol, interval, rows);

        *self.gate.lock() = Some(generation);
        let sink = MessageSink::new(generation, self.tx.clone());

        match self.feed.subscribe_candles(&symbol, interval, sink.clone()).await {
            Ok(handle) => inner.candle_sub = Some(handle),
            Err(e) => {
                *self.gate.lock() = None;
                return Err(self.fail(&symbol, interval, "candle subscription failed", e));
            }
        }
        match self.feed.subscribe_depth(&symbol, sink).await {
            Ok(handle) => inner.depth_sub = Some(handle),
            Err(e) => {
                *self.gate.lock() = None;
                self.release(inner).await;
                return Err(self.fail(&symbol, interval, "depth subscription failed", e));
            }
        }

        self.set_status(ConnectionStatus::Streaming);
        self.store.set_connection_status(true);
        info!(symbol = %symbol, %interval, generation, "session streaming");
        Ok(())
    }

    async fn stop_locked(&self, inner: &mut SessionInner) {
        *self.gate.lock() = None;
        self.release(inner).await;
        self.set_status(ConnectionStatus::Disconnected);
        self.store.set_connection_status(false);
    }

    /// Unsubscribe whatever is open. Never fails.
    async fn release(&self, inner: &mut SessionInner) {
        for handle in [inner.candle_sub.take(), inner.depth_sub.take()].into_iter().flatten() {
            match tokio::time::timeout(UNSUBSCRIBE_TIMEOUT, self.feed.unsubscribe(handle)).await {
                Ok(Ok(())) => debug!(%handle, "subscription closed"),
                Ok(Err(e)) => warn!(%handle, error = %e, "unsubscribe failed — continuing"),
                Err(_) => warn!(%handle, "unsubscribe timed out — continuing"),
            }
        }
    }

    /// Feed snapshot rows into the store in ascending order. Rows older than
    /// the current tail (a restart of the same pair) are skipped.
    fn load_snapshot(&self, symbol: &str, interval: Interval, mut rows: Vec<CandleRow>) {
        rows.sort_by_key(|r| r.timestamp);
        let total = rows.len();
        let mut skipped = 0usize;
        for row in rows {
            let frame = row.into_frame(symbol, interval, &self.store.order_book());
            match self.store.apply_frame(frame) {
                Ok(_) => {}
                Err(FeedError::OrderingViolation { .. }) => skipped += 1,
                Err(e) => warn!(error = %e, "snapshot row rejected"),
            }
        }
        info!(symbol = %symbol, %interval, rows = total, skipped, "snapshot loaded");
    }

    fn fail(&self, symbol: &str, interval: Interval, what: &str, e: FeedError) -> FeedError {
        self.set_status(ConnectionStatus::Errored);
        error!(symbol = %symbol, %interval, error = %e, "{what}");
        self.store.emit_error(format!("{what} for {symbol}@{interval}: {e}"));
        e
    }

    fn set_status(&self, next: ConnectionStatus) {
        let mut status = self.status.lock();
        let prev = *status;
        if prev != next {
            info!(from = %prev, to = %next, "session status");
            *status = next;
        }
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        self.router.abort();
    }
}

// -----------------------------------------------------------------------------
// Routing
// -----------------------------------------------------------------------------

async fn route_messages(mut rx: mpsc::UnboundedReceiver<TaggedMessage>, store: Arc<MarketStateStore>, gate: Gate) {
    while let Some(msg) = rx.recv().await {
        route_message(&store, &gate, msg);
    }
    debug!("session router stopped");
}

/// Parse one message outside any lock, then apply it under the gate if its
/// generation is still active. Bad messages are logged and dropped.
fn route_message(store: &MarketStateStore, gate: &Mutex<Option<u64>>, msg: TaggedMessage) {
    let TaggedMessage { generation, message } = msg;
    match message {
        RawMessage::Candle(text) => {
            let candle = match parse_kline_message(&text) {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "dropping malformed kline message");
                    return;
                }
            };
            if !candle.is_final {
                return;
            }

            let active = gate.lock();
            if *active != Some(generation) {
                debug!(generation, active = ?*active, "dropping stale kline");
                return;
            }
            let frame = candle.into_frame(&store.order_book());
            if let Err(e) = store.apply_frame(frame) {
                warn!(error = %e, "kline rejected by store");
            }
        }
        RawMessage::Depth(text) => {
            let book = match parse_depth_message(&text) {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "dropping malformed depth message");
                    return;
                }
            };

            let active = gate.lock();
            if *active != Some(generation) {
                debug!(generation, active = ?*active, "dropping stale depth update");
                return;
            }
            store.replace_order_book(book);
        }
    }
}
