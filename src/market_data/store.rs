// =============================================================================
// Market State Store — single mutation point for history and the order book
// =============================================================================
//
// Every mutation happens inside one parking_lot::Mutex critical section. The
// notification for a mutation is queued onto each subscriber's unbounded
// channel before the lock is released, so subscribers observe events in the
// exact order the mutations were applied. Queuing never blocks: a slow
// subscriber only grows its own queue, and a dropped receiver is pruned.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::indicators::IndicatorOutput;
use crate::market_data::order_book::OrderBookCache;
use crate::types::{canonical_symbol, CandleRecord, Interval, MarketFrame};

/// Default number of candles retained in history.
pub const DEFAULT_CAPACITY: usize = 1000;

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// State-change notification fanned out to every subscriber.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MarketEvent {
    DataUpdated { frame: Arc<MarketFrame> },
    /// The store switched pairs; everything derived from the old pair is void.
    SymbolIntervalChanged { symbol: String, interval: Interval },
    ConnectionStatusChanged { connected: bool },
    Error { message: String },
    IndicatorResult { name: String, result: IndicatorOutput },
}

/// How `apply_frame` merged a frame into history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ApplyOutcome {
    /// Same timestamp as the tail: the tail's OHLCV was overwritten.
    Replaced,
    /// Newer timestamp: pushed to the back, possibly evicting the oldest.
    Appended { evicted: Option<CandleRecord> },
}

// ---------------------------------------------------------------------------
// MarketStateStore
// ---------------------------------------------------------------------------

struct StoreInner {
    symbol: String,
    interval: Interval,
    history: VecDeque<CandleRecord>,
    order_book: OrderBookCache,
    latest_frame: Option<Arc<MarketFrame>>,
    connected: bool,
    /// Bumped on every pair switch.
    epoch: u64,
    subscribers: Vec<mpsc::UnboundedSender<MarketEvent>>,
}

impl StoreInner {
    fn notify(&mut self, event: MarketEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Bounded, timestamp-ordered market state for one symbol/interval pair.
pub struct MarketStateStore {
    inner: Mutex<StoreInner>,
    capacity: usize,
}

impl MarketStateStore {
    /// Create an empty store retaining at most `capacity` candles (min 1).
    pub fn new(capacity: usize, symbol: &str, interval: Interval) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(StoreInner {
                symbol: canonical_symbol(symbol),
                interval,
                history: VecDeque::with_capacity(capacity + 1),
                order_book: OrderBookCache::default(),
                latest_frame: None,
                connected: false,
                epoch: 0,
                subscribers: Vec::new(),
            }),
            capacity,
        }
    }

    /// Register a new subscriber. Events emitted after this call are
    /// delivered in mutation order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MarketEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().subscribers.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Merge `frame` into history by comparing against the tail only.
    ///
    /// * equal timestamp → replace the tail in place
    /// * greater → append, evicting the oldest record beyond capacity
    /// * smaller → `OrderingViolation`; history is untouched
    ///
    /// `latest_frame` is updated in all three cases. A `DataUpdated`
    /// notification is emitted only when history was actually changed.
    pub fn apply_frame(&self, frame: MarketFrame) -> Result<ApplyOutcome, FeedError> {
        let frame = Arc::new(frame);
        let mut inner = self.inner.lock();
        inner.latest_frame = Some(Arc::clone(&frame));

        let record = frame.to_record();
        let tail = inner.history.back().map(|c| c.timestamp);

        let outcome = match tail {
            Some(tail) if frame.timestamp < tail => {
                return Err(FeedError::OrderingViolation {
                    timestamp: frame.timestamp,
                    tail,
                });
            }
            Some(tail) if frame.timestamp == tail => {
                if let Some(last) = inner.history.back_mut() {
                    *last = record;
                }
                ApplyOutcome::Replaced
            }
            _ => {
                inner.history.push_back(record);
                let evicted = if inner.history.len() > self.capacity {
                    inner.history.pop_front()
                } else {
                    None
                };
                ApplyOutcome::Appended { evicted }
            }
        };

        debug!(
            symbol = %frame.symbol,
            timestamp = frame.timestamp,
            close = frame.close,
            outcome = ?outcome,
            "frame applied"
        );
        inner.notify(MarketEvent::DataUpdated { frame });
        Ok(outcome)
    }

    /// Overwrite the cached order book. The next constructed frame picks it
    /// up; history is never touched.
    pub fn replace_order_book(&self, book: OrderBookCache) {
        self.inner.lock().order_book = book;
    }

    /// Switch to a new symbol/interval pair. History, the order book and the
    /// latest frame are cleared only when either value differs, followed by a
    /// `SymbolIntervalChanged` notification. Returns whether it changed.
    pub fn set_symbol_interval(&self, symbol: &str, interval: Interval) -> bool {
        let symbol = canonical_symbol(symbol);
        let mut inner = self.inner.lock();
        if inner.symbol == symbol && inner.interval == interval {
            return false;
        }
        info!(
            from = %format!("{}@{}", inner.symbol, inner.interval),
            to = %format!("{symbol}@{interval}"),
            "symbol/interval changed — clearing history"
        );
        inner.symbol = symbol.clone();
        inner.interval = interval;
        inner.history.clear();
        inner.order_book = OrderBookCache::default();
        inner.latest_frame = None;
        inner.epoch += 1;
        inner.notify(MarketEvent::SymbolIntervalChanged { symbol, interval });
        true
    }

    /// Record the connection flag; no notification when unchanged.
    pub fn set_connection_status(&self, connected: bool) {
        let mut inner = self.inner.lock();
        if inner.connected == connected {
            return;
        }
        inner.connected = connected;
        inner.notify(MarketEvent::ConnectionStatusChanged { connected });
    }

    pub fn emit_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(error = %message, "market state error");
        self.inner.lock().notify(MarketEvent::Error { message });
    }

    /// Fan out an indicator value computed from the history taken at
    /// `epoch`. Results for a pair that has since been replaced are dropped;
    /// returns whether the value was published.
    pub fn publish_indicator(&self, epoch: u64, name: &str, result: IndicatorOutput) -> bool {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            debug!(indicator = name, "stale indicator result dropped");
            return false;
        }
        inner.notify(MarketEvent::IndicatorResult {
            name: name.to_string(),
            result,
        });
        true
    }

    // -------------------------------------------------------------------------
    // Reads: every accessor returns an owned, point-in-time copy
    // -------------------------------------------------------------------------

    /// Snapshot of the history, oldest first.
    pub fn history(&self) -> Vec<CandleRecord> {
        self.inner.lock().history.iter().copied().collect()
    }

    /// History together with the pair epoch it belongs to.
    pub fn history_at_epoch(&self) -> (u64, Vec<CandleRecord>) {
        let inner = self.inner.lock();
        (inner.epoch, inner.history.iter().copied().collect())
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().history.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest_frame(&self) -> Option<Arc<MarketFrame>> {
        self.inner.lock().latest_frame.clone()
    }

    pub fn order_book(&self) -> OrderBookCache {
        self.inner.lock().order_book.clone()
    }

    pub fn symbol_interval(&self) -> (String, Interval) {
        let inner = self.inner.lock();
        (inner.symbol.clone(), inner.interval)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts: i64, o: f64, h: f64, l: f64, c: f64, v: f64) -> MarketFrame {
        MarketFrame {
            timestamp: ts,
            symbol: "BTCUSDT".into(),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
            interval: Interval::OneMinute,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    fn flat(ts: i64, close: f64) -> MarketFrame {
        frame(ts, close, close + 1.0, close - 1.0, close, 1.0)
    }

    fn store(capacity: usize) -> MarketStateStore {
        MarketStateStore::new(capacity, "BTCUSDT", Interval::OneMinute)
    }

    fn timestamps(store: &MarketStateStore) -> Vec<i64> {
        store.history().iter().map(|c| c.timestamp).collect()
    }

    #[test]
    fn increasing_frames_fill_up_to_capacity() {
        let s = store(5);
        for i in 0..12 {
            s.apply_frame(flat(i * 60_000, 100.0 + i as f64)).unwrap();
            assert_eq!(s.history_len(), ((i + 1) as usize).min(5));
        }
        let ts = timestamps(&s);
        assert!(ts.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ts.first(), Some(&(7 * 60_000)));
    }

    #[test]
    fn equal_timestamp_replaces_tail() {
        let s = store(10);
        s.apply_frame(flat(1, 10.0)).unwrap();
        s.apply_frame(flat(2, 30.0)).unwrap();
        let outcome = s.apply_frame(frame(2, 31.0, 35.0, 29.0, 33.0, 7.0)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Replaced);
        assert_eq!(s.history_len(), 2);
        let tail = *s.history().last().unwrap();
        assert_eq!(tail.close, 33.0);
        assert_eq!(tail.high, 35.0);
        assert_eq!(tail.volume, 7.0);
    }

    #[test]
    fn older_frame_is_rejected_without_mutation() {
        let s = store(10);
        s.apply_frame(flat(100, 1.0)).unwrap();
        s.apply_frame(flat(200, 2.0)).unwrap();
        let before = s.history();

        let err = s.apply_frame(flat(150, 9.0)).unwrap_err();
        assert!(matches!(err, FeedError::OrderingViolation { timestamp: 150, tail: 200 }));
        assert_eq!(s.history(), before);
        // The freshest tick is still recorded.
        assert_eq!(s.latest_frame().unwrap().timestamp, 150);
    }

    #[test]
    fn eviction_is_fifo_and_length_stays_at_capacity() {
        let s = store(2);
        s.apply_frame(flat(1, 10.0)).unwrap();
        s.apply_frame(flat(1, 20.0)).unwrap();
        assert_eq!(s.history_len(), 1);
        s.apply_frame(flat(2, 30.0)).unwrap();
        let outcome = s.apply_frame(flat(3, 40.0)).unwrap();
        match outcome {
            ApplyOutcome::Appended { evicted: Some(old) } => assert_eq!(old.timestamp, 1),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(timestamps(&s), vec![2, 3]);
        s.apply_frame(flat(4, 50.0)).unwrap();
        assert_eq!(timestamps(&s), vec![3, 4]);
    }

    #[test]
    fn snapshot_scenario_replace_then_append() {
        let s = store(1000);
        s.apply_frame(frame(100, 1.0, 2.0, 0.5, 1.5, 10.0)).unwrap();
        s.apply_frame(frame(200, 1.5, 2.5, 1.0, 2.0, 20.0)).unwrap();
        s.apply_frame(frame(300, 2.0, 3.0, 1.5, 2.5, 30.0)).unwrap();
        assert_eq!(timestamps(&s), vec![100, 200, 300]);

        s.apply_frame(frame(300, 2.0, 3.2, 1.5, 3.1, 42.0)).unwrap();
        assert_eq!(s.history_len(), 3);
        assert_eq!(s.history()[2].close, 3.1);

        s.apply_frame(frame(400, 3.1, 3.5, 3.0, 3.4, 5.0)).unwrap();
        assert_eq!(timestamps(&s), vec![100, 200, 300, 400]);
    }

    #[test]
    fn history_snapshot_is_detached() {
        let s = store(10);
        s.apply_frame(flat(1, 1.0)).unwrap();
        let snap = s.history();
        s.apply_frame(flat(2, 2.0)).unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(s.history_len(), 2);
    }

    #[test]
    fn symbol_change_clears_history_and_book() {
        let s = store(10);
        s.apply_frame(flat(1, 1.0)).unwrap();
        s.replace_order_book(OrderBookCache::new(vec![(1.0, 1.0)], vec![]));

        assert!(!s.set_symbol_interval("btcusdt", Interval::OneMinute));
        assert_eq!(s.history_len(), 1);

        assert!(s.set_symbol_interval("ETHUSDT", Interval::OneMinute));
        assert_eq!(s.history_len(), 0);
        assert!(s.order_book().is_empty());
        assert!(s.latest_frame().is_none());

        assert!(s.set_symbol_interval("ETHUSDT", Interval::FiveMinutes));
        assert_eq!(s.symbol_interval(), ("ETHUSDT".to_string(), Interval::FiveMinutes));
    }

    #[test]
    fn pair_switch_is_announced_once() {
        let s = store(10);
        let mut rx = s.subscribe();
        s.set_symbol_interval("BTCUSDT", Interval::OneMinute);
        assert!(rx.try_recv().is_err());

        s.set_symbol_interval("ethusdt", Interval::OneHour);
        match rx.try_recv().unwrap() {
            MarketEvent::SymbolIntervalChanged { symbol, interval } => {
                assert_eq!(symbol, "ETHUSDT");
                assert_eq!(interval, Interval::OneHour);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn indicator_results_from_old_pair_are_dropped() {
        let s = store(10);
        s.apply_frame(flat(1, 1.0)).unwrap();
        let (epoch, history) = s.history_at_epoch();
        assert_eq!(history.len(), 1);
        let mut rx = s.subscribe();

        s.set_symbol_interval("ETHUSDT", Interval::OneMinute);
        let value = IndicatorOutput::Average { period: 1, value: 1.0 };
        assert!(!s.publish_indicator(epoch, "sma_fast", value));

        let (current, _) = s.history_at_epoch();
        assert!(s.publish_indicator(current, "sma_fast", value));

        assert!(matches!(rx.try_recv().unwrap(), MarketEvent::SymbolIntervalChanged { .. }));
        assert!(matches!(rx.try_recv().unwrap(), MarketEvent::IndicatorResult { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn notifications_follow_mutation_order() {
        let s = store(10);
        let mut rx = s.subscribe();
        s.apply_frame(flat(1, 1.0)).unwrap();
        s.set_connection_status(true);
        s.apply_frame(flat(2, 2.0)).unwrap();
        s.emit_error("boom");

        match rx.try_recv().unwrap() {
            MarketEvent::DataUpdated { frame } => assert_eq!(frame.timestamp, 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            MarketEvent::ConnectionStatusChanged { connected: true }
        ));
        match rx.try_recv().unwrap() {
            MarketEvent::DataUpdated { frame } => assert_eq!(frame.timestamp, 2),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(rx.try_recv().unwrap(), MarketEvent::Error { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn connection_status_is_deduplicated() {
        let s = store(10);
        let mut rx = s.subscribe();
        s.set_connection_status(false);
        s.set_connection_status(true);
        s.set_connection_status(true);
        s.set_connection_status(false);
        let mut seen = Vec::new();
        while let Ok(MarketEvent::ConnectionStatusChanged { connected }) = rx.try_recv() {
            seen.push(connected);
        }
        assert_eq!(seen, vec![true, false]);
    }

    #[test]
    fn rejected_frame_is_not_broadcast() {
        let s = store(10);
        s.apply_frame(flat(5, 1.0)).unwrap();
        let mut rx = s.subscribe();
        let _ = s.apply_frame(flat(4, 1.0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let s = store(10);
        let rx = s.subscribe();
        let _keep = s.subscribe();
        drop(rx);
        s.apply_frame(flat(1, 1.0)).unwrap();
        assert_eq!(s.subscriber_count(), 1);
    }

    #[test]
    fn concurrent_writers_keep_history_sorted() {
        let s = Arc::new(store(10_000));
        let handles: Vec<_> = (0..4)
            .map(|w| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        // Writers race; late arrivals are rejected, never interleaved.
                        let _ = s.apply_frame(flat(i * 4 + w, 1.0));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let ts = timestamps(&s);
        assert!(!ts.is_empty());
        assert!(ts.windows(2).all(|w| w[0] < w[1]));
    }
}
