// =============================================================================
// Central Application State — presentation side of the analyzer
// =============================================================================
//
// Ties the store, the streaming session and the indicator engine together for
// the HTTP API and the WebSocket feed. A presenter task consumes the store's
// notification stream, keeps the latest indicator results and a bounded error
// log, and republishes every notification as JSON on a broadcast channel.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for all mutable shared collections.
// =============================================================================

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::indicators::{IndicatorEngine, IndicatorOutput, IndicatorSpec};
use crate::market_data::{BookSummary, MarketEvent, MarketStateStore, StreamingSession};
use crate::runtime_config::AppConfig;
use crate::types::{ConnectionStatus, Interval, MarketFrame, POPULAR_SYMBOLS};

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;
/// Buffered JSON events per WebSocket client before it starts lagging.
const BROADCAST_CAPACITY: usize = 256;

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the dashboard error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

pub struct AppState {
    /// Incremented on every notification the presenter handles.
    pub state_version: AtomicU64,

    pub store: Arc<MarketStateStore>,
    pub session: Arc<StreamingSession>,
    pub engine: IndicatorEngine,

    /// Expected bearer token for control routes; `None` disables them.
    pub admin_token: Option<String>,

    /// Loaded config; indicator settings and pair are refreshed on save.
    config: RwLock<AppConfig>,

    pub indicator_results: RwLock<BTreeMap<String, IndicatorOutput>>,
    pub recent_errors: RwLock<VecDeque<ErrorRecord>>,

    /// JSON-encoded notifications for WebSocket clients.
    pub events_tx: broadcast::Sender<String>,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<MarketStateStore>,
        session: Arc<StreamingSession>,
        engine: IndicatorEngine,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            state_version: AtomicU64::new(0),
            store,
            session,
            engine,
            admin_token: config.api.admin_token.clone(),
            config: RwLock::new(config),
            indicator_results: RwLock::new(BTreeMap::new()),
            recent_errors: RwLock::new(VecDeque::with_capacity(MAX_RECENT_ERRORS)),
            events_tx,
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Notifications ───────────────────────────────────────────────────

    /// Fold one store notification into the presentation state and
    /// republish it to WebSocket clients.
    pub fn record_event(&self, event: &MarketEvent) {
        match event {
            MarketEvent::IndicatorResult { name, result } => {
                self.indicator_results.write().insert(name.clone(), *result);
            }
            MarketEvent::SymbolIntervalChanged { symbol, interval } => {
                info!(symbol = %symbol, interval = %interval, "pair switched — clearing indicator results");
                self.indicator_results.write().clear();
            }
            MarketEvent::Error { message } => self.push_error(message.clone()),
            MarketEvent::ConnectionStatusChanged { connected } => {
                info!(connected, "connection status changed");
            }
            MarketEvent::DataUpdated { .. } => {}
        }
        self.increment_version();

        match serde_json::to_string(event) {
            // No receivers is fine: nobody is watching.
            Ok(json) => {
                let _ = self.events_tx.send(json);
            }
            Err(e) => warn!(error = %e, "failed to serialise market event"),
        }
    }

    /// Record an error message, evicting the oldest beyond the cap.
    pub fn push_error(&self, message: String) {
        let mut errors = self.recent_errors.write();
        errors.push_back(ErrorRecord {
            message,
            at: Utc::now().to_rfc3339(),
        });
        while errors.len() > MAX_RECENT_ERRORS {
            errors.pop_front();
        }
    }

    /// Drop results of indicators that are no longer enabled.
    pub fn retain_indicator_results(&self, spec: &IndicatorSpec) {
        let enabled: Vec<&'static str> = spec.enabled().iter().map(|i| i.name().as_str()).collect();
        self.indicator_results
            .write()
            .retain(|name, _| enabled.contains(&name.as_str()));
    }

    /// Config as it should be written to disk: current indicator settings
    /// and the pair that is currently selected.
    pub fn config_for_save(&self) -> AppConfig {
        let mut config = self.config.read().clone();
        config.indicators = self.engine.spec().read().clone();
        let (symbol, interval) = self.store.symbol_interval();
        config.chart.default_symbol = symbol;
        config.chart.default_interval = interval;
        config
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Payload for `GET /api/v1/state` and the first WebSocket message.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let (symbol, interval) = self.store.symbol_interval();
        let status = self.session.status();
        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            status,
            connected: self.store.is_connected(),
            symbol,
            interval,
            latest_frame: self.store.latest_frame(),
            order_book: self.store.order_book().summary(),
            history_len: self.store.history_len(),
            capacity: self.store.capacity(),
            indicators: self.indicator_results.read().clone(),
            indicator_settings: self.engine.spec().read().clone(),
            recent_errors: self.recent_errors.read().iter().cloned().collect(),
            intervals: Interval::ALL.iter().map(|iv| iv.as_str()).collect(),
            popular_symbols: POPULAR_SYMBOLS,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub status: ConnectionStatus,
    pub connected: bool,
    pub symbol: String,
    pub interval: Interval,
    pub latest_frame: Option<Arc<MarketFrame>>,
    pub order_book: BookSummary,
    pub history_len: usize,
    pub capacity: usize,
    pub indicators: BTreeMap<String, IndicatorOutput>,
    pub indicator_settings: IndicatorSpec,
    pub recent_errors: Vec<ErrorRecord>,
    pub intervals: Vec<&'static str>,
    pub popular_symbols: &'static [&'static str],
}

// =============================================================================
// Presenter task
// =============================================================================

/// Subscribe to the store and feed every notification into `state`.
pub fn spawn_presenter(state: Arc<AppState>) -> JoinHandle<()> {
    let mut rx = state.store.subscribe();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            state.record_event(&event);
        }
        debug!("presenter stopped — notification stream closed");
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::FeedError;
    use crate::feed::{FeedPort, MessageSink, SubscriptionHandle};
    use crate::indicators::settings::{IndicatorName, IndicatorUpdate};
    use crate::market_data::kline::CandleRow;

    /// Feed with a fixed snapshot and no live traffic.
    pub(crate) struct StaticFeed {
        pub rows: Vec<CandleRow>,
    }

    #[async_trait]
    impl FeedPort for StaticFeed {
        async fn fetch_recent_candles(&self, _: &str, _: Interval, _: u32) -> Result<Vec<CandleRow>, FeedError> {
            if self.rows.is_empty() {
                return Err(FeedError::Transport("no snapshot".into()));
            }
            Ok(self.rows.clone())
        }

        async fn subscribe_candles(&self, _: &str, _: Interval, _: MessageSink) -> Result<SubscriptionHandle, FeedError> {
            Ok(SubscriptionHandle(1))
        }

        async fn subscribe_depth(&self, _: &str, _: MessageSink) -> Result<SubscriptionHandle, FeedError> {
            Ok(SubscriptionHandle(2))
        }

        async fn unsubscribe(&self, _: SubscriptionHandle) -> Result<(), FeedError> {
            Ok(())
        }
    }

    pub(crate) fn rows(closes: &[f64]) -> Vec<CandleRow> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| CandleRow {
                timestamp: (i as i64 + 1) * 60_000,
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1.0,
            })
            .collect()
    }

    pub(crate) fn test_state(rows: Vec<CandleRow>, admin_token: Option<&str>) -> Arc<AppState> {
        let mut config = AppConfig::default();
        config.api.admin_token = admin_token.map(str::to_string);
        let store = Arc::new(MarketStateStore::new(100, "BTCUSDT", Interval::OneMinute));
        let session = Arc::new(StreamingSession::new(Arc::new(StaticFeed { rows }), Arc::clone(&store), 500));
        let engine = IndicatorEngine::new(Arc::clone(&store), Arc::new(RwLock::new(config.indicators.clone())));
        Arc::new(AppState::new(config, store, session, engine))
    }

    #[tokio::test]
    async fn events_update_results_and_errors() {
        let state = test_state(Vec::new(), None);
        let mut ws_rx = state.events_tx.subscribe();

        state.record_event(&MarketEvent::IndicatorResult {
            name: "sma_fast".into(),
            result: IndicatorOutput::Average { period: 9, value: 1.0 },
        });
        state.record_event(&MarketEvent::Error { message: "boom".into() });

        assert_eq!(state.indicator_results.read().len(), 1);
        assert_eq!(state.recent_errors.read().back().unwrap().message, "boom");
        assert_eq!(state.current_state_version(), 2);

        let first: serde_json::Value = serde_json::from_str(&ws_rx.recv().await.unwrap()).unwrap();
        assert_eq!(first["event"], "indicator_result");
        assert_eq!(first["result"]["value"], 1.0);
        let second: serde_json::Value = serde_json::from_str(&ws_rx.recv().await.unwrap()).unwrap();
        assert_eq!(second["event"], "error");
    }

    #[tokio::test]
    async fn pair_switch_voids_earlier_results_only() {
        let state = test_state(Vec::new(), None);
        let sma = |value| MarketEvent::IndicatorResult {
            name: "sma_fast".into(),
            result: IndicatorOutput::Average { period: 9, value },
        };

        state.record_event(&sma(1.0));
        state.record_event(&MarketEvent::SymbolIntervalChanged {
            symbol: "ETHUSDT".into(),
            interval: Interval::FiveMinutes,
        });
        assert!(state.indicator_results.read().is_empty());

        state.record_event(&sma(2.0));
        assert_eq!(
            state.indicator_results.read().get("sma_fast"),
            Some(&IndicatorOutput::Average { period: 9, value: 2.0 })
        );
    }

    #[tokio::test]
    async fn stale_results_never_survive_a_pair_switch() {
        let state = test_state(rows(&[1.0, 2.0, 3.0]), None);
        state
            .engine
            .spec()
            .write()
            .apply(&IndicatorUpdate::toggle(IndicatorName::SmaFast, true))
            .unwrap();
        state.engine.spec().write().sma_fast.params.period = 2;
        let presenter = spawn_presenter(Arc::clone(&state));
        state.session.start("BTCUSDT", Interval::OneMinute).await.unwrap();

        // Computed on the BTCUSDT history, published only after the switch.
        let (epoch, history) = state.store.history_at_epoch();
        let stale = state.engine.evaluate(&history);
        assert_eq!(stale.len(), 1);
        assert_eq!(state.engine.recompute(), 1);

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
        while !state.indicator_results.read().contains_key("sma_fast") {
            assert!(tokio::time::Instant::now() < deadline, "BTCUSDT result never arrived");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        state.store.set_symbol_interval("ETHUSDT", Interval::OneMinute);
        for (name, output) in stale {
            assert!(!state.store.publish_indicator(epoch, name.as_str(), output));
        }
        assert_eq!(state.engine.recompute(), 0);

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
        while !state.indicator_results.read().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "old-pair result was not cleared");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(state.indicator_results.read().is_empty());
        presenter.abort();
    }

    #[tokio::test]
    async fn error_log_is_bounded() {
        let state = test_state(Vec::new(), None);
        for i in 0..(MAX_RECENT_ERRORS + 10) {
            state.push_error(format!("e{i}"));
        }
        let errors = state.recent_errors.read();
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(errors.front().unwrap().message, "e10");
    }

    #[tokio::test]
    async fn presenter_follows_session_start() {
        let state = test_state(rows(&[1.0, 2.0, 3.0]), None);
        state
            .engine
            .spec()
            .write()
            .apply(&IndicatorUpdate::toggle(IndicatorName::SmaFast, true))
            .unwrap();
        state.engine.spec().write().sma_fast.params.period = 2;

        let presenter = spawn_presenter(Arc::clone(&state));
        let engine = state.engine.clone().spawn();
        state.session.start("BTCUSDT", Interval::OneMinute).await.unwrap();

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
        loop {
            let done = state.indicator_results.read().get("sma_fast").copied()
                == Some(IndicatorOutput::Average { period: 2, value: 2.5 });
            if done {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "indicator result never arrived");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let snapshot = state.build_snapshot();
        assert_eq!(snapshot.status, ConnectionStatus::Streaming);
        assert!(snapshot.connected);
        assert_eq!(snapshot.history_len, 3);
        assert_eq!(snapshot.latest_frame.as_ref().unwrap().timestamp, 180_000);

        presenter.abort();
        engine.abort();
    }

    #[tokio::test]
    async fn retain_drops_disabled_results() {
        let state = test_state(Vec::new(), None);
        state.indicator_results.write().insert(
            "bollinger_bands".into(),
            IndicatorOutput::Bands { upper: 1.0, middle: 1.0, lower: 1.0 },
        );
        state.retain_indicator_results(&IndicatorSpec::default());
        assert!(state.indicator_results.read().is_empty());
    }

    #[tokio::test]
    async fn config_for_save_captures_live_settings() {
        let state = test_state(Vec::new(), None);
        state
            .engine
            .spec()
            .write()
            .apply(&IndicatorUpdate::toggle(IndicatorName::KeltnerChannels, true))
            .unwrap();
        state.store.set_symbol_interval("ethusdt", Interval::OneHour);

        let cfg = state.config_for_save();
        assert!(cfg.indicators.keltner_channels.enabled);
        assert_eq!(cfg.chart.default_symbol, "ETHUSDT");
        assert_eq!(cfg.chart.default_interval, Interval::OneHour);
    }
}
