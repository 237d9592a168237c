// =============================================================================
// Crypto Analyzer — Main Entry Point
// =============================================================================
//
// Streams one Binance symbol/interval pair into the market state store,
// recomputes indicators on every applied candle, persists candles to SQLite
// and serves the state over HTTP + WebSocket until Ctrl+C.
// =============================================================================

use std::sync::Arc;

use anyhow::Context;
use parking_lot::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crypto_analyzer::app_state::{spawn_presenter, AppState};
use crypto_analyzer::binance::BinanceFeed;
use crypto_analyzer::feed::FeedPort;
use crypto_analyzer::indicators::IndicatorEngine;
use crypto_analyzer::market_data::{MarketStateStore, StreamingSession};
use crypto_analyzer::persistence::{CandleRepository, PersistenceSink};
use crypto_analyzer::runtime_config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Crypto Analyzer starting up");

    let config_path = AppConfig::path_from_env();
    let mut config = AppConfig::load_or_default(&config_path);
    config.apply_env().context("invalid environment override")?;

    let symbol = config.chart.default_symbol.clone();
    let interval = config.chart.default_interval;
    info!(
        symbol = %symbol,
        interval = %interval,
        max_candles = config.chart.max_candles,
        testnet = config.binance.testnet,
        "configuration resolved"
    );

    // ── 2. Store, feed, session ──────────────────────────────────────────
    let store = Arc::new(MarketStateStore::new(config.chart.max_candles, &symbol, interval));
    let feed: Arc<dyn FeedPort> =
        Arc::new(BinanceFeed::new(&config.binance).context("failed to build Binance client")?);
    let session = Arc::new(StreamingSession::new(
        feed,
        Arc::clone(&store),
        config.chart.snapshot_limit,
    ));

    // ── 3. Subscribers: indicators, persistence, presentation ────────────
    let spec = Arc::new(RwLock::new(config.indicators.clone()));
    let engine = IndicatorEngine::new(Arc::clone(&store), spec);
    engine.clone().spawn();

    match CandleRepository::open(&config.database.db_path) {
        Ok(repo) => {
            PersistenceSink::new(Arc::new(repo)).spawn(&store);
        }
        Err(e) => error!(error = %e, "candle database unavailable — persistence disabled"),
    }

    let bind_addr = config.api.bind_addr.clone();
    if config.api.admin_token.is_none() {
        warn!("ANALYZER_ADMIN_TOKEN not set — control routes will reject every request");
    }
    let state = Arc::new(AppState::new(config, Arc::clone(&store), Arc::clone(&session), engine));
    spawn_presenter(Arc::clone(&state));

    // ── 4. API server ────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");
    let app = crypto_analyzer::api::router(Arc::clone(&state));
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    // ── 5. Start streaming ───────────────────────────────────────────────
    if let Err(e) = session.start(&symbol, interval).await {
        error!(error = %e, "initial session start failed — retry via POST /api/v1/control/symbol");
    }

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    session.stop().await;

    if let Err(e) = state.config_for_save().save(&config_path) {
        error!(error = %e, "Failed to save config on shutdown");
    }

    info!("Crypto Analyzer shut down complete.");
    Ok(())
}
