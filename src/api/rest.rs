// =============================================================================
// REST API Endpoints (Axum 0.7)
// =============================================================================
//
// All endpoints live under `/api/v1/`. Read-only views (health, state,
// history, WebSocket feed) are public. Control routes and indicator settings
// require a valid Bearer token checked via the `AdminGuard` extractor.
//
// Errors are returned as `{ "ok": false, "error": "..." }`.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AdminGuard;
use crate::app_state::AppState;
use crate::error::FeedError;
use crate::indicators::IndicatorUpdate;
use crate::types::{CandleRecord, Interval};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/history", get(history))
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/control/symbol", post(control_symbol))
        .route("/api/v1/control/stop", post(control_stop))
        .route("/api/v1/indicators", get(get_indicators).post(set_indicator))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<FeedError> for ApiError {
    fn from(e: FeedError) -> Self {
        let status = match e {
            FeedError::Transport(_) => StatusCode::BAD_GATEWAY,
            FeedError::Parse(_) | FeedError::IndicatorComputation { .. } => StatusCode::BAD_REQUEST,
            FeedError::OrderingViolation { .. } | FeedError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "ok": false, "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// State and history (public)
// =============================================================================

async fn full_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HistoryResponse {
    symbol: String,
    interval: Interval,
    candles: Vec<CandleRecord>,
}

/// Candle history, oldest first; `?limit=N` keeps only the newest N.
async fn history(State(state): State<Arc<AppState>>, Query(query): Query<HistoryQuery>) -> impl IntoResponse {
    let (symbol, interval) = state.store.symbol_interval();
    let mut candles = state.store.history();
    if let Some(limit) = query.limit {
        let skip = candles.len().saturating_sub(limit);
        candles.drain(..skip);
    }
    Json(HistoryResponse {
        symbol,
        interval,
        candles,
    })
}

// =============================================================================
// Session control (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct SymbolRequest {
    symbol: String,
    interval: Interval,
}

async fn control_symbol(
    _admin: AdminGuard,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SymbolRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!(symbol = %req.symbol, interval = %req.interval, "symbol/interval change requested via API");
    state.session.change_symbol_interval(&req.symbol, req.interval).await?;
    let (symbol, interval) = state.session.pair().await;
    Ok(Json(serde_json::json!({
        "ok": true,
        "symbol": symbol,
        "interval": interval,
        "status": state.session.status(),
    })))
}

async fn control_stop(_admin: AdminGuard, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    warn!("session stop requested via API");
    state.session.stop().await;
    Json(serde_json::json!({ "ok": true, "status": state.session.status() }))
}

// =============================================================================
// Indicator settings (authenticated)
// =============================================================================

async fn get_indicators(_admin: AdminGuard, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let spec = state.engine.spec().read().clone();
    Json(spec)
}

/// Toggle or re-parameterise one indicator. The update is validated before
/// it is accepted; results are recomputed immediately.
async fn set_indicator(
    _admin: AdminGuard,
    State(state): State<Arc<AppState>>,
    Json(update): Json<IndicatorUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = {
        let shared = state.engine.spec();
        let mut spec = shared.write();
        let accepted = spec.apply(&update)?;
        info!(indicator = %accepted.name(), enabled = ?update.enabled, "indicator settings updated");
        spec.clone()
    };
    state.retain_indicator_results(&spec);
    state.engine.recompute();
    Ok(Json(serde_json::json!({ "ok": true, "indicators": spec })))
}
