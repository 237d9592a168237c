// =============================================================================
// Crypto Analyzer — live Binance market state and indicators
// =============================================================================
//
// Data flow:
//   FeedPort → StreamingSession → MarketStateStore
//            → { IndicatorEngine, PersistenceSink, presenter/API }
// =============================================================================

pub mod api;
pub mod app_state;
pub mod binance;
pub mod error;
pub mod feed;
pub mod indicators;
pub mod market_data;
pub mod persistence;
pub mod runtime_config;
pub mod types;

pub use error::FeedError;
