// =============================================================================
// Runtime Configuration — JSON file + environment overrides, atomic save
// =============================================================================
//
// Every field carries a serde default so partial or older config files still
// load. Secrets are read from the environment only and are never written back
// to disk. Persistence uses an atomic tmp + rename pattern.
//
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::indicators::IndicatorSpec;
use crate::market_data::store::DEFAULT_CAPACITY;
use crate::types::{canonical_symbol, Interval};

/// Default location of the config file when `ANALYZER_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

const MAINNET_REST: &str = "https://api.binance.com";
const MAINNET_WS: &str = "wss://stream.binance.com:9443/ws";
const TESTNET_REST: &str = "https://testnet.binance.vision";
const TESTNET_WS: &str = "wss://testnet.binance.vision/ws";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_base_url() -> String {
    MAINNET_REST.to_string()
}

fn default_ws_base_url() -> String {
    MAINNET_WS.to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/crypto_analyzer.db")
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_max_candles() -> usize {
    DEFAULT_CAPACITY
}

fn default_snapshot_limit() -> u32 {
    500
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

// =============================================================================
// Sections
// =============================================================================

/// Exchange endpoints and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Base for single-stream sockets; `/<stream>` is appended.
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,

    /// Swap both hosts to the Binance spot testnet.
    #[serde(default)]
    pub testnet: bool,

    /// From `BINANCE_API_KEY`. Sent as `X-MBX-APIKEY` when present.
    #[serde(skip)]
    pub api_key: Option<String>,

    /// From `BINANCE_API_SECRET`. Public market data needs no signature, so
    /// this is only carried for completeness and never serialized.
    #[serde(skip)]
    pub api_secret: Option<String>,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_base_url: default_ws_base_url(),
            testnet: false,
            api_key: None,
            api_secret: None,
        }
    }
}

impl BinanceConfig {
    /// REST base URL, honoring the testnet switch.
    pub fn rest_url(&self) -> &str {
        if self.testnet {
            TESTNET_REST
        } else {
            self.base_url.trim_end_matches('/')
        }
    }

    /// WebSocket base URL, honoring the testnet switch.
    pub fn ws_url(&self) -> &str {
        if self.testnet {
            TESTNET_WS
        } else {
            self.ws_base_url.trim_end_matches('/')
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}

/// Which pair to stream and how much history to keep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartConfig {
    #[serde(default = "default_symbol")]
    pub default_symbol: String,

    #[serde(default)]
    pub default_interval: Interval,

    /// History capacity of the market state store.
    #[serde(default = "default_max_candles")]
    pub max_candles: usize,

    /// Candles fetched over REST when a session starts.
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: u32,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            default_symbol: default_symbol(),
            default_interval: Interval::default(),
            max_candles: default_max_candles(),
            snapshot_limit: default_snapshot_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// From `ANALYZER_ADMIN_TOKEN`; guards the control routes.
    #[serde(skip)]
    pub admin_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            admin_token: None,
        }
    }
}

// =============================================================================
// AppConfig
// =============================================================================

/// Top-level configuration for the analyzer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub binance: BinanceConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub chart: ChartConfig,

    /// Indicator switches and parameters; saved on shutdown.
    #[serde(default)]
    pub indicators: IndicatorSpec,

    #[serde(default)]
    pub api: ApiConfig,
}

impl AppConfig {
    /// Config file path: `ANALYZER_CONFIG` or `config.json`.
    pub fn path_from_env() -> PathBuf {
        std::env::var("ANALYZER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.chart.default_symbol,
            interval = %config.chart.default_interval,
            "config loaded"
        );

        Ok(config)
    }

    /// `load`, falling back to defaults with a warning on any failure.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config unavailable — using defaults");
                Self::default()
            }
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("BINANCE_API_KEY") {
            self.binance.api_key = Some(v);
        }
        if let Some(v) = get("BINANCE_API_SECRET") {
            self.binance.api_secret = Some(v);
        }
        if let Some(v) = get("ANALYZER_SYMBOL") {
            self.chart.default_symbol = canonical_symbol(&v);
        }
        if let Some(v) = get("ANALYZER_INTERVAL") {
            self.chart.default_interval = v
                .parse()
                .with_context(|| format!("invalid ANALYZER_INTERVAL {v:?}"))?;
        }
        if let Some(v) = get("ANALYZER_BIND_ADDR") {
            self.api.bind_addr = v;
        }
        if let Some(v) = get("ANALYZER_DB_PATH") {
            self.database.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("ANALYZER_ADMIN_TOKEN") {
            self.api.admin_token = Some(v);
        }
        Ok(())
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }
}
