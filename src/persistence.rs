// =============================================================================
// Persistence Sink — SQLite upsert of every applied frame
// =============================================================================
//
// One row per candle, keyed by (timestamp, symbol, interval). A repeated
// timestamp (the tail candle updated in place) overwrites the row. The sink
// runs as its own subscriber of the store and performs each upsert on the
// blocking pool, one at a time so writes land in notification order.
// Failures are logged as persistence errors and never reach the streaming
// path.
// =============================================================================

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::market_data::store::{MarketEvent, MarketStateStore};
use crate::types::MarketFrame;

/// SQLite-backed candle table.
pub struct CandleRepository {
    conn: Mutex<Connection>,
}

impl CandleRepository {
    /// Open (creating if needed) the database at `db_path`, including its
    /// parent directory.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, FeedError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                FeedError::Persistence(format!("failed to create database directory {}: {e}", parent.display()))
            })?;
        }

        let repo = Self {
            conn: Mutex::new(Connection::open(db_path)?),
        };
        repo.init_schema()?;
        info!(path = %db_path.display(), "candle database opened");
        Ok(repo)
    }

    pub fn open_in_memory() -> Result<Self, FeedError> {
        let repo = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn init_schema(&self) -> Result<(), FeedError> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS klines (
                timestamp INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                interval TEXT NOT NULL,
                PRIMARY KEY (timestamp, symbol, interval)
            );
            "#,
        )?;
        Ok(())
    }

    /// Insert or overwrite the row for this frame's key.
    pub fn upsert(&self, frame: &MarketFrame) -> Result<(), FeedError> {
        self.conn.lock().execute(
            r#"
            INSERT OR REPLACE INTO klines (timestamp, symbol, open, high, low, close, volume, interval)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                frame.timestamp,
                frame.symbol,
                frame.open,
                frame.high,
                frame.low,
                frame.close,
                frame.volume,
                frame.interval.as_str(),
            ],
        )?;
        Ok(())
    }

    #[cfg(test)]
    fn count(&self) -> i64 {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM klines", [], |r| r.get(0))
            .unwrap()
    }

    #[cfg(test)]
    fn close_at(&self, timestamp: i64, symbol: &str, interval: &str) -> Option<f64> {
        use rusqlite::OptionalExtension;
        self.conn
            .lock()
            .query_row(
                "SELECT close FROM klines WHERE timestamp = ?1 AND symbol = ?2 AND interval = ?3",
                params![timestamp, symbol, interval],
                |r| r.get(0),
            )
            .optional()
            .unwrap()
    }
}

// -----------------------------------------------------------------------------
// Sink task
// -----------------------------------------------------------------------------

pub struct PersistenceSink {
    repo: Arc<CandleRepository>,
}

impl PersistenceSink {
    pub fn new(repo: Arc<CandleRepository>) -> Self {
        Self { repo }
    }

    /// Upsert every `DataUpdated` frame until the stream closes.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<MarketEvent>) {
        let mut written = 0u64;
        while let Some(event) = rx.recv().await {
            let MarketEvent::DataUpdated { frame } = event else {
                continue;
            };
            let repo = Arc::clone(&self.repo);
            let row = Arc::clone(&frame);
            let outcome = tokio::task::spawn_blocking(move || repo.upsert(&row))
                .await
                .unwrap_or_else(|e| Err(FeedError::Persistence(format!("upsert task failed: {e}"))));
            match outcome {
                Ok(()) => {
                    written += 1;
                    debug!(symbol = %frame.symbol, timestamp = frame.timestamp, "frame persisted");
                }
                Err(e) => warn!(symbol = %frame.symbol, timestamp = frame.timestamp, error = %e, "persist failed"),
            }
        }
        info!(written, "persistence sink stopped");
    }

    /// Subscribe before spawning so no applied frame is missed.
    pub fn spawn(self, store: &MarketStateStore) -> JoinHandle<()> {
        let rx = store.subscribe();
        tokio::spawn(self.run(rx))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::Interval;

    fn frame(ts: i64, symbol: &str, interval: Interval, close: f64) -> MarketFrame {
        MarketFrame {
            timestamp: ts,
            symbol: symbol.into(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            interval,
            bids: vec![(close - 1.0, 1.0)],
            asks: vec![(close + 1.0, 1.0)],
        }
    }

    #[test]
    fn upsert_replaces_same_key() {
        let repo = CandleRepository::open_in_memory().unwrap();
        repo.upsert(&frame(100, "BTCUSDT", Interval::OneMinute, 1.0)).unwrap();
        repo.upsert(&frame(100, "BTCUSDT", Interval::OneMinute, 2.0)).unwrap();
        assert_eq!(repo.count(), 1);
        assert_eq!(repo.close_at(100, "BTCUSDT", "1m"), Some(2.0));
    }

    #[test]
    fn key_includes_symbol_and_interval() {
        let repo = CandleRepository::open_in_memory().unwrap();
        repo.upsert(&frame(100, "BTCUSDT", Interval::OneMinute, 1.0)).unwrap();
        repo.upsert(&frame(100, "ETHUSDT", Interval::OneMinute, 1.0)).unwrap();
        repo.upsert(&frame(100, "BTCUSDT", Interval::OneMonth, 1.0)).unwrap();
        assert_eq!(repo.count(), 3);
        assert_eq!(repo.close_at(100, "BTCUSDT", "1M"), Some(1.0));
        assert_eq!(repo.close_at(200, "BTCUSDT", "1m"), None);
    }

    #[test]
    fn open_creates_parent_directory() {
        let dir = std::env::temp_dir().join(format!("analyzer-db-{}", std::process::id()));
        let path = dir.join("nested").join("klines.db");
        let repo = CandleRepository::open(&path).unwrap();
        repo.upsert(&frame(1, "BTCUSDT", Interval::OneMinute, 1.0)).unwrap();
        assert!(path.exists());
        drop(repo);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn sink_writes_in_notification_order() {
        let store = MarketStateStore::new(10, "BTCUSDT", Interval::OneMinute);
        let repo = Arc::new(CandleRepository::open_in_memory().unwrap());
        let task = PersistenceSink::new(Arc::clone(&repo)).spawn(&store);

        for i in 0..50 {
            store.apply_frame(frame(100, "BTCUSDT", Interval::OneMinute, i as f64)).unwrap();
        }
        store.apply_frame(frame(200, "BTCUSDT", Interval::OneMinute, 7.0)).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while repo.close_at(200, "BTCUSDT", "1m").is_none() {
            assert!(tokio::time::Instant::now() < deadline, "sink did not catch up");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(repo.close_at(100, "BTCUSDT", "1m"), Some(49.0));
        task.abort();
    }

    #[tokio::test]
    async fn sink_persists_applied_frames() {
        let store = MarketStateStore::new(10, "BTCUSDT", Interval::OneMinute);
        let repo = Arc::new(CandleRepository::open_in_memory().unwrap());
        let task = PersistenceSink::new(Arc::clone(&repo)).spawn(&store);

        store.apply_frame(frame(100, "BTCUSDT", Interval::OneMinute, 1.0)).unwrap();
        store.apply_frame(frame(200, "BTCUSDT", Interval::OneMinute, 2.0)).unwrap();
        store.apply_frame(frame(200, "BTCUSDT", Interval::OneMinute, 2.5)).unwrap();
        // Rejected: nothing applied, nothing persisted.
        assert!(store.apply_frame(frame(50, "BTCUSDT", Interval::OneMinute, 9.0)).is_err());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while repo.close_at(200, "BTCUSDT", "1m") != Some(2.5) {
            assert!(tokio::time::Instant::now() < deadline, "sink did not catch up");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(repo.count(), 2);
        assert_eq!(repo.close_at(50, "BTCUSDT", "1m"), None);
        task.abort();
    }
}
