// =============================================================================
// Indicator Engine
// =============================================================================
//
// Consumes the store's notification stream. On every `DataUpdated` the
// enabled indicators are recomputed over a fresh history snapshot (taken
// under the store lock, computed outside it) and each result is published
// back through the store as an `IndicatorResult`.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::indicators::settings::{IndicatorName, IndicatorSpec};
use crate::indicators::IndicatorOutput;
use crate::market_data::store::{MarketEvent, MarketStateStore};
use crate::types::CandleRecord;

#[derive(Clone)]
pub struct IndicatorEngine {
    store: Arc<MarketStateStore>,
    spec: Arc<RwLock<IndicatorSpec>>,
}

impl IndicatorEngine {
    pub fn new(store: Arc<MarketStateStore>, spec: Arc<RwLock<IndicatorSpec>>) -> Self {
        Self { store, spec }
    }

    /// Shared handle to the live indicator settings.
    pub fn spec(&self) -> Arc<RwLock<IndicatorSpec>> {
        Arc::clone(&self.spec)
    }

    /// Compute every enabled indicator over `history`.
    ///
    /// Indicators without enough data are silently absent from the result.
    /// A failing indicator is logged and skipped; the rest still run.
    pub fn evaluate(&self, history: &[CandleRecord]) -> Vec<(IndicatorName, IndicatorOutput)> {
        let enabled = self.spec.read().enabled();
        let mut results = Vec::with_capacity(enabled.len());
        for indicator in enabled {
            match indicator.compute(history) {
                Ok(Some(output)) => results.push((indicator.name(), output)),
                Ok(None) => {
                    debug!(indicator = %indicator.name(), candles = history.len(), "insufficient history");
                }
                Err(e) => {
                    warn!(indicator = %indicator.name(), error = %e, "indicator computation failed — skipped");
                }
            }
        }
        results
    }

    /// Recompute over the store's current history and publish the results.
    /// Returns how many results were published.
    pub fn recompute(&self) -> usize {
        let (epoch, history) = self.store.history_at_epoch();
        let mut published = 0;
        for (name, output) in self.evaluate(&history) {
            if self.store.publish_indicator(epoch, name.as_str(), output) {
                published += 1;
            }
        }
        published
    }

    /// Drive the engine from a subscription until the store drops it.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<MarketEvent>) {
        while let Some(event) = rx.recv().await {
            if let MarketEvent::DataUpdated { .. } = event {
                self.recompute();
            }
        }
        info!("indicator engine stopped — notification stream closed");
    }

    /// Subscribe to the store and run on a background task. The
    /// subscription is registered before this returns, so no update applied
    /// afterwards is missed.
    pub fn spawn(self) -> JoinHandle<()> {
        let rx = self.store.subscribe();
        info!("indicator engine started");
        tokio::spawn(self.run(rx))
    }
}
