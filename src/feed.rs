// =============================================================================
// Feed Port: the contract between the session controller and an exchange
// =============================================================================
//
// A feed supplies one bounded REST snapshot call and two push subscriptions.
// Push subscriptions never call back into the core directly: they forward raw
// text into a `MessageSink`, which tags every message with the session
// generation that opened the subscription and queues it on the single
// channel consumed by the session's routing task.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::FeedError;
use crate::market_data::kline::CandleRow;
use crate::types::Interval;

/// Raw push payload, parsed later by the routing task.
#[derive(Debug, Clone, PartialEq)]
pub enum RawMessage {
    Candle(String),
    Depth(String),
}

/// A raw message stamped with the generation of the subscription it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedMessage {
    pub generation: u64,
    pub message: RawMessage,
}

/// Where a subscription delivers its messages.
#[derive(Debug, Clone)]
pub struct MessageSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedMessage>,
}

impl MessageSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedMessage>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue a message. Returns `false` once the router has gone away, which
    /// tells the subscription to shut down.
    pub fn send(&self, message: RawMessage) -> bool {
        self.tx
            .send(TaggedMessage {
                generation: self.generation,
                message,
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Opaque identifier for an open push subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[async_trait]
pub trait FeedPort: Send + Sync {
    /// Most recent `limit` candles, ascending by timestamp. Implementations
    /// enforce their own request timeout.
    async fn fetch_recent_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<CandleRow>, FeedError>;

    async fn subscribe_candles(
        &self,
        symbol: &str,
        interval: Interval,
        sink: MessageSink,
    ) -> Result<SubscriptionHandle, FeedError>;

    async fn subscribe_depth(&self, symbol: &str, sink: MessageSink) -> Result<SubscriptionHandle, FeedError>;

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), FeedError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_tags_messages_with_its_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = MessageSink::new(7, tx);
        assert!(sink.send(RawMessage::Depth("{}".into())));
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.generation, 7);
        assert_eq!(msg.message, RawMessage::Depth("{}".into()));
    }

    #[test]
    fn sink_reports_closed_router() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = MessageSink::new(1, tx);
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.send(RawMessage::Candle("{}".into())));
    }
}
