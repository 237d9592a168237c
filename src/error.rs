// =============================================================================
// Error taxonomy for the market data pipeline
// =============================================================================
//
// Only `Transport` escapes to callers (it aborts a session start). Every other
// kind is contained by the component that detects it and logged there.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    /// Snapshot fetch or subscription failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed push message or REST row.
    #[error("parse error: {0}")]
    Parse(String),

    /// A frame older than the history tail was offered to the store.
    #[error("out-of-order frame: timestamp {timestamp} precedes history tail {tail}")]
    OrderingViolation { timestamp: i64, tail: i64 },

    #[error("indicator {indicator} failed: {reason}")]
    IndicatorComputation { indicator: String, reason: String },

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl FeedError {
    /// Whether the error prevents streaming (and must reach the caller).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<rusqlite::Error> for FeedError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_is_fatal() {
        assert!(FeedError::Transport("down".into()).is_fatal());
        assert!(!FeedError::Parse("bad".into()).is_fatal());
        assert!(!FeedError::OrderingViolation { timestamp: 1, tail: 2 }.is_fatal());
        assert!(!FeedError::Persistence("disk".into()).is_fatal());
    }

    #[test]
    fn ordering_violation_message_names_both_timestamps() {
        let msg = FeedError::OrderingViolation { timestamp: 100, tail: 300 }.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("300"));
    }

    #[test]
    fn json_errors_become_parse_errors() {
        let err: FeedError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, FeedError::Parse(_)));
    }
}
