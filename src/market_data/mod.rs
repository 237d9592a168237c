pub mod kline;
pub mod order_book;
pub mod session;
pub mod store;

pub use order_book::{BookSummary, OrderBookCache};
pub use session::StreamingSession;
pub use store::{ApplyOutcome, MarketEvent, MarketStateStore};
