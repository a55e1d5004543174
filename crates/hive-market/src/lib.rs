pub mod error;
pub mod feed;
pub mod hub;
pub mod scanner;
pub mod source;
pub mod test_support;

pub use error::MarketError;
pub use feed::{FeedSnapshot, InMemoryFeed, PriceFeed, ReplayFeed};
pub use hub::{ConsumerId, Delivery, HubEvent, StreamHub, Subscription};
pub use scanner::{BeginAnalysis, OpportunityScanner, Resolution};
pub use source::{JsonLinesSource, StreamInterest, TickerBatch, TickerSource};
