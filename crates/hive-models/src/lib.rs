pub mod agent_message;
pub mod analysis;
pub mod config;
pub mod context;
pub mod decision;
pub mod events;
pub mod logs;
pub mod market;
pub mod memory;
pub mod metrics;
pub mod opportunity;
pub mod portfolio;
pub mod schema;

pub use agent_message::{AgentKind, AgentRequest, AgentResponse, ChatMessage, RiskVerdict};
pub use analysis::{ConfigDelta, MistakePattern, PerformanceReport, ShadowComparison, WinStats};
pub use config::{
    AgentBackend, AgentSettings, AgentsConfig, EmbedderKind, ExecutionConfig, HiveConfig,
    RiskManagement, ScannerConfig, SchedulerConfig, StoreConfig, StrategyConfig, StreamConfig,
    TradingSettings,
};
pub use context::{ContextSnapshot, ContextUpdate, FearAndGreed, MarketRegime, Sentiment};
pub use decision::{AgentReport, TradeAction, TradeDecision};
pub use events::StreamEvent;
pub use logs::{DecisionKind, DecisionLogEntry, MarketContextSummary, MissedOpportunity, TradeLog};
pub use market::{Candle, MarketSignals, Ticker};
pub use memory::{MemorySource, RecalledMemory, TradeMemory, TradeOutcome};
pub use metrics::AgentMetric;
pub use opportunity::{Opportunity, OpportunityStatus};
pub use portfolio::{
    Portfolio, PortfolioKind, Position, PositionSide, PositionUpdate, RiskParameters,
};
