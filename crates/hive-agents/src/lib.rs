pub mod agent;
pub mod command;
pub mod context;
pub mod error;
pub mod indicators;
pub mod macro_analyst;
pub mod optimizer;
pub mod parser;
pub mod pipeline;
pub mod prompted;
pub mod prompts;
pub mod registry;
pub mod risk;
pub mod risk_manager;
pub mod sentiment_analyst;
pub mod technical_analyst;
pub mod test_support;

pub use agent::{timed_call, Agent, AgentContext, ConsultationDesk, MetricsRecorder};
pub use command::CommandConfig;
pub use context::SharedContext;
pub use error::AgentError;
pub use macro_analyst::MacroAnalyst;
pub use optimizer::{build_report, StrategyOptimizer, TradeHistory};
pub use pipeline::{EventSink, Pipeline, MARKET_BENCHMARK};
pub use prompted::PromptedAgent;
pub use registry::AgentRegistry;
pub use risk::{adapt_risk_parameters, regime_multiplier};
pub use risk_manager::RiskManager;
pub use sentiment_analyst::SentimentAnalyst;
pub use technical_analyst::{TechnicalAnalyst, TechnicalReading};
