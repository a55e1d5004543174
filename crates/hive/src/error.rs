use hive_agents::AgentError;
use hive_market::MarketError;
use hive_portfolio::PortfolioError;
use hive_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Portfolio(#[from] PortfolioError),

    #[error(transparent)]
    Market(#[from] MarketError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Bot is not active for user {0}")]
    BotInactive(String),
}
