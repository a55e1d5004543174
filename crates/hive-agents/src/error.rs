use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent backend error: {0}")]
    Backend(String),

    #[error("Agent response parse error: {0}")]
    Parse(String),

    #[error("Agent timed out after {0} seconds")]
    Timeout(u64),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Run cancelled: {0}")]
    Cancelled(String),

    #[error("Store error: {0}")]
    Store(#[from] hive_store::StoreError),

    #[error("Market data error: {0}")]
    Market(#[from] hive_market::MarketError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
