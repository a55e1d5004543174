use hive_models::opportunity::OpportunityStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarketError {
    #[error("Upstream stream error: {0}")]
    Upstream(String),

    #[error("Price feed error: {0}")]
    Feed(String),

    #[error("No opportunity tracked for {0}")]
    NotTracked(String),

    #[error("Invalid opportunity transition for {symbol}: {from} -> {to}")]
    InvalidTransition {
        symbol: String,
        from: OpportunityStatus,
        to: OpportunityStatus,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
