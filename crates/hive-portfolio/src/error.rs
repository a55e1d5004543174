use hive_models::portfolio::{PortfolioKind, PositionSide};
use hive_store::StoreError;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortfolioError {
    #[error("Insufficient balance to open {symbol}: need {required}, have {available}")]
    InsufficientBalance {
        symbol: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("Cannot sell {requested} {symbol}: only {held} held")]
    InsufficientAmount {
        symbol: String,
        requested: Decimal,
        held: Decimal,
    },

    #[error("No open {kind} position in {symbol} to {operation}")]
    NoSuchPosition {
        symbol: String,
        kind: PortfolioKind,
        operation: &'static str,
    },

    #[error("Position in {symbol} is already open and averaging in is disabled")]
    PositionExists { symbol: String },

    #[error("Cannot {operation} {symbol}: the open position is {held}")]
    SideMismatch {
        symbol: String,
        held: PositionSide,
        operation: &'static str,
    },

    #[error("Cannot open {symbol}: {limit} positions already open")]
    PositionLimit { symbol: String, limit: usize },

    #[error("Invalid {operation} of {symbol}: {detail}")]
    InvalidAmount {
        symbol: String,
        operation: &'static str,
        detail: String,
    },

    #[error("No price available for {symbol}: {detail}")]
    PriceUnavailable { symbol: String, detail: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
