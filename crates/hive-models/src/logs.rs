use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::{ContextSnapshot, MarketRegime, Sentiment};
use crate::portfolio::{PortfolioKind, PositionSide, RiskParameters};

/// Missed opportunities kept per user; older entries are trimmed on insert.
pub const MISSED_OPPORTUNITY_RETENTION: usize = 500;

/// The slice of shared context recorded alongside a closed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketContextSummary {
    pub regime: MarketRegime,
    pub regime_score: f64,
    pub sentiment: Sentiment,
    pub sentiment_score: f64,
}

impl From<&ContextSnapshot> for MarketContextSummary {
    fn from(snapshot: &ContextSnapshot) -> Self {
        Self {
            regime: snapshot.market_regime,
            regime_score: snapshot.regime_score,
            sentiment: snapshot.sentiment,
            sentiment_score: snapshot.sentiment_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLog {
    pub id: Uuid,
    pub user_id: String,
    pub kind: PortfolioKind,
    pub symbol: String,
    #[serde(default)]
    pub side: PositionSide,
    pub amount: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub pnl: Decimal,
    pub pnl_percent: f64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_context: Option<MarketContextSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_risk_parameters: Option<RiskParameters>,
    pub timestamp: DateTime<Utc>,
}

impl TradeLog {
    pub fn is_win(&self) -> bool {
        self.pnl > Decimal::ZERO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    Buy,
    Sell,
    Avoid,
    SellNow,
    HoldAndIncreaseTp,
    Short,
    Cover,
    ManualClose,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Buy => "BUY",
            DecisionKind::Sell => "SELL",
            DecisionKind::Avoid => "AVOID",
            DecisionKind::SellNow => "SELL_NOW",
            DecisionKind::HoldAndIncreaseTp => "HOLD_AND_INCREASE_TP",
            DecisionKind::Short => "SHORT",
            DecisionKind::Cover => "COVER",
            DecisionKind::ManualClose => "MANUAL_CLOSE",
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub id: Uuid,
    pub user_id: String,
    pub symbol: String,
    pub decision: DecisionKind,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl DecisionLogEntry {
    pub fn new(
        user_id: impl Into<String>,
        symbol: impl Into<String>,
        decision: DecisionKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            symbol: symbol.into(),
            decision,
            reason: reason.into(),
            price: None,
            confidence: None,
            timestamp: Utc::now(),
        }
    }
}

/// A candidate the pipeline looked at and decided not to buy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissedOpportunity {
    pub id: Uuid,
    pub user_id: String,
    pub symbol: String,
    pub reason: String,
    pub confidence: f64,
    pub final_summary: String,
    pub timestamp: DateTime<Utc>,
}
