use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::context::ContextSnapshot;

/// MAIN is the live paper portfolio, SHADOW trades a candidate strategy side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PortfolioKind {
    Main,
    Shadow,
}

impl PortfolioKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortfolioKind::Main => "MAIN",
            PortfolioKind::Shadow => "SHADOW",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MAIN" => Some(PortfolioKind::Main),
            "SHADOW" => Some(PortfolioKind::Shadow),
            _ => None,
        }
    }
}

impl fmt::Display for PortfolioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    #[default]
    Long,
    /// Opened by posting `amount * entry_price` as collateral; gains as price falls.
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk parameters in force when a trade was sized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskParameters {
    pub capital_per_trade_percent: f64,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub amount: Decimal,
    pub entry_price: Decimal,
    #[serde(default)]
    pub side: PositionSide,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit_percent: Option<f64>,
    #[serde(default)]
    pub hold_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_hold_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_risk_parameters: Option<RiskParameters>,
    /// Reasoning of the decision that opened the position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_decision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_context: Option<ContextSnapshot>,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn cost_basis(&self) -> Decimal {
        self.amount * self.entry_price
    }

    /// Price move in the position's favour, per unit.
    fn favourable_move(&self, price: Decimal) -> Decimal {
        match self.side {
            PositionSide::Long => price - self.entry_price,
            PositionSide::Short => self.entry_price - price,
        }
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.favourable_move(price) * self.amount
    }

    /// Percent gain from entry to `price`; positive when a short's price falls.
    pub fn pnl_percent(&self, price: Decimal) -> f64 {
        if self.entry_price.is_zero() {
            return 0.0;
        }
        (self.favourable_move(price) / self.entry_price * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0)
    }

    /// What closing at `price` would return to the balance before fees.
    /// A short returns its collateral plus gains and never goes below zero.
    pub fn market_value(&self, price: Decimal) -> Decimal {
        match self.side {
            PositionSide::Long => self.amount * price,
            PositionSide::Short => (self.cost_basis() + self.unrealized_pnl(price)).max(Decimal::ZERO),
        }
    }

    pub fn apply(&mut self, update: PositionUpdate) {
        if let Some(stop_loss_price) = update.stop_loss_price {
            self.stop_loss_price = Some(stop_loss_price);
        }
        if let Some(take_profit_percent) = update.take_profit_percent {
            self.take_profit_percent = Some(take_profit_percent);
        }
        if let Some(hold_count) = update.hold_count {
            self.hold_count = hold_count;
        }
        if let Some(last_hold_price) = update.last_hold_price {
            self.last_hold_price = Some(last_hold_price);
        }
    }
}

/// Partial position update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_hold_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub user_id: String,
    pub kind: PortfolioKind,
    pub balance: Decimal,
    /// At most one position per symbol.
    pub positions: BTreeMap<String, Position>,
    pub updated_at: DateTime<Utc>,
}

impl Portfolio {
    pub fn new(user_id: impl Into<String>, kind: PortfolioKind, balance: Decimal) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
            balance,
            positions: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Balance plus positions marked at `prices`; unpriced positions count at entry.
    pub fn equity(&self, prices: &BTreeMap<String, Decimal>) -> Decimal {
        let marked: Decimal = self
            .positions
            .values()
            .map(|p| p.market_value(prices.get(&p.symbol).copied().unwrap_or(p.entry_price)))
            .sum();
        self.balance + marked
    }
}
