use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use hive_models::config::ExecutionConfig;
use hive_models::context::ContextSnapshot;
use hive_models::logs::{MarketContextSummary, TradeLog};
use hive_models::memory::{MemorySource, TradeMemory, TradeOutcome};
use hive_models::portfolio::{
    Portfolio, PortfolioKind, Position, PositionSide, PositionUpdate, RiskParameters,
};
use hive_store::{MemoryStore, Store, StoreError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PortfolioError;

/// Metadata attached to a position when it is opened or averaged into.
#[derive(Debug, Clone, Default)]
pub struct BuyContext {
    pub allow_averaging_in: bool,
    /// Open positions allowed before a new symbol is refused.
    pub max_positions: Option<usize>,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_percent: Option<f64>,
    pub risk_parameters: Option<RiskParameters>,
    pub reasoning: Option<String>,
    pub context: Option<ContextSnapshot>,
}

#[derive(Debug, Clone)]
pub struct SellOutcome {
    pub portfolio: Portfolio,
    pub trade: TradeLog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Complete,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellAllItem {
    pub symbol: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pnl: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellAllReport {
    pub status: BatchStatus,
    pub items: Vec<SellAllItem>,
    pub balance_after: Decimal,
}

/// One async lock per (user, portfolio kind). Different users never contend.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<(String, PortfolioKind), Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    fn get(&self, user_id: &str, kind: PortfolioKind) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry((user_id.to_string(), kind)).or_default())
    }
}

/// One request to reduce or close a position.
struct Close<'a> {
    symbol: &'a str,
    /// `None` closes the whole position.
    amount: Option<Decimal>,
    price: Decimal,
    reason: &'a str,
    context: Option<&'a ContextSnapshot>,
    /// Side the position must be on, if any.
    side: Option<PositionSide>,
    source: MemorySource,
    operation: &'static str,
}

/// Paper portfolio bookkeeping with strict balance and position invariants.
///
/// Every mutation loads the portfolio, validates, and commits the new state
/// (plus its trade log, for closes) in one SQLite transaction while holding the
/// per-user lock. A rejected mutation writes nothing.
///
/// Longs debit `amount * price` and credit the sale proceeds. Shorts debit the
/// same notional as collateral and credit it back plus the price drop, never
/// less than zero.
pub struct PortfolioEngine {
    store: Arc<Store>,
    memory: MemoryStore,
    fee_rate: Decimal,
    starting_balance: Decimal,
    locks: KeyedLocks,
}

impl PortfolioEngine {
    pub fn new(store: Arc<Store>, memory: MemoryStore, config: &ExecutionConfig) -> Self {
        Self {
            store,
            memory,
            fee_rate: config.fee_rate,
            starting_balance: config.starting_balance,
            locks: KeyedLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Current portfolio. SHADOW portfolios start lazily at the starting balance.
    pub fn portfolio(&self, user_id: &str, kind: PortfolioKind) -> Result<Portfolio, PortfolioError> {
        match self.store.portfolio(user_id, kind)? {
            Some(portfolio) => Ok(portfolio),
            None if kind == PortfolioKind::Shadow => {
                Ok(Portfolio::new(user_id, kind, self.starting_balance))
            }
            None => Err(StoreError::NotFound(format!("{kind} portfolio for user {user_id}")).into()),
        }
    }

    /// Spend `usd_amount` (plus fees) on `symbol` at `price`.
    pub async fn buy(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        symbol: &str,
        usd_amount: Decimal,
        price: Decimal,
        ctx: BuyContext,
    ) -> Result<Portfolio, PortfolioError> {
        self.open(user_id, kind, symbol, PositionSide::Long, usd_amount, price, ctx)
            .await
    }

    /// Post `usd_amount` (plus fees) as collateral for a short of `symbol` at `price`.
    pub async fn open_short(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        symbol: &str,
        usd_amount: Decimal,
        price: Decimal,
        ctx: BuyContext,
    ) -> Result<Portfolio, PortfolioError> {
        self.open(user_id, kind, symbol, PositionSide::Short, usd_amount, price, ctx)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn open(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        symbol: &str,
        side: PositionSide,
        usd_amount: Decimal,
        price: Decimal,
        ctx: BuyContext,
    ) -> Result<Portfolio, PortfolioError> {
        let operation = match side {
            PositionSide::Long => "buy",
            PositionSide::Short => "short",
        };
        if usd_amount <= Decimal::ZERO || price <= Decimal::ZERO {
            return Err(PortfolioError::InvalidAmount {
                symbol: symbol.to_string(),
                operation,
                detail: format!("amount {usd_amount} at price {price}"),
            });
        }

        let lock = self.locks.get(user_id, kind);
        let _guard = lock.lock().await;

        let mut portfolio = self.portfolio(user_id, kind)?;
        let fee = usd_amount * self.fee_rate;
        let required = usd_amount + fee;
        if required > portfolio.balance {
            return Err(PortfolioError::InsufficientBalance {
                symbol: symbol.to_string(),
                required,
                available: portfolio.balance,
            });
        }

        let amount = usd_amount / price;
        let open_count = portfolio.positions.len();
        match portfolio.positions.get_mut(symbol) {
            Some(position) if position.side != side => {
                return Err(PortfolioError::SideMismatch {
                    symbol: symbol.to_string(),
                    held: position.side,
                    operation,
                });
            }
            Some(_) if !ctx.allow_averaging_in => {
                return Err(PortfolioError::PositionExists {
                    symbol: symbol.to_string(),
                });
            }
            Some(position) => {
                let total = position.amount + amount;
                position.entry_price = (position.cost_basis() + usd_amount) / total;
                position.amount = total;
                if ctx.stop_loss_price.is_some() {
                    position.stop_loss_price = ctx.stop_loss_price;
                }
                if ctx.take_profit_percent.is_some() {
                    position.take_profit_percent = ctx.take_profit_percent;
                }
            }
            None => {
                if let Some(limit) = ctx.max_positions {
                    if open_count >= limit {
                        return Err(PortfolioError::PositionLimit {
                            symbol: symbol.to_string(),
                            limit,
                        });
                    }
                }
                portfolio.positions.insert(
                    symbol.to_string(),
                    Position {
                        symbol: symbol.to_string(),
                        amount,
                        entry_price: price,
                        side,
                        stop_loss_price: ctx.stop_loss_price,
                        take_profit_percent: ctx.take_profit_percent,
                        hold_count: 0,
                        last_hold_price: None,
                        applied_risk_parameters: ctx.risk_parameters,
                        initial_decision: ctx.reasoning,
                        decision_context: ctx.context,
                        opened_at: Utc::now(),
                    },
                );
            }
        }
        portfolio.balance -= required;
        portfolio.updated_at = Utc::now();
        self.store.commit_trade(&portfolio, None)?;

        info!(
            user_id,
            kind = %kind,
            symbol,
            %side,
            %amount,
            %price,
            balance = %portfolio.balance,
            "Opened position"
        );
        Ok(portfolio)
    }

    /// Sell `amount` of a long `symbol` at `price`. Closed MAIN trades are written to memory.
    #[allow(clippy::too_many_arguments)]
    pub async fn sell(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        symbol: &str,
        amount: Decimal,
        price: Decimal,
        reason: &str,
        context: Option<&ContextSnapshot>,
    ) -> Result<SellOutcome, PortfolioError> {
        let close = Close {
            symbol,
            amount: Some(amount),
            price,
            reason,
            context,
            side: Some(PositionSide::Long),
            source: MemorySource::Ai,
            operation: "sell",
        };
        self.close(user_id, kind, close).await
    }

    /// Buy back `amount` of a short `symbol` at `price`.
    #[allow(clippy::too_many_arguments)]
    pub async fn cover(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        symbol: &str,
        amount: Decimal,
        price: Decimal,
        reason: &str,
        context: Option<&ContextSnapshot>,
    ) -> Result<SellOutcome, PortfolioError> {
        let close = Close {
            symbol,
            amount: Some(amount),
            price,
            reason,
            context,
            side: Some(PositionSide::Short),
            source: MemorySource::Ai,
            operation: "cover",
        };
        self.close(user_id, kind, close).await
    }

    /// Close the whole position in `symbol`, whichever side it is on.
    pub async fn close_position(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        symbol: &str,
        price: Decimal,
        reason: &str,
        context: Option<&ContextSnapshot>,
    ) -> Result<SellOutcome, PortfolioError> {
        let close = Close {
            symbol,
            amount: None,
            price,
            reason,
            context,
            side: None,
            source: MemorySource::Ai,
            operation: "close",
        };
        self.close(user_id, kind, close).await
    }

    /// Close the whole position on a person's instruction. The memory it leaves
    /// is attributed to the human and records the overridden entry decision.
    pub async fn close_manually(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        symbol: &str,
        price: Decimal,
        reason: &str,
    ) -> Result<SellOutcome, PortfolioError> {
        let close = Close {
            symbol,
            amount: None,
            price,
            reason,
            context: None,
            side: None,
            source: MemorySource::Human,
            operation: "close",
        };
        self.close(user_id, kind, close).await
    }

    async fn close(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        close: Close<'_>,
    ) -> Result<SellOutcome, PortfolioError> {
        let Close {
            symbol,
            amount,
            price,
            reason,
            context,
            side,
            source,
            operation,
        } = close;
        if price <= Decimal::ZERO || amount.is_some_and(|a| a <= Decimal::ZERO) {
            return Err(PortfolioError::InvalidAmount {
                symbol: symbol.to_string(),
                operation,
                detail: format!("amount {amount:?} at price {price}"),
            });
        }

        let (outcome, position) = {
            let lock = self.locks.get(user_id, kind);
            let _guard = lock.lock().await;

            let mut portfolio = self.portfolio(user_id, kind)?;
            let position = portfolio
                .positions
                .get(symbol)
                .cloned()
                .ok_or_else(|| PortfolioError::NoSuchPosition {
                    symbol: symbol.to_string(),
                    kind,
                    operation,
                })?;
            if side.is_some_and(|expected| expected != position.side) {
                return Err(PortfolioError::SideMismatch {
                    symbol: symbol.to_string(),
                    held: position.side,
                    operation,
                });
            }
            let amount = amount.unwrap_or(position.amount);
            if amount > position.amount {
                return Err(PortfolioError::InsufficientAmount {
                    symbol: symbol.to_string(),
                    requested: amount,
                    held: position.amount,
                });
            }

            let mut closed = position.clone();
            closed.amount = amount;
            let fee = amount * price * self.fee_rate;
            let credit = (closed.market_value(price) - fee).max(Decimal::ZERO);
            let pnl = credit - closed.cost_basis();
            portfolio.balance += credit;

            let remaining = position.amount - amount;
            if remaining.is_zero() {
                portfolio.positions.remove(symbol);
            } else if let Some(open) = portfolio.positions.get_mut(symbol) {
                open.amount = remaining;
            }
            portfolio.updated_at = Utc::now();

            let trade = TradeLog {
                id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                kind,
                symbol: symbol.to_string(),
                side: position.side,
                amount,
                entry_price: position.entry_price,
                exit_price: price,
                pnl,
                pnl_percent: position.pnl_percent(price),
                reason: reason.to_string(),
                market_context: context
                    .or(position.decision_context.as_ref())
                    .map(MarketContextSummary::from),
                applied_risk_parameters: position.applied_risk_parameters.clone(),
                timestamp: Utc::now(),
            };
            self.store.commit_trade(&portfolio, Some(&trade))?;

            info!(
                user_id,
                kind = %kind,
                symbol,
                side = %position.side,
                %amount,
                %price,
                %pnl,
                balance = %portfolio.balance,
                "Closed position"
            );
            (SellOutcome { portfolio, trade }, position)
        };

        if kind == PortfolioKind::Main {
            self.remember(&outcome.trade, &position, source).await;
        }
        Ok(outcome)
    }

    /// Close every open position at the given prices. Each symbol succeeds or fails on its own.
    pub async fn sell_all(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        prices: &BTreeMap<String, Decimal>,
        reason: &str,
    ) -> Result<SellAllReport, PortfolioError> {
        let portfolio = self.portfolio(user_id, kind)?;
        let mut items = Vec::with_capacity(portfolio.positions.len());
        let mut balance_after = portfolio.balance;

        for symbol in portfolio.positions.keys() {
            let result = match prices.get(symbol) {
                Some(price) => {
                    self.close_position(user_id, kind, symbol, *price, reason, None)
                        .await
                }
                None => Err(PortfolioError::PriceUnavailable {
                    symbol: symbol.clone(),
                    detail: "no quote for sell-all".to_string(),
                }),
            };
            items.push(match result {
                Ok(outcome) => {
                    balance_after = outcome.portfolio.balance;
                    SellAllItem {
                        symbol: symbol.clone(),
                        success: true,
                        pnl: Some(outcome.trade.pnl),
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(user_id, symbol = %symbol, error = %e, "Sell-all item failed");
                    SellAllItem {
                        symbol: symbol.clone(),
                        success: false,
                        pnl: None,
                        error: Some(e.to_string()),
                    }
                }
            });
        }

        let sold = items.iter().filter(|i| i.success).count();
        let status = if sold == 0 {
            BatchStatus::Failed
        } else if sold == items.len() {
            BatchStatus::Complete
        } else {
            BatchStatus::Partial
        };
        Ok(SellAllReport {
            status,
            items,
            balance_after,
        })
    }

    pub async fn update_position(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        symbol: &str,
        update: PositionUpdate,
    ) -> Result<Position, PortfolioError> {
        let lock = self.locks.get(user_id, kind);
        let _guard = lock.lock().await;

        let mut portfolio = self.portfolio(user_id, kind)?;
        let position = portfolio
            .positions
            .get_mut(symbol)
            .ok_or_else(|| PortfolioError::NoSuchPosition {
                symbol: symbol.to_string(),
                kind,
                operation: "update",
            })?;
        position.apply(update);
        let updated = position.clone();
        portfolio.updated_at = Utc::now();
        self.store.commit_trade(&portfolio, None)?;
        debug!(user_id, kind = %kind, symbol, "Position updated");
        Ok(updated)
    }

    /// Memory writes happen after the commit; a failure here never undoes the trade.
    async fn remember(&self, trade: &TradeLog, position: &Position, source: MemorySource) {
        let narrative = match source {
            MemorySource::Ai => trade_narrative(trade, position),
            MemorySource::Human => override_narrative(trade, position),
        };
        let memory = TradeMemory {
            id: Uuid::new_v4(),
            user_id: trade.user_id.clone(),
            symbol: trade.symbol.clone(),
            timestamp: trade.timestamp,
            outcome: if trade.is_win() {
                TradeOutcome::Profit
            } else {
                TradeOutcome::Loss
            },
            pnl_percent: trade.pnl_percent,
            narrative,
            source,
            embedding: Vec::new(),
        };
        if let Err(e) = self.memory.add_memory(memory).await {
            warn!(user_id = %trade.user_id, symbol = %trade.symbol, error = %e, "Failed to store trade memory");
        }
    }
}

fn regime_of(trade: &TradeLog, position: &Position) -> String {
    position
        .decision_context
        .as_ref()
        .map(|c| c.market_regime.to_string())
        .or_else(|| trade.market_context.as_ref().map(|c| c.regime.to_string()))
        .unwrap_or_else(|| "Neutral".to_string())
}

fn trade_narrative(trade: &TradeLog, position: &Position) -> String {
    let opening = match trade.side {
        PositionSide::Long => "Trade",
        PositionSide::Short => "Short trade",
    };
    let mut narrative = format!(
        "{opening} for {}. Macro: {}. Closed {:+.2}% ({}).",
        trade.symbol,
        regime_of(trade, position),
        trade.pnl_percent,
        trade.reason
    );
    if let Some(reasoning) = &position.initial_decision {
        narrative.push_str(" Entry: ");
        narrative.push_str(reasoning);
    }
    narrative
}

/// A person overrode the agents. Recorded so later recalls surface the disagreement.
fn override_narrative(trade: &TradeLog, position: &Position) -> String {
    format!(
        "Human override on {}: closed {} {:+.2}% during {}. Reason: {}. AI entry was: {}",
        trade.symbol,
        trade.side,
        trade.pnl_percent,
        regime_of(trade, position),
        trade.reason,
        position.initial_decision.as_deref().unwrap_or("no recorded reasoning")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn engine() -> PortfolioEngine {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .create_user("alice", &Default::default(), dec!(100000))
            .unwrap();
        PortfolioEngine::new(store, MemoryStore::in_memory(), &ExecutionConfig::default())
    }

    #[tokio::test]
    async fn buy_then_sell_round_trip() {
        let engine = engine();
        let after_buy = engine
            .buy("alice", PortfolioKind::Main, "BTCUSDT", dec!(1000), dec!(50000), BuyContext::default())
            .await
            .unwrap();
        assert_eq!(after_buy.balance, dec!(99000));
        assert_eq!(after_buy.positions["BTCUSDT"].amount, dec!(0.02));

        let sold = engine
            .sell("alice", PortfolioKind::Main, "BTCUSDT", dec!(0.02), dec!(55000), "take profit", None)
            .await
            .unwrap();
        assert_eq!(sold.trade.pnl, dec!(100));
        assert_eq!(sold.portfolio.balance, dec!(100100));
        assert!(sold.portfolio.positions.is_empty());
    }

    #[tokio::test]
    async fn oversell_leaves_balance_untouched() {
        let engine = engine();
        engine
            .buy("alice", PortfolioKind::Main, "BTCUSDT", dec!(1000), dec!(50000), BuyContext::default())
            .await
            .unwrap();
        let err = engine
            .sell("alice", PortfolioKind::Main, "BTCUSDT", dec!(0.05), dec!(55000), "test", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PortfolioError::InsufficientAmount { .. }));

        let portfolio = engine.portfolio("alice", PortfolioKind::Main).unwrap();
        assert_eq!(portfolio.balance, dec!(99000));
        assert_eq!(portfolio.positions["BTCUSDT"].amount, dec!(0.02));
    }

    #[tokio::test]
    async fn averaging_in_requires_permission() {
        let engine = engine();
        let kind = PortfolioKind::Main;
        engine
            .buy("alice", kind, "ETHUSDT", dec!(1000), dec!(1000), BuyContext::default())
            .await
            .unwrap();
        let err = engine
            .buy("alice", kind, "ETHUSDT", dec!(1000), dec!(2000), BuyContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PortfolioError::PositionExists { .. }));

        let averaged = engine
            .buy(
                "alice",
                kind,
                "ETHUSDT",
                dec!(1000),
                dec!(2000),
                BuyContext {
                    allow_averaging_in: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let position = &averaged.positions["ETHUSDT"];
        assert_eq!(position.amount, dec!(1.5));
        assert_eq!(position.cost_basis().round_dp(8), dec!(2000));
        assert_eq!(averaged.balance, dec!(98000));
    }

    #[tokio::test]
    async fn fees_are_charged_on_both_legs() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.create_user("bob", &Default::default(), dec!(10000)).unwrap();
        let config = ExecutionConfig {
            fee_rate: dec!(0.001),
            ..Default::default()
        };
        let engine = PortfolioEngine::new(store, MemoryStore::in_memory(), &config);

        let bought = engine
            .buy("bob", PortfolioKind::Main, "SOLUSDT", dec!(1000), dec!(100), BuyContext::default())
            .await
            .unwrap();
        assert_eq!(bought.balance, dec!(8999));
        let sold = engine
            .sell("bob", PortfolioKind::Main, "SOLUSDT", dec!(10), dec!(100), "flat", None)
            .await
            .unwrap();
        assert_eq!(sold.trade.pnl, dec!(-1));
        assert_eq!(sold.portfolio.balance, dec!(9998));
    }

    #[tokio::test]
    async fn shadow_portfolio_is_created_on_first_trade() {
        let engine = engine();
        let shadow = engine.portfolio("alice", PortfolioKind::Shadow).unwrap();
        assert_eq!(shadow.balance, dec!(100000));
        assert!(engine.store().portfolio("alice", PortfolioKind::Shadow).unwrap().is_none());

        engine
            .buy("alice", PortfolioKind::Shadow, "BTCUSDT", dec!(500), dec!(50000), BuyContext::default())
            .await
            .unwrap();
        let stored = engine.store().portfolio("alice", PortfolioKind::Shadow).unwrap().unwrap();
        assert_eq!(stored.balance, dec!(99500));
        let main = engine.portfolio("alice", PortfolioKind::Main).unwrap();
        assert_eq!(main.balance, dec!(100000));
    }

    #[tokio::test]
    async fn update_requires_open_position() {
        let engine = engine();
        let err = engine
            .update_position(
                "alice",
                PortfolioKind::Main,
                "BTCUSDT",
                PositionUpdate {
                    hold_count: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PortfolioError::NoSuchPosition { operation: "update", .. }));
    }

    #[tokio::test]
    async fn missing_main_portfolio_is_not_found() {
        let engine = engine();
        let err = engine.portfolio("nobody", PortfolioKind::Main).unwrap_err();
        assert!(matches!(err, PortfolioError::Store(StoreError::NotFound(_))));
    }

    #[test]
    fn narrative_mentions_symbol_and_outcome() {
        let trade = TradeLog {
            id: Uuid::new_v4(),
            user_id: "alice".to_string(),
            kind: PortfolioKind::Main,
            symbol: "SOLUSDT".to_string(),
            side: PositionSide::Long,
            amount: dec!(1),
            entry_price: dec!(100),
            exit_price: dec!(97),
            pnl: dec!(-3),
            pnl_percent: -3.0,
            reason: "Stop-loss hit".to_string(),
            market_context: None,
            applied_risk_parameters: None,
            timestamp: Utc::now(),
        };
        let position = Position {
            symbol: "SOLUSDT".to_string(),
            amount: dec!(1),
            entry_price: dec!(100),
            side: PositionSide::Long,
            stop_loss_price: None,
            take_profit_percent: None,
            hold_count: 0,
            last_hold_price: None,
            applied_risk_parameters: None,
            initial_decision: Some("BUY SOLUSDT: strong trend".to_string()),
            decision_context: None,
            opened_at: Utc::now(),
        };
        let narrative = trade_narrative(&trade, &position);
        assert!(narrative.starts_with("Trade for SOLUSDT. Macro: Neutral."));
        assert!(narrative.contains("-3.00%"));
        assert!(narrative.contains("strong trend"));
    }

    #[tokio::test]
    async fn short_profits_when_price_falls() {
        let engine = engine();
        let kind = PortfolioKind::Main;
        let opened = engine
            .open_short("alice", kind, "SOLUSDT", dec!(1000), dec!(100), BuyContext::default())
            .await
            .unwrap();
        assert_eq!(opened.balance, dec!(99000));
        assert_eq!(opened.positions["SOLUSDT"].side, PositionSide::Short);
        assert_eq!(opened.positions["SOLUSDT"].amount, dec!(10));

        let covered = engine
            .cover("alice", kind, "SOLUSDT", dec!(10), dec!(90), "target", None)
            .await
            .unwrap();
        assert_eq!(covered.trade.pnl, dec!(100));
        assert_eq!(covered.trade.side, PositionSide::Short);
        assert!((covered.trade.pnl_percent - 10.0).abs() < 1e-9);
        assert_eq!(covered.portfolio.balance, dec!(100100));
        assert!(covered.portfolio.positions.is_empty());
    }

    #[tokio::test]
    async fn short_loss_is_capped_at_collateral() {
        let engine = engine();
        let kind = PortfolioKind::Main;
        engine
            .open_short("alice", kind, "SOLUSDT", dec!(1000), dec!(100), BuyContext::default())
            .await
            .unwrap();
        let covered = engine
            .close_position("alice", kind, "SOLUSDT", dec!(300), "squeeze", None)
            .await
            .unwrap();
        assert_eq!(covered.trade.pnl, dec!(-1000));
        assert_eq!(covered.portfolio.balance, dec!(99000));
    }

    #[tokio::test]
    async fn sides_do_not_mix() {
        let engine = engine();
        let kind = PortfolioKind::Main;
        engine
            .open_short("alice", kind, "SOLUSDT", dec!(1000), dec!(100), BuyContext::default())
            .await
            .unwrap();

        let err = engine
            .sell("alice", kind, "SOLUSDT", dec!(10), dec!(90), "wrong side", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PortfolioError::SideMismatch { held: PositionSide::Short, operation: "sell", .. }
        ));
        let err = engine
            .buy(
                "alice",
                kind,
                "SOLUSDT",
                dec!(1000),
                dec!(90),
                BuyContext {
                    allow_averaging_in: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PortfolioError::SideMismatch { operation: "buy", .. }));

        let portfolio = engine.portfolio("alice", kind).unwrap();
        assert_eq!(portfolio.balance, dec!(99000));
        assert_eq!(portfolio.positions["SOLUSDT"].amount, dec!(10));
    }

    #[tokio::test]
    async fn manual_close_remembers_the_human_override() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .create_user("alice", &Default::default(), dec!(100000))
            .unwrap();
        let memory = MemoryStore::in_memory();
        let engine = PortfolioEngine::new(store, memory.clone(), &ExecutionConfig::default());
        engine
            .buy(
                "alice",
                PortfolioKind::Main,
                "SOLUSDT",
                dec!(1000),
                dec!(100),
                BuyContext {
                    reasoning: Some("BUY SOLUSDT: breakout".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let closed = engine
            .close_manually("alice", PortfolioKind::Main, "SOLUSDT", dec!(95), "news risk")
            .await
            .unwrap();
        assert_eq!(closed.trade.pnl, dec!(-50));
        assert_eq!(closed.trade.reason, "news risk");

        let recalled = memory.recall("alice", "Human override SOLUSDT", 5).await.unwrap();
        assert_eq!(recalled.len(), 1);
        let remembered = &recalled[0].memory;
        assert_eq!(remembered.source, MemorySource::Human);
        assert_eq!(remembered.outcome, TradeOutcome::Loss);
        assert!(remembered.narrative.starts_with("Human override on SOLUSDT: closed long -5.00%"));
        assert!(remembered.narrative.contains("Reason: news risk"));
        assert!(remembered.narrative.contains("breakout"));
    }

    #[tokio::test]
    async fn agent_close_is_remembered_as_ai() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .create_user("alice", &Default::default(), dec!(100000))
            .unwrap();
        let memory = MemoryStore::in_memory();
        let engine = PortfolioEngine::new(store, memory.clone(), &ExecutionConfig::default());
        engine
            .open_short("alice", PortfolioKind::Main, "ETHUSDT", dec!(1000), dec!(2000), BuyContext::default())
            .await
            .unwrap();
        engine
            .close_position("alice", PortfolioKind::Main, "ETHUSDT", dec!(1900), "take profit", None)
            .await
            .unwrap();

        let recalled = memory.recall("alice", "ETHUSDT", 5).await.unwrap();
        assert_eq!(recalled.len(), 1);
        assert_eq!(recalled[0].memory.source, MemorySource::Ai);
        assert_eq!(recalled[0].memory.outcome, TradeOutcome::Profit);
        assert!(recalled[0].memory.narrative.starts_with("Short trade for ETHUSDT."));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn position_limit_holds_under_concurrent_opens() {
        let engine = Arc::new(engine());
        let symbols = ["AUSDT", "BUSDT", "CUSDT", "DUSDT", "EUSDT", "FUSDT"];
        let handles: Vec<_> = symbols
            .into_iter()
            .map(|symbol| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine
                        .buy(
                            "alice",
                            PortfolioKind::Main,
                            symbol,
                            dec!(1000),
                            dec!(10),
                            BuyContext {
                                max_positions: Some(2),
                                ..Default::default()
                            },
                        )
                        .await
                })
            })
            .collect();

        let mut opened = 0;
        let mut refused = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => opened += 1,
                Err(PortfolioError::PositionLimit { limit: 2, .. }) => refused += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(opened, 2);
        assert_eq!(refused, 4);
        let portfolio = engine.portfolio("alice", PortfolioKind::Main).unwrap();
        assert_eq!(portfolio.positions.len(), 2);
        assert_eq!(portfolio.balance, dec!(98000));
    }
}
