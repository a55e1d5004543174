use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use hive_market::PriceFeed;
use hive_models::config::StrategyConfig;
use hive_models::context::ContextSnapshot;
use hive_models::decision::{TradeAction, TradeDecision};
use hive_models::logs::{DecisionKind, DecisionLogEntry, MissedOpportunity, TradeLog};
use hive_models::portfolio::{Portfolio, PortfolioKind, PositionSide, PositionUpdate};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{BuyContext, PortfolioEngine, SellAllReport, SellOutcome};
use crate::error::PortfolioError;
use crate::review::{PositionAction, PositionManager};

#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Bought {
        portfolio: Portfolio,
        /// Amount bought by this execution, not the whole position.
        amount: Decimal,
        price: Decimal,
    },
    Shorted {
        portfolio: Portfolio,
        amount: Decimal,
        price: Decimal,
    },
    /// A long was sold or a short was covered.
    Sold {
        portfolio: Portfolio,
        trade: TradeLog,
    },
    Avoided,
    Skipped {
        reason: String,
    },
}

impl ExecutionOutcome {
    /// True when the execution opened or added to a position.
    pub fn opened(&self) -> bool {
        matches!(self, ExecutionOutcome::Bought { .. } | ExecutionOutcome::Shorted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub symbol: String,
    pub amount: Decimal,
    pub price: Decimal,
    pub action: PositionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pnl: Option<Decimal>,
}

/// Turns pipeline decisions into portfolio mutations.
///
/// Only MAIN executions are written to the decision and missed-opportunity
/// logs; SHADOW runs trade silently alongside. Logs written after a committed
/// trade are best-effort: a failed write is reported and the trade stands.
///
/// A BUY covers an open short. A SELL closes an open long, or opens a short
/// when the strategy allows shorting.
pub struct ExecutionService {
    engine: Arc<PortfolioEngine>,
    feed: Arc<dyn PriceFeed>,
    positions: PositionManager,
}

impl ExecutionService {
    pub fn new(engine: Arc<PortfolioEngine>, feed: Arc<dyn PriceFeed>, max_hold_count: u32) -> Self {
        Self {
            engine,
            feed,
            positions: PositionManager::new(max_hold_count),
        }
    }

    pub fn engine(&self) -> &Arc<PortfolioEngine> {
        &self.engine
    }

    async fn price(&self, symbol: &str) -> Result<Decimal, PortfolioError> {
        match self.feed.current_price(symbol).await {
            Ok(Some(price)) if price > Decimal::ZERO => Ok(price),
            Ok(_) => Err(PortfolioError::PriceUnavailable {
                symbol: symbol.to_string(),
                detail: "feed has no quote".to_string(),
            }),
            Err(e) => Err(PortfolioError::PriceUnavailable {
                symbol: symbol.to_string(),
                detail: e.to_string(),
            }),
        }
    }

    pub async fn execute(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        decision: &TradeDecision,
        strategy: &StrategyConfig,
    ) -> Result<ExecutionOutcome, PortfolioError> {
        let outcome = match decision.action {
            TradeAction::Avoid => {
                self.record_avoid(user_id, kind, decision)?;
                return Ok(ExecutionOutcome::Avoided);
            }
            _ if !strategy.trading.trading_enabled => ExecutionOutcome::Skipped {
                reason: "trading disabled".to_string(),
            },
            TradeAction::Buy => self.buy(user_id, kind, decision, strategy).await?,
            TradeAction::Sell => self.sell(user_id, kind, decision, strategy).await?,
        };

        if let ExecutionOutcome::Skipped { reason } = &outcome {
            debug!(user_id, symbol = %decision.symbol, action = %decision.action, reason, "Decision not executed");
        }
        Ok(outcome)
    }

    /// Capital for one new trade, or `None` when nothing is left to allocate.
    fn trade_size(portfolio: &Portfolio, decision: &TradeDecision) -> Option<Decimal> {
        let fraction = Decimal::from_f64(decision.risk_parameters.capital_per_trade_percent / 100.0)
            .unwrap_or_default();
        let usd_amount = (portfolio.balance * fraction).round_dp(2);
        (usd_amount > Decimal::ZERO).then_some(usd_amount)
    }

    fn open_context(
        decision: &TradeDecision,
        strategy: &StrategyConfig,
        stop_loss_price: Option<Decimal>,
    ) -> BuyContext {
        let risk = &strategy.risk_management;
        let params = &decision.risk_parameters;
        BuyContext {
            allow_averaging_in: risk.allow_averaging_in,
            max_positions: Some(risk.max_concurrent_trades),
            stop_loss_price,
            take_profit_percent: Some(params.take_profit_percent),
            risk_parameters: Some(params.clone()),
            reasoning: Some(decision.reasoning.clone()),
            context: Some(decision.context.clone()),
        }
    }

    /// Engine refusals that mean "not now" rather than failure.
    fn skip_reason(err: &PortfolioError) -> Option<String> {
        match err {
            PortfolioError::PositionExists { symbol } => Some(format!("already holding {symbol}")),
            PortfolioError::PositionLimit { limit, .. } => {
                Some(format!("{limit} concurrent trades open"))
            }
            PortfolioError::SideMismatch { symbol, held, .. } => {
                Some(format!("{symbol} is held {held}"))
            }
            _ => None,
        }
    }

    async fn buy(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        decision: &TradeDecision,
        strategy: &StrategyConfig,
    ) -> Result<ExecutionOutcome, PortfolioError> {
        let symbol = decision.symbol.as_str();
        let portfolio = self.engine.portfolio(user_id, kind)?;

        match portfolio.position(symbol) {
            Some(position) if position.side == PositionSide::Short => {
                let reason = format!("Agent BUY covers short: {}", decision.reasoning);
                return self
                    .close(user_id, kind, decision, DecisionKind::Cover, reason)
                    .await;
            }
            Some(_) if !strategy.risk_management.allow_averaging_in => {
                return Ok(ExecutionOutcome::Skipped {
                    reason: format!("already holding {symbol}"),
                });
            }
            _ => {}
        }

        let Some(usd_amount) = Self::trade_size(&portfolio, decision) else {
            return Ok(ExecutionOutcome::Skipped {
                reason: format!("no capital to allocate (balance {})", portfolio.balance),
            });
        };

        let price = self.price(symbol).await?;
        let stop_loss_price = Decimal::from_f64(1.0 - decision.risk_parameters.stop_loss_percent / 100.0)
            .map(|f| (price * f).round_dp(8));
        let ctx = Self::open_context(decision, strategy, stop_loss_price);
        let portfolio = match self
            .engine
            .buy(user_id, kind, symbol, usd_amount, price, ctx)
            .await
        {
            Ok(portfolio) => portfolio,
            Err(e) => {
                return match Self::skip_reason(&e) {
                    Some(reason) => Ok(ExecutionOutcome::Skipped { reason }),
                    None => Err(e),
                };
            }
        };
        let amount = usd_amount / price;

        self.log_trade(user_id, kind, decision, DecisionKind::Buy, decision.reasoning.as_str(), price);
        Ok(ExecutionOutcome::Bought {
            portfolio,
            amount,
            price,
        })
    }

    async fn sell(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        decision: &TradeDecision,
        strategy: &StrategyConfig,
    ) -> Result<ExecutionOutcome, PortfolioError> {
        let symbol = decision.symbol.as_str();
        let portfolio = self.engine.portfolio(user_id, kind)?;
        match portfolio.position(symbol) {
            Some(position) if position.side == PositionSide::Long => {
                let reason = format!("Agent SELL: {}", decision.reasoning);
                self.close(user_id, kind, decision, DecisionKind::Sell, reason)
                    .await
            }
            Some(_) => Ok(ExecutionOutcome::Skipped {
                reason: format!("already short {symbol}"),
            }),
            None if strategy.risk_management.allow_shorting => {
                self.short(user_id, kind, decision, strategy, &portfolio).await
            }
            None => Ok(ExecutionOutcome::Skipped {
                reason: format!("no {symbol} position to sell"),
            }),
        }
    }

    async fn short(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        decision: &TradeDecision,
        strategy: &StrategyConfig,
        portfolio: &Portfolio,
    ) -> Result<ExecutionOutcome, PortfolioError> {
        let symbol = decision.symbol.as_str();
        let Some(usd_amount) = Self::trade_size(portfolio, decision) else {
            return Ok(ExecutionOutcome::Skipped {
                reason: format!("no capital to allocate (balance {})", portfolio.balance),
            });
        };

        let price = self.price(symbol).await?;
        let stop_loss_price = Decimal::from_f64(1.0 + decision.risk_parameters.stop_loss_percent / 100.0)
            .map(|f| (price * f).round_dp(8));
        let ctx = Self::open_context(decision, strategy, stop_loss_price);
        let portfolio = match self
            .engine
            .open_short(user_id, kind, symbol, usd_amount, price, ctx)
            .await
        {
            Ok(portfolio) => portfolio,
            Err(e) => {
                return match Self::skip_reason(&e) {
                    Some(reason) => Ok(ExecutionOutcome::Skipped { reason }),
                    None => Err(e),
                };
            }
        };

        self.log_trade(user_id, kind, decision, DecisionKind::Short, decision.reasoning.as_str(), price);
        Ok(ExecutionOutcome::Shorted {
            portfolio,
            amount: usd_amount / price,
            price,
        })
    }

    /// Close the whole position the decision refers to.
    async fn close(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        decision: &TradeDecision,
        logged_as: DecisionKind,
        reason: String,
    ) -> Result<ExecutionOutcome, PortfolioError> {
        let symbol = decision.symbol.as_str();
        let price = self.price(symbol).await?;
        let outcome = self
            .engine
            .close_position(user_id, kind, symbol, price, &reason, Some(&decision.context))
            .await?;

        self.log_trade(user_id, kind, decision, logged_as, reason, price);
        Ok(ExecutionOutcome::Sold {
            portfolio: outcome.portfolio,
            trade: outcome.trade,
        })
    }

    /// Close `symbol` on a person's instruction at the current feed price.
    pub async fn close_manually(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        symbol: &str,
        reason: &str,
    ) -> Result<SellOutcome, PortfolioError> {
        let price = self.price(symbol).await?;
        let outcome = self
            .engine
            .close_manually(user_id, kind, symbol, price, reason)
            .await?;
        if kind == PortfolioKind::Main {
            let mut entry = DecisionLogEntry::new(user_id, symbol, DecisionKind::ManualClose, reason);
            entry.price = Some(price);
            self.append_log(&entry);
        }
        Ok(outcome)
    }

    fn log_trade(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        decision: &TradeDecision,
        logged_as: DecisionKind,
        reason: impl Into<String>,
        price: Decimal,
    ) {
        if kind != PortfolioKind::Main {
            return;
        }
        let mut entry = DecisionLogEntry::new(user_id, decision.symbol.as_str(), logged_as, reason);
        entry.price = Some(price);
        entry.confidence = Some(decision.confidence);
        self.append_log(&entry);
    }

    /// The trade behind `entry` is already committed; a lost log line must not undo it.
    fn append_log(&self, entry: &DecisionLogEntry) {
        if let Err(e) = self.engine.store().append_decision_log(entry) {
            warn!(
                user_id = %entry.user_id,
                symbol = %entry.symbol,
                decision = %entry.decision,
                error = %e,
                "Failed to write decision log"
            );
        }
    }

    fn record_avoid(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        decision: &TradeDecision,
    ) -> Result<(), PortfolioError> {
        if kind != PortfolioKind::Main {
            return Ok(());
        }
        let store = self.engine.store();
        let mut entry = DecisionLogEntry::new(
            user_id,
            decision.symbol.as_str(),
            DecisionKind::Avoid,
            decision.reasoning.as_str(),
        );
        entry.confidence = Some(decision.confidence);
        store.append_decision_log(&entry)?;
        store.append_missed_opportunity(&MissedOpportunity {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            symbol: decision.symbol.clone(),
            reason: decision.reasoning.clone(),
            confidence: decision.confidence,
            final_summary: decision
                .agent_reports
                .last()
                .map(|r| r.summary.clone())
                .unwrap_or_default(),
            timestamp: Utc::now(),
        })?;
        Ok(())
    }

    /// Check every open position against its stop and take-profit.
    ///
    /// Positions without a quote are skipped with a warning so one stale
    /// symbol cannot block the rest of the review.
    pub async fn review_positions(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        strategy: &StrategyConfig,
        context: &ContextSnapshot,
    ) -> Result<Vec<ReviewOutcome>, PortfolioError> {
        let portfolio = self.engine.portfolio(user_id, kind)?;
        let mut outcomes = Vec::with_capacity(portfolio.positions.len());

        for (symbol, position) in &portfolio.positions {
            let price = match self.price(symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(user_id, symbol = %symbol, error = %e, "Skipping position review");
                    continue;
                }
            };
            let action = self.positions.review(position, price, context, strategy);
            let mut pnl = None;
            match &action {
                PositionAction::Keep => {}
                PositionAction::SellNow { reason } => {
                    let sold = self
                        .engine
                        .close_position(user_id, kind, symbol, price, reason, Some(context))
                        .await?;
                    pnl = Some(sold.trade.pnl);
                    self.log_review(user_id, kind, symbol, DecisionKind::SellNow, reason, price);
                }
                PositionAction::HoldAndIncreaseTp {
                    new_take_profit_percent,
                    reason,
                } => {
                    self.engine
                        .update_position(
                            user_id,
                            kind,
                            symbol,
                            PositionUpdate {
                                take_profit_percent: Some(*new_take_profit_percent),
                                hold_count: Some(position.hold_count + 1),
                                last_hold_price: Some(price),
                                ..Default::default()
                            },
                        )
                        .await?;
                    self.log_review(user_id, kind, symbol, DecisionKind::HoldAndIncreaseTp, reason, price);
                }
            }
            if action != PositionAction::Keep {
                info!(user_id, kind = %kind, symbol = %symbol, ?action, "Position reviewed");
            }
            outcomes.push(ReviewOutcome {
                symbol: symbol.clone(),
                amount: position.amount,
                price,
                action,
                pnl,
            });
        }
        Ok(outcomes)
    }

    fn log_review(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        symbol: &str,
        decision: DecisionKind,
        reason: &str,
        price: Decimal,
    ) {
        if kind != PortfolioKind::Main {
            return;
        }
        let mut entry = DecisionLogEntry::new(user_id, symbol, decision, reason);
        entry.price = Some(price);
        self.append_log(&entry);
    }

    /// Liquidate every open position at current feed prices.
    pub async fn sell_all(
        &self,
        user_id: &str,
        kind: PortfolioKind,
        reason: &str,
    ) -> Result<SellAllReport, PortfolioError> {
        let portfolio = self.engine.portfolio(user_id, kind)?;
        let mut prices = BTreeMap::new();
        for symbol in portfolio.positions.keys() {
            match self.price(symbol).await {
                Ok(price) => {
                    prices.insert(symbol.clone(), price);
                }
                Err(e) => warn!(user_id, symbol = %symbol, error = %e, "No price for sell-all"),
            }
        }
        self.engine.sell_all(user_id, kind, &prices, reason).await
    }

    /// Current equity with every position marked at the feed price when one is available.
    pub async fn equity(&self, user_id: &str, kind: PortfolioKind) -> Result<Decimal, PortfolioError> {
        let portfolio = self.engine.portfolio(user_id, kind)?;
        let mut prices = BTreeMap::new();
        for symbol in portfolio.positions.keys() {
            if let Ok(price) = self.price(symbol).await {
                prices.insert(symbol.clone(), price);
            }
        }
        Ok(portfolio.equity(&prices))
    }
}
