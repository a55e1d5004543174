use hive_models::config::StrategyConfig;
use hive_models::context::{ContextSnapshot, MarketRegime, Sentiment};
use hive_models::portfolio::{Position, PositionSide};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionAction {
    Keep,
    SellNow {
        reason: String,
    },
    HoldAndIncreaseTp {
        new_take_profit_percent: f64,
        reason: String,
    },
}

/// Decides what to do with an open position at the current price.
///
/// A breached stop always closes. A reached take-profit is extended by
/// `hold_increment_percent` while the market still favours the position and
/// the hold budget is not spent; otherwise the profit is taken. Longs are
/// favoured by Risk-On without bearish sentiment, shorts by Risk-Off without
/// bullish sentiment. A short's stop sits above its entry.
#[derive(Debug, Clone)]
pub struct PositionManager {
    max_hold_count: u32,
}

impl PositionManager {
    pub fn new(max_hold_count: u32) -> Self {
        Self { max_hold_count }
    }

    pub fn review(
        &self,
        position: &Position,
        price: Decimal,
        context: &ContextSnapshot,
        strategy: &StrategyConfig,
    ) -> PositionAction {
        let risk = &strategy.risk_management;
        let applied = position.applied_risk_parameters.as_ref();

        let short = position.side == PositionSide::Short;
        let stop_price = position.stop_loss_price.or_else(|| {
            let stop_percent = applied.map_or(risk.stop_loss_percent, |p| p.stop_loss_percent);
            let factor = if short {
                1.0 + stop_percent / 100.0
            } else {
                1.0 - stop_percent / 100.0
            };
            Decimal::from_f64(factor).map(|f| position.entry_price * f)
        });
        if let Some(stop) = stop_price {
            let breached = if short { price >= stop } else { price <= stop };
            if breached {
                return PositionAction::SellNow {
                    reason: format!("Stop-loss hit at {price} (stop {})", stop.round_dp(8)),
                };
            }
        }

        let take_profit = position
            .take_profit_percent
            .unwrap_or_else(|| applied.map_or(risk.take_profit_percent, |p| p.take_profit_percent));
        let pnl_percent = position.pnl_percent(price);
        if pnl_percent < take_profit {
            return PositionAction::Keep;
        }

        let favourable = if short {
            context.market_regime == MarketRegime::RiskOff && context.sentiment != Sentiment::Bullish
        } else {
            context.market_regime == MarketRegime::RiskOn && context.sentiment != Sentiment::Bearish
        };
        if favourable && position.hold_count < self.max_hold_count {
            let new_take_profit_percent =
                take_profit + strategy.trading.take_profit_hold_increment_percent;
            PositionAction::HoldAndIncreaseTp {
                new_take_profit_percent,
                reason: format!(
                    "Take-profit {take_profit:.2}% reached at {pnl_percent:.2}% in a {} market; \
                     raising target to {new_take_profit_percent:.2}% (hold {} of {})",
                    context.market_regime,
                    position.hold_count + 1,
                    self.max_hold_count
                ),
            }
        } else {
            PositionAction::SellNow {
                reason: format!("Take-profit reached at {pnl_percent:.2}% (target {take_profit:.2}%)"),
            }
        }
    }
}
