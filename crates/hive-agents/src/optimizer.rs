use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use hive_models::analysis::{ConfigDelta, MistakePattern, PerformanceReport, WinStats};
use hive_models::config::StrategyConfig;
use hive_models::context::MarketRegime;
use hive_models::logs::{DecisionKind, DecisionLogEntry, MissedOpportunity, TradeLog};
use hive_models::portfolio::PortfolioKind;
use hive_store::Store;
use serde_json::json;
use tracing::info;

use crate::error::AgentError;

/// Closed trades needed before any change is proposed.
pub const MIN_TRADES_FOR_PROPOSAL: usize = 10;
/// Avoids at or above this confidence count as hesitation.
pub const HIGH_CONFIDENCE_AVOID: f64 = 0.7;
const DECISION_HISTORY: usize = 1_000;

/// Everything the optimizer reads for one user.
#[derive(Debug, Clone, Default)]
pub struct TradeHistory {
    pub trades: Vec<TradeLog>,
    pub decisions: Vec<DecisionLogEntry>,
    pub missed: Vec<MissedOpportunity>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn is_stop_out(trade: &TradeLog) -> bool {
    !trade.is_win() && trade.reason.to_lowercase().contains("stop")
}

fn delta(strategy: &StrategyConfig, path: &str, proposed: f64, rationale: String) -> ConfigDelta {
    ConfigDelta {
        path: path.to_string(),
        current: strategy.value_at(path).unwrap_or(serde_json::Value::Null),
        proposed: json!(round2(proposed)),
        rationale,
    }
}

/// Build a read-only report. Deterministic for a given history.
pub fn build_report(user_id: &str, strategy: &StrategyConfig, history: &TradeHistory) -> PerformanceReport {
    let mut overall = WinStats::default();
    let mut by_symbol: BTreeMap<String, WinStats> = BTreeMap::new();
    let mut by_regime: BTreeMap<String, WinStats> = BTreeMap::new();
    let mut wins = Vec::new();
    let mut losses = Vec::new();

    for trade in &history.trades {
        let win = trade.is_win();
        overall.record(win, trade.pnl);
        by_symbol.entry(trade.symbol.clone()).or_default().record(win, trade.pnl);
        let regime = trade
            .market_context
            .as_ref()
            .map(|c| c.regime.as_str())
            .unwrap_or("Unknown");
        by_regime.entry(regime.to_string()).or_default().record(win, trade.pnl);
        if win {
            wins.push(trade.pnl_percent);
        } else {
            losses.push(trade.pnl_percent);
        }
    }

    let risk_off_losses = history
        .trades
        .iter()
        .filter(|t| !t.is_win())
        .filter(|t| t.market_context.as_ref().is_some_and(|c| c.regime == MarketRegime::RiskOff))
        .count();
    let stop_outs = history.trades.iter().filter(|t| is_stop_out(t)).count();
    let hesitant_avoids = history
        .decisions
        .iter()
        .filter(|d| d.decision == DecisionKind::Avoid)
        .filter(|d| d.confidence.is_some_and(|c| c >= HIGH_CONFIDENCE_AVOID))
        .count();

    let mut mistakes = Vec::new();
    if risk_off_losses > 0 {
        mistakes.push(MistakePattern {
            pattern: "losses_under_risk_off".to_string(),
            occurrences: risk_off_losses,
            detail: format!("{risk_off_losses} losing trades were opened in a Risk-Off regime"),
        });
    }
    if stop_outs > 0 {
        mistakes.push(MistakePattern {
            pattern: "stop_outs".to_string(),
            occurrences: stop_outs,
            detail: format!("{stop_outs} of {} losses closed at the stop-loss", losses.len()),
        });
    }
    if hesitant_avoids > 0 {
        mistakes.push(MistakePattern {
            pattern: "high_confidence_avoids".to_string(),
            occurrences: hesitant_avoids,
            detail: format!(
                "{hesitant_avoids} AVOID decisions had confidence of at least {HIGH_CONFIDENCE_AVOID}"
            ),
        });
    }

    let total_trades = history.trades.len();
    let insufficient_data = total_trades < MIN_TRADES_FOR_PROPOSAL;
    let average_win_percent = mean(&wins);
    let average_loss_percent = mean(&losses);
    let mut suggested_changes = Vec::new();

    if !insufficient_data {
        let risk = &strategy.risk_management;
        let win_rate = overall.win_rate();

        if stop_outs >= 3 && stop_outs * 2 >= losses.len() {
            suggested_changes.push(delta(
                strategy,
                "risk_management.stop_loss_percent",
                (risk.stop_loss_percent + 1.0).min(10.0),
                format!("{stop_outs} of {} losses were stop-outs; give trades more room", losses.len()),
            ));
        }

        if win_rate < 0.4 {
            suggested_changes.push(delta(
                strategy,
                "risk_management.min_confidence",
                (risk.min_confidence + 0.05).min(0.9),
                format!("Win rate {:.0}% is low; demand more conviction", win_rate * 100.0),
            ));
        } else if win_rate >= 0.5 && hesitant_avoids >= 5 {
            suggested_changes.push(delta(
                strategy,
                "risk_management.min_confidence",
                (risk.min_confidence - 0.05).max(0.5),
                format!(
                    "{hesitant_avoids} confident setups were skipped while the win rate is {:.0}%",
                    win_rate * 100.0
                ),
            ));
        }

        if risk_off_losses >= 3 {
            suggested_changes.push(delta(
                strategy,
                "risk_management.capital_per_trade_percent",
                (risk.capital_per_trade_percent * 0.8).max(0.5),
                format!("{risk_off_losses} losses came in Risk-Off markets; trade smaller"),
            ));
        }

        if win_rate > 0.6 && !losses.is_empty() && average_win_percent < average_loss_percent.abs() {
            suggested_changes.push(delta(
                strategy,
                "risk_management.take_profit_percent",
                risk.take_profit_percent + 1.0,
                format!(
                    "Average win {average_win_percent:.2}% is smaller than average loss {:.2}%",
                    average_loss_percent.abs()
                ),
            ));
        }
    }

    let analysis_summary = if insufficient_data {
        format!(
            "{total_trades} closed trades; at least {MIN_TRADES_FOR_PROPOSAL} are needed before proposing changes"
        )
    } else {
        format!(
            "{total_trades} trades, win rate {:.0}%, {} mistake patterns, {} proposed changes",
            overall.win_rate() * 100.0,
            mistakes.len(),
            suggested_changes.len()
        )
    };

    PerformanceReport {
        user_id: user_id.to_string(),
        generated_at: Utc::now(),
        total_trades,
        overall,
        by_symbol,
        by_regime,
        average_win_percent,
        average_loss_percent,
        missed_opportunities: history.missed.len(),
        mistakes,
        suggested_changes,
        insufficient_data,
        analysis_summary,
    }
}

/// Reviews a user's MAIN trading history and proposes strategy changes.
pub struct StrategyOptimizer {
    store: Arc<Store>,
}

impl StrategyOptimizer {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    fn history(&self, user_id: &str) -> Result<TradeHistory, AgentError> {
        Ok(TradeHistory {
            trades: self.store.trade_logs(user_id, Some(PortfolioKind::Main))?,
            decisions: self.store.decision_logs(user_id, DECISION_HISTORY)?,
            missed: self
                .store
                .missed_opportunities(user_id, hive_models::logs::MISSED_OPPORTUNITY_RETENTION)?,
        })
    }

    /// Read-only analysis.
    pub async fn report(&self, user_id: &str) -> Result<PerformanceReport, AgentError> {
        let strategy = self.store.strategy_config(user_id).await?;
        let history = self.history(user_id)?;
        Ok(build_report(user_id, &strategy, &history))
    }

    /// Analyse and, when changes are proposed, store them as the pending shadow config.
    pub async fn optimize(&self, user_id: &str) -> Result<PerformanceReport, AgentError> {
        let strategy = self.store.strategy_config(user_id).await?;
        let report = build_report(user_id, &strategy, &self.history(user_id)?);
        if !report.suggested_changes.is_empty() {
            let proposal = strategy.with_deltas(&report.suggested_changes)?;
            self.store.save_strategy_config(user_id, true, &proposal).await?;
            info!(
                user_id,
                changes = report.suggested_changes.len(),
                "Stored shadow strategy proposal"
            );
        }
        Ok(report)
    }
}
