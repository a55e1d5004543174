use std::collections::BTreeMap;
use std::sync::Arc;

use hive_agents::{
    adapt_risk_parameters, AgentError, AgentRegistry, EventSink, MetricsRecorder, Pipeline,
    SharedContext, StrategyOptimizer,
};
use hive_market::{BeginAnalysis, MarketError, OpportunityScanner, PriceFeed, ReplayFeed, Resolution};
use hive_models::{
    Candle, HiveConfig, MarketSignals, Opportunity, OpportunityStatus, PerformanceReport,
    PortfolioKind, PositionSide, ShadowComparison, StrategyConfig, StreamEvent, TradeAction,
    TradeDecision, TradeLog,
};
use hive_portfolio::{
    ExecutionOutcome, ExecutionService, PortfolioEngine, PositionAction, ReviewOutcome,
    SellAllReport,
};
use hive_store::{MemoryStore, Store, StoreError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::EngineError;

/// Result of an on-demand analysis request.
#[derive(Debug, Clone)]
pub enum OnDemand {
    Decided {
        decision: Box<TradeDecision>,
        outcome: ExecutionOutcome,
    },
    /// Another request for the same symbol is still running.
    AlreadyAnalyzing,
    /// The symbol's opportunity was already bought or ignored.
    AlreadyResolved(OpportunityStatus),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub user_id: String,
    pub decisions: usize,
    pub bought: Vec<String>,
    #[serde(default)]
    pub shorted: Vec<String>,
    pub sold: Vec<String>,
    pub avoided: usize,
    pub skipped: Vec<String>,
    pub reviewed: Vec<ReviewOutcome>,
    pub errors: Vec<String>,
}

/// Recorded candles to replay through the full pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestRequest {
    pub user_id: String,
    pub candles: BTreeMap<String, Vec<Candle>>,
    #[serde(default)]
    pub signals: MarketSignals,
    /// Candles visible before the first decision.
    #[serde(default)]
    pub warmup: usize,
    #[serde(default)]
    pub max_steps: Option<usize>,
    /// Defaults to the user's stored strategy, then the configured template.
    #[serde(default)]
    pub strategy: Option<StrategyConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub user_id: String,
    pub steps: usize,
    pub trades: usize,
    pub starting_balance: Decimal,
    pub final_balance: Decimal,
    pub final_equity: Decimal,
    pub return_percent: f64,
    pub cancelled: bool,
}

/// The facade every entry point goes through: on-demand analysis, scheduled
/// cycles, streaming backtests, the optimizer and bot status.
pub struct TradingEngine {
    config: HiveConfig,
    store: Arc<Store>,
    pipeline: Arc<Pipeline>,
    execution: Arc<ExecutionService>,
    scanner: Arc<OpportunityScanner>,
    optimizer: StrategyOptimizer,
    context: SharedContext,
}

impl TradingEngine {
    pub fn new(
        config: HiveConfig,
        store: Arc<Store>,
        registry: Arc<AgentRegistry>,
        feed: Arc<dyn PriceFeed>,
        memory: MemoryStore,
    ) -> Self {
        let pipeline = Arc::new(Pipeline::new(
            registry,
            Arc::clone(&feed),
            memory.clone(),
            MetricsRecorder::new(Arc::clone(&store)),
            config.agents.clone(),
        ));
        let portfolio = Arc::new(PortfolioEngine::new(
            Arc::clone(&store),
            memory,
            &config.execution,
        ));
        let execution = Arc::new(ExecutionService::new(
            portfolio,
            feed,
            config.execution.max_hold_count,
        ));
        Self {
            scanner: Arc::new(OpportunityScanner::new(config.scanner.clone())),
            optimizer: StrategyOptimizer::new(Arc::clone(&store)),
            context: SharedContext::new(),
            config,
            store,
            pipeline,
            execution,
        }
    }

    pub fn config(&self) -> &HiveConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn scanner(&self) -> &Arc<OpportunityScanner> {
        &self.scanner
    }

    pub fn execution(&self) -> &Arc<ExecutionService> {
        &self.execution
    }

    /// Process-wide market context, refreshed by every pipeline run.
    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    /// Create the user's strategy config, MAIN portfolio and bot status.
    /// Returns false when the user already exists.
    pub fn init_user(&self, user_id: &str) -> Result<bool, EngineError> {
        Ok(self.store.create_user(
            user_id,
            &self.config.strategy,
            self.config.execution.starting_balance,
        )?)
    }

    pub fn bot_active(&self, user_id: &str) -> Result<bool, EngineError> {
        Ok(self.store.bot_active(user_id)?)
    }

    pub fn set_bot_active(&self, user_id: &str, active: bool) -> Result<(), EngineError> {
        self.store.set_bot_active(user_id, active)?;
        info!(user_id, active, "Bot status changed");
        Ok(())
    }

    pub fn opportunities(&self) -> Vec<Opportunity> {
        self.scanner.opportunities()
    }

    /// Analyze `symbol` now and act on the decision.
    ///
    /// Concurrent requests for one symbol share a single run: only the caller
    /// that moves the opportunity to `analyzing` runs the pipeline, and it alone
    /// resolves it. A symbol whose opportunity is already resolved is not
    /// analyzed again; its status is returned instead.
    pub async fn analyze_on_demand(&self, user_id: &str, symbol: &str) -> Result<OnDemand, EngineError> {
        let symbol = symbol.to_uppercase();
        match self.scanner.begin_analysis_or_track(&symbol) {
            BeginAnalysis::Started(_) => {}
            BeginAnalysis::AlreadyResolved(status) => {
                debug!(user_id, symbol = %symbol, %status, "Opportunity already resolved");
                return Ok(OnDemand::AlreadyResolved(status));
            }
            other => {
                debug!(user_id, symbol = %symbol, state = ?other, "Analysis already in progress");
                return Ok(OnDemand::AlreadyAnalyzing);
            }
        }

        let result = self.analyze_and_execute(user_id, &symbol).await;
        let resolution = match &result {
            Ok((_, outcome)) if outcome.opened() => Resolution::Bought,
            _ => Resolution::Ignored,
        };
        if let Err(e) = self.scanner.resolve(&symbol, resolution) {
            warn!(symbol = %symbol, error = %e, "Failed to resolve opportunity");
        }

        let (decision, outcome) = result?;
        Ok(OnDemand::Decided {
            decision: Box::new(decision),
            outcome,
        })
    }

    async fn analyze_and_execute(
        &self,
        user_id: &str,
        symbol: &str,
    ) -> Result<(TradeDecision, ExecutionOutcome), EngineError> {
        let strategy = self.store.strategy_config(user_id).await?;
        let decision = self
            .pipeline
            .analyze_symbol(user_id, symbol, &strategy, &self.context)
            .await?;
        let outcome = self.execute(user_id, &decision, &strategy).await?;
        Ok((decision, outcome))
    }

    /// Execute on MAIN, then mirror onto SHADOW when a candidate strategy is pending.
    async fn execute(
        &self,
        user_id: &str,
        decision: &TradeDecision,
        strategy: &StrategyConfig,
    ) -> Result<ExecutionOutcome, EngineError> {
        let outcome = self
            .execution
            .execute(user_id, PortfolioKind::Main, decision, strategy)
            .await?;

        match self.store.shadow_config(user_id).await {
            Ok(Some(shadow)) => {
                let mirrored = shadow_decision(decision, &shadow);
                if let Err(e) = self
                    .execution
                    .execute(user_id, PortfolioKind::Shadow, &mirrored, &shadow)
                    .await
                {
                    warn!(user_id, symbol = %decision.symbol, error = %e, "Shadow execution failed");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(user_id, error = %e, "Failed to load shadow config"),
        }
        Ok(outcome)
    }

    async fn cycle_symbols(&self, strategy: &StrategyConfig) -> Result<Vec<String>, EngineError> {
        if !strategy.trading.symbols_to_analyze.is_empty() {
            return Ok(strategy.trading.symbols_to_analyze.clone());
        }
        Ok(self
            .pipeline
            .feed()
            .top_symbols(strategy.trading.top_candidates)
            .await?)
    }

    /// One scheduled pass for a user: analyze the watch list, review open
    /// positions and execute every decision. Requires an active bot.
    pub async fn run_cycle(&self, user_id: &str) -> Result<CycleReport, EngineError> {
        if !self.store.bot_active(user_id)? {
            return Err(EngineError::BotInactive(user_id.to_string()));
        }
        let strategy = self.store.strategy_config(user_id).await?;
        let mut report = CycleReport {
            user_id: user_id.to_string(),
            ..Default::default()
        };
        if !strategy.trading.trading_enabled {
            info!(user_id, "Trading disabled; skipping cycle");
            return Ok(report);
        }

        let symbols = self.cycle_symbols(&strategy).await?;
        let decisions = self
            .pipeline
            .analyze_symbols(user_id, &symbols, &strategy, &self.context, &EventSink::background())
            .await?;

        if strategy.trading.enable_position_review {
            report.reviewed = self
                .execution
                .review_positions(user_id, PortfolioKind::Main, &strategy, &self.context.snapshot())
                .await?;
        }

        for decision in &decisions {
            let symbol = decision.symbol.clone();
            match self.execute(user_id, decision, &strategy).await {
                Ok(ExecutionOutcome::Bought { .. }) => report.bought.push(symbol),
                Ok(ExecutionOutcome::Shorted { .. }) => report.shorted.push(symbol),
                Ok(ExecutionOutcome::Sold { .. }) => report.sold.push(symbol),
                Ok(ExecutionOutcome::Avoided) => report.avoided += 1,
                Ok(ExecutionOutcome::Skipped { reason }) => {
                    report.skipped.push(format!("{symbol}: {reason}"))
                }
                Err(e) => {
                    warn!(user_id, symbol = %symbol, error = %e, "Execution failed");
                    report.errors.push(format!("{symbol}: {e}"));
                }
            }
        }
        report.decisions = decisions.len();

        info!(
            user_id,
            decisions = report.decisions,
            bought = report.bought.len(),
            shorted = report.shorted.len(),
            sold = report.sold.len(),
            avoided = report.avoided,
            errors = report.errors.len(),
            "Cycle complete"
        );
        Ok(report)
    }

    /// Replay recorded candles through the pipeline against an isolated
    /// portfolio, streaming the transcript, decisions and trades to `sink`.
    /// The stream always ends with `Close`.
    pub async fn backtest(
        &self,
        request: BacktestRequest,
        sink: EventSink,
    ) -> Result<BacktestReport, EngineError> {
        let result = self.run_backtest(request, &sink).await;
        let reason = match &result {
            Ok(report) if report.cancelled => "backtest cancelled".to_string(),
            Ok(_) => "backtest complete".to_string(),
            Err(e) => {
                sink.emit(StreamEvent::error(e.to_string())).await;
                "backtest failed".to_string()
            }
        };
        sink.emit(StreamEvent::close(reason)).await;
        result
    }

    async fn run_backtest(
        &self,
        request: BacktestRequest,
        sink: &EventSink,
    ) -> Result<BacktestReport, EngineError> {
        let user_id = request.user_id;
        let strategy = match request.strategy {
            Some(strategy) => strategy,
            None => match self.store.strategy_config(&user_id).await {
                Ok(strategy) => strategy,
                Err(StoreError::ConfigurationMissing(_)) => self.config.strategy.clone(),
                Err(e) => return Err(e.into()),
            },
        };

        let feed = Arc::new(ReplayFeed::new(request.candles, request.signals));
        if feed.is_empty() {
            return Err(MarketError::Feed("backtest needs at least one candle".to_string()).into());
        }
        let starting_balance = self.config.execution.starting_balance;
        let store = Arc::new(Store::open_in_memory()?);
        store.create_user(&user_id, &strategy, starting_balance)?;
        let memory = MemoryStore::in_memory();
        let pipeline = Pipeline::new(
            Arc::clone(self.pipeline.registry()),
            feed.clone(),
            memory.clone(),
            MetricsRecorder::disabled(),
            self.config.agents.clone(),
        );
        let execution = ExecutionService::new(
            Arc::new(PortfolioEngine::new(store, memory, &self.config.execution)),
            feed.clone(),
            self.config.execution.max_hold_count,
        );

        let symbols = feed.symbols();
        feed.set_cursor(request.warmup.min(feed.len() - 1));
        sink.emit(StreamEvent::log(format!(
            "Backtest for {user_id}: {} symbols, {} candles",
            symbols.len(),
            feed.len()
        )))
        .await;

        let main = PortfolioKind::Main;
        let mut steps = 0;
        let mut trades = 0;
        let mut cancelled = false;
        loop {
            if request.max_steps.is_some_and(|max| steps >= max) {
                break;
            }
            let context = SharedContext::new();
            let decisions = match pipeline
                .analyze_symbols(&user_id, &symbols, &strategy, &context, sink)
                .await
            {
                Ok(decisions) => decisions,
                Err(AgentError::Cancelled(reason)) => {
                    info!(user_id, steps, reason, "Backtest stopped by consumer");
                    cancelled = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            if strategy.trading.enable_position_review {
                let reviewed = execution
                    .review_positions(&user_id, main, &strategy, &context.snapshot())
                    .await?;
                for review in reviewed {
                    if let PositionAction::SellNow { .. } = review.action {
                        trades += 1;
                        let balance_after = execution.engine().portfolio(&user_id, main)?.balance;
                        sink.emit(StreamEvent::Trade {
                            action: TradeAction::Sell,
                            symbol: review.symbol,
                            amount: review.amount,
                            price: review.price,
                            balance_after,
                            pnl: review.pnl,
                        })
                        .await;
                    }
                }
            }

            for decision in &decisions {
                let event = match execution.execute(&user_id, main, decision, &strategy).await {
                    Ok(ExecutionOutcome::Bought {
                        portfolio,
                        amount,
                        price,
                    }) => StreamEvent::Trade {
                        action: TradeAction::Buy,
                        symbol: decision.symbol.clone(),
                        amount,
                        price,
                        balance_after: portfolio.balance,
                        pnl: None,
                    },
                    Ok(ExecutionOutcome::Shorted {
                        portfolio,
                        amount,
                        price,
                    }) => StreamEvent::Trade {
                        action: TradeAction::Sell,
                        symbol: decision.symbol.clone(),
                        amount,
                        price,
                        balance_after: portfolio.balance,
                        pnl: None,
                    },
                    Ok(ExecutionOutcome::Sold { portfolio, trade }) => StreamEvent::Trade {
                        // Covering a short buys it back.
                        action: match trade.side {
                            PositionSide::Long => TradeAction::Sell,
                            PositionSide::Short => TradeAction::Buy,
                        },
                        symbol: trade.symbol,
                        amount: trade.amount,
                        price: trade.exit_price,
                        balance_after: portfolio.balance,
                        pnl: Some(trade.pnl),
                    },
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(user_id, symbol = %decision.symbol, error = %e, "Backtest execution failed");
                        StreamEvent::error(format!("{}: {e}", decision.symbol))
                    }
                };
                if matches!(event, StreamEvent::Trade { .. }) {
                    trades += 1;
                }
                sink.emit(event).await;
            }

            steps += 1;
            if sink.is_closed() {
                cancelled = true;
                break;
            }
            if !feed.advance() {
                break;
            }
        }

        let final_balance = execution.engine().portfolio(&user_id, main)?.balance;
        let final_equity = execution.equity(&user_id, main).await?;
        let return_percent = if starting_balance.is_zero() {
            0.0
        } else {
            ((final_equity - starting_balance) / starting_balance * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0)
        };
        sink.emit(StreamEvent::log(format!(
            "Backtest finished after {steps} steps and {trades} trades; equity {} ({return_percent:+.2}%)",
            final_equity.round_dp(2)
        )))
        .await;

        Ok(BacktestReport {
            user_id,
            steps,
            trades,
            starting_balance,
            final_balance,
            final_equity,
            return_percent,
            cancelled,
        })
    }

    pub async fn performance_report(&self, user_id: &str) -> Result<PerformanceReport, EngineError> {
        Ok(self.optimizer.report(user_id).await?)
    }

    /// Analyze the user's history and store any proposal as the pending SHADOW config.
    pub async fn optimize(&self, user_id: &str) -> Result<PerformanceReport, EngineError> {
        Ok(self.optimizer.optimize(user_id).await?)
    }

    pub async fn compare_shadow(&self, user_id: &str) -> Result<ShadowComparison, EngineError> {
        let main_equity = self.execution.equity(user_id, PortfolioKind::Main).await?;
        let shadow_equity = self.execution.equity(user_id, PortfolioKind::Shadow).await?;
        let shadow_trades = self
            .store
            .trade_logs(user_id, Some(PortfolioKind::Shadow))?
            .len();
        let relative_difference_percent = if main_equity.is_zero() {
            0.0
        } else {
            ((shadow_equity - main_equity) / main_equity * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0)
        };
        Ok(ShadowComparison {
            user_id: user_id.to_string(),
            main_equity,
            shadow_equity,
            relative_difference_percent,
            shadow_trades,
        })
    }

    pub async fn sell_all(&self, user_id: &str) -> Result<SellAllReport, EngineError> {
        Ok(self
            .execution
            .sell_all(user_id, PortfolioKind::Main, "Manual sell-all")
            .await?)
    }

    /// Close a MAIN position on the user's instruction. The closed trade is
    /// remembered as a human override of the agents' entry decision.
    pub async fn close_position(
        &self,
        user_id: &str,
        symbol: &str,
        reason: &str,
    ) -> Result<TradeLog, EngineError> {
        let symbol = symbol.to_uppercase();
        let outcome = self
            .execution
            .close_manually(user_id, PortfolioKind::Main, &symbol, reason)
            .await?;
        info!(user_id, symbol = %symbol, pnl = %outcome.trade.pnl, "Position closed manually");
        Ok(outcome.trade)
    }

    /// Periodic housekeeping.
    pub fn maintenance(&self) -> Result<usize, EngineError> {
        let trimmed = self.store.trim_missed_opportunities()?;
        if trimmed > 0 {
            info!(trimmed, "Trimmed missed opportunities");
        }
        Ok(trimmed)
    }
}

/// The MAIN decision re-sized under the shadow strategy's own risk settings.
fn shadow_decision(decision: &TradeDecision, shadow: &StrategyConfig) -> TradeDecision {
    let mut mirrored = decision.clone();
    mirrored.risk_parameters =
        adapt_risk_parameters(&shadow.risk_management, decision.context.regime_score);
    if mirrored.action == TradeAction::Buy
        && mirrored.confidence < shadow.risk_management.min_confidence
    {
        mirrored.action = TradeAction::Avoid;
    }
    mirrored
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_models::ContextSnapshot;
    use uuid::Uuid;

    fn buy_decision(confidence: f64, regime_score: f64) -> TradeDecision {
        TradeDecision {
            id: Uuid::new_v4(),
            symbol: "SOLUSDT".to_string(),
            action: TradeAction::Buy,
            confidence,
            reasoning: "BUY SOLUSDT".to_string(),
            risk_parameters: adapt_risk_parameters(
                &StrategyConfig::default().risk_management,
                regime_score,
            ),
            context: ContextSnapshot {
                regime_score,
                ..Default::default()
            },
            agent_reports: Vec::new(),
            chat: Vec::new(),
            memories_used: 0,
            degraded: false,
            decided_at: chrono::Utc::now(),
            processing_time_ms: 1,
        }
    }

    #[test]
    fn shadow_resizes_with_its_own_risk_settings() {
        let mut shadow = StrategyConfig::default();
        shadow.risk_management.capital_per_trade_percent = 2.0;
        let mirrored = shadow_decision(&buy_decision(0.8, 5.0), &shadow);
        assert_eq!(mirrored.action, TradeAction::Buy);
        assert!((mirrored.risk_parameters.capital_per_trade_percent - 2.0).abs() < 1e-9);
    }

    #[test]
    fn shadow_with_stricter_confidence_avoids() {
        let mut shadow = StrategyConfig::default();
        shadow.risk_management.min_confidence = 0.9;
        let mirrored = shadow_decision(&buy_decision(0.8, 5.0), &shadow);
        assert_eq!(mirrored.action, TradeAction::Avoid);
    }
}
