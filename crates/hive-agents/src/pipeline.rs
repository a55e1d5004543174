use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use hive_market::PriceFeed;
use hive_models::agent_message::{AgentKind, AgentRequest, AgentResponse, ChatMessage};
use hive_models::config::{AgentsConfig, StrategyConfig};
use hive_models::decision::{AgentReport, TradeAction, TradeDecision};
use hive_models::events::StreamEvent;
use hive_models::market::{Candle, MarketSignals};
use hive_models::memory::RecalledMemory;
use hive_store::MemoryStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{timed_call, AgentContext, ConsultationDesk, MetricsRecorder};
use crate::context::SharedContext;
use crate::error::AgentError;
use crate::registry::AgentRegistry;
use crate::risk::adapt_risk_parameters;
use crate::risk_manager::situation_narrative;

/// Symbol whose candles the MacroAnalyst reads as the market trend.
pub const MARKET_BENCHMARK: &str = "BTCUSDT";

/// Where a run reports progress. Background runs have no consumer and never
/// stop early; streaming runs stop once the consumer goes away.
#[derive(Clone, Default)]
pub struct EventSink {
    events: Option<mpsc::Sender<StreamEvent>>,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn background() -> Self {
        Self::default()
    }

    pub fn streaming(events: mpsc::Sender<StreamEvent>, cancel: CancellationToken) -> Self {
        Self {
            events: Some(events),
            cancel,
        }
    }

    /// True once the consumer cancelled or dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.events.as_ref().is_some_and(|tx| tx.is_closed())
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Deliver an event. A failed send marks the sink closed.
    pub async fn emit(&self, event: StreamEvent) -> bool {
        let Some(tx) = &self.events else {
            return true;
        };
        if self.cancel.is_cancelled() {
            return false;
        }
        if tx.send(event).await.is_err() {
            self.cancel.cancel();
            return false;
        }
        true
    }

    /// Resolves once the sink is closed. Background sinks never close.
    pub async fn closed(&self) {
        match &self.events {
            Some(tx) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tx.closed() => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    fn ensure_open(&self) -> Result<(), AgentError> {
        if self.is_closed() {
            Err(AgentError::Cancelled("stream consumer disconnected".to_string()))
        } else {
            Ok(())
        }
    }
}

/// What one run has produced so far.
#[derive(Default)]
struct RunLog {
    prior: Vec<AgentResponse>,
    reports: Vec<AgentReport>,
    chat: Vec<ChatMessage>,
    degraded: bool,
}

impl RunLog {
    /// Record an agent outcome, substituting a neutral fallback on failure.
    fn record(
        &mut self,
        kind: AgentKind,
        symbol: Option<&str>,
        request_id: Uuid,
        (result, elapsed): (Result<AgentResponse, AgentError>, Duration),
    ) -> AgentResponse {
        let response = match result {
            Ok(response) => {
                info!(agent = %kind, symbol = ?symbol, confidence = response.confidence, elapsed_ms = elapsed.as_millis(), "Agent succeeded");
                self.chat.push(ChatMessage::Direct {
                    agent: kind,
                    symbol: symbol.map(str::to_string),
                    prompt: response.prompt.clone(),
                    response: response.summary.clone(),
                });
                response
            }
            Err(e) => {
                warn!(agent = %kind, symbol = ?symbol, error = %e, elapsed_ms = elapsed.as_millis(), "Agent failed, using neutral fallback");
                self.chat.push(ChatMessage::Failure {
                    agent: kind,
                    error: e.to_string(),
                });
                self.degraded = true;
                AgentResponse::neutral_fallback(request_id, kind, &e.to_string())
            }
        };
        self.reports.push(AgentReport {
            agent: kind,
            confidence: response.confidence,
            summary: response.summary.clone(),
            fallback: response.fallback,
            elapsed_ms: elapsed.as_millis() as u64,
        });
        self.prior.push(response.clone());
        response
    }
}

/// Per-call inputs shared by every stage of one run.
struct RunScope<'a> {
    user_id: &'a str,
    strategy: &'a StrategyConfig,
    context: &'a SharedContext,
    deadline: Instant,
    sink: &'a EventSink,
}

/// Market-wide stage of a run: Macro and Sentiment outputs, shared by every symbol.
struct MarketStage {
    signals: MarketSignals,
    log: RunLog,
}

/// Runs Macro and Sentiment, then Technical and Risk per symbol, and turns
/// the RiskManager's verdict into a [`TradeDecision`].
pub struct Pipeline {
    registry: Arc<AgentRegistry>,
    feed: Arc<dyn PriceFeed>,
    memory: MemoryStore,
    metrics: MetricsRecorder,
    config: AgentsConfig,
}

impl Pipeline {
    pub fn new(
        registry: Arc<AgentRegistry>,
        feed: Arc<dyn PriceFeed>,
        memory: MemoryStore,
        metrics: MetricsRecorder,
        config: AgentsConfig,
    ) -> Self {
        Self {
            registry,
            feed,
            memory,
            metrics,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn feed(&self) -> &Arc<dyn PriceFeed> {
        &self.feed
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    fn agent_timeout(&self, deadline: Instant) -> Duration {
        Duration::from_secs(self.config.agent_timeout_seconds)
            .min(deadline.saturating_duration_since(Instant::now()))
    }

    /// One agent invocation, abandoned as soon as the sink closes.
    async fn call(
        &self,
        kind: AgentKind,
        request: &AgentRequest,
        ctx: &AgentContext,
        scope: &RunScope<'_>,
    ) -> (Result<AgentResponse, AgentError>, Duration) {
        let Some(agent) = self.registry.get(kind) else {
            return (
                Err(AgentError::UnknownAgent(kind.name().to_string())),
                Duration::ZERO,
            );
        };
        let started = Instant::now();
        let work = timed_call(
            kind,
            self.agent_timeout(scope.deadline),
            &self.metrics,
            agent.analyze(request, ctx),
        );
        tokio::select! {
            outcome = work => outcome,
            _ = scope.sink.closed() => {
                info!(agent = %kind, "Stream consumer gone, abandoning agent call");
                (
                    Err(AgentError::Cancelled(format!("{kind} call abandoned"))),
                    started.elapsed(),
                )
            }
        }
    }

    async fn candles(&self, symbol: &str, strategy: &StrategyConfig) -> Vec<Candle> {
        let trading = &strategy.trading;
        match self
            .feed
            .historical_data(symbol, &trading.kline_interval, trading.kline_limit)
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                warn!(symbol, error = %e, "Failed to load candles");
                Vec::new()
            }
        }
    }

    /// Macro and Sentiment run concurrently; they write disjoint context fields.
    async fn assess_market(&self, scope: &RunScope<'_>) -> MarketStage {
        let (user_id, context) = (scope.user_id, scope.context);
        let signals = match self.feed.market_signals().await {
            Ok(signals) => signals,
            Err(e) => {
                warn!(error = %e, "Market signals unavailable");
                MarketSignals::default()
            }
        };
        let benchmark = self.candles(MARKET_BENCHMARK, scope.strategy).await;

        let snapshot = context.snapshot();
        let mut macro_request = AgentRequest::new(user_id, snapshot.clone());
        macro_request.signals = signals.clone();
        macro_request.candles = benchmark;
        let mut sentiment_request = AgentRequest::new(user_id, snapshot);
        sentiment_request.signals = signals.clone();

        let isolated = AgentContext::isolated();
        let (macro_outcome, sentiment_outcome) = tokio::join!(
            self.call(AgentKind::Macro, &macro_request, &isolated, scope),
            self.call(AgentKind::Sentiment, &sentiment_request, &isolated, scope),
        );

        let mut log = RunLog::default();
        for (kind, request_id, outcome) in [
            (AgentKind::Macro, macro_request.request_id, macro_outcome),
            (AgentKind::Sentiment, sentiment_request.request_id, sentiment_outcome),
        ] {
            let response = log.record(kind, None, request_id, outcome);
            if let Some(update) = response.context_update {
                context.update_from(kind, update);
            }
        }
        MarketStage { signals, log }
    }

    async fn recall(&self, user_id: &str, query: &str) -> Option<Vec<RecalledMemory>> {
        let timeout = Duration::from_millis(self.config.memory_timeout_ms);
        let k = self.config.memory_recall_k;
        match tokio::time::timeout(timeout, self.memory.recall(user_id, query, k)).await {
            Ok(Ok(memories)) => Some(memories),
            Ok(Err(e)) => {
                warn!(user_id, error = %e, "Memory recall failed, continuing without memories");
                None
            }
            Err(_) => {
                warn!(user_id, timeout_ms = timeout.as_millis(), "Memory recall timed out, continuing without memories");
                None
            }
        }
    }

    /// Technical then Risk for one symbol.
    async fn decide(
        &self,
        scope: &RunScope<'_>,
        symbol: &str,
        market: &MarketStage,
    ) -> Result<TradeDecision, AgentError> {
        let RunScope {
            user_id,
            strategy,
            context,
            deadline,
            sink,
        } = *scope;
        let start = Instant::now();
        let mut log = RunLog {
            prior: market.log.prior.clone(),
            reports: market.log.reports.clone(),
            chat: Vec::new(),
            degraded: market.log.degraded,
        };
        let candles = self.candles(symbol, strategy).await;
        let snapshot = context.snapshot();

        sink.ensure_open()?;
        let mut technical_request = AgentRequest::new(user_id, snapshot.clone());
        technical_request.symbol = Some(symbol.to_string());
        technical_request.candles = candles.clone();
        let outcome = self
            .call(AgentKind::Technical, &technical_request, &AgentContext::isolated(), scope)
            .await;
        sink.ensure_open()?;
        let technical = log.record(AgentKind::Technical, Some(symbol), technical_request.request_id, outcome);
        let tech_score = technical.metric("technical_score").unwrap_or(5.0);

        let query = situation_narrative(symbol, snapshot.market_regime.as_str(), tech_score);
        let memories = match self.recall(user_id, &query).await {
            Some(memories) => memories,
            None => {
                log.degraded = true;
                Vec::new()
            }
        };

        let adapted = adapt_risk_parameters(&strategy.risk_management, snapshot.regime_score);
        let mut risk_request = AgentRequest::new(user_id, snapshot.clone());
        risk_request.symbol = Some(symbol.to_string());
        risk_request.signals = market.signals.clone();
        risk_request.candles = candles;
        risk_request.prior = log.prior.clone();
        risk_request.memories = memories;
        risk_request.risk_parameters = Some(adapted.clone());
        risk_request.min_confidence = strategy.risk_management.min_confidence;

        sink.ensure_open()?;
        let desk = Arc::new(ConsultationDesk::new(
            Arc::clone(&self.registry),
            self.metrics.clone(),
            self.agent_timeout(deadline),
        ));
        let ctx = if self.config.consultation_enabled {
            AgentContext::with_desk(Arc::clone(&desk))
        } else {
            AgentContext::isolated()
        };
        let outcome = self.call(AgentKind::Risk, &risk_request, &ctx, scope).await;
        sink.ensure_open()?;
        log.chat.extend(desk.take_transcript());
        let risk = log.record(AgentKind::Risk, Some(symbol), risk_request.request_id, outcome);

        let mut risk_parameters = adapted;
        let action = match &risk.verdict {
            Some(verdict) => {
                risk_parameters.stop_loss_percent = verdict.stop_loss_percent;
                risk_parameters.take_profit_percent = verdict.take_profit_percent;
                verdict.action
            }
            None => TradeAction::Avoid,
        };

        let mut chat = market.log.chat.clone();
        chat.append(&mut log.chat);
        let decision = TradeDecision {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            action,
            confidence: risk.confidence,
            reasoning: risk.summary.clone(),
            risk_parameters,
            context: context.snapshot(),
            agent_reports: log.reports,
            chat,
            memories_used: risk_request.memories.len(),
            degraded: log.degraded,
            decided_at: Utc::now(),
            processing_time_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            symbol,
            action = %decision.action,
            confidence = decision.confidence,
            degraded = decision.degraded,
            elapsed_ms = start.elapsed().as_millis(),
            "Decision complete"
        );
        Ok(decision)
    }

    /// Full pipeline for each symbol. The market stage runs once per call.
    ///
    /// Streaming runs emit the agent transcript and each decision as they are
    /// produced and stop issuing agent calls once the sink closes.
    pub async fn analyze_symbols(
        &self,
        user_id: &str,
        symbols: &[String],
        strategy: &StrategyConfig,
        context: &SharedContext,
        sink: &EventSink,
    ) -> Result<Vec<TradeDecision>, AgentError> {
        let scope = RunScope {
            user_id,
            strategy,
            context,
            deadline: Instant::now() + Duration::from_secs(self.config.total_timeout_seconds),
            sink,
        };
        sink.ensure_open()?;
        let market = self.assess_market(&scope).await;
        sink.ensure_open()?;
        for message in &market.log.chat {
            sink.emit(StreamEvent::AiChat {
                message: message.clone(),
            })
            .await;
        }

        let mut decisions = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            sink.ensure_open()?;
            let decision = self.decide(&scope, symbol, &market).await?;
            for message in &decision.chat[market.log.chat.len()..] {
                sink.emit(StreamEvent::AiChat {
                    message: message.clone(),
                })
                .await;
            }
            sink.emit(StreamEvent::Analysis {
                decision: Box::new(decision.clone()),
            })
            .await;
            decisions.push(decision);
        }
        Ok(decisions)
    }

    /// Background run for a single symbol.
    pub async fn analyze_symbol(
        &self,
        user_id: &str,
        symbol: &str,
        strategy: &StrategyConfig,
        context: &SharedContext,
    ) -> Result<TradeDecision, AgentError> {
        let symbols = [symbol.to_string()];
        self.analyze_symbols(user_id, &symbols, strategy, context, &EventSink::background())
            .await?
            .pop()
            .ok_or_else(|| AgentError::Backend(format!("no decision produced for {symbol}")))
    }
}
