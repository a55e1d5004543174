//! Scripted agents and fixtures for pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use hive_models::agent_message::{AgentKind, AgentRequest, AgentResponse, RiskVerdict};
use hive_models::context::ContextUpdate;
use hive_models::market::Candle;
use hive_models::memory::{MemorySource, RecalledMemory, TradeMemory, TradeOutcome};
use hive_store::{MemoryIndex, StoreError};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::agent::{Agent, AgentContext};
use crate::error::AgentError;

/// An agent with a canned response, optionally failing or slow.
pub struct MockAgent {
    kind: AgentKind,
    confidence: f64,
    fail: bool,
    delay: Option<Duration>,
    analysis: serde_json::Value,
    context_update: Option<ContextUpdate>,
    verdict: Option<RiskVerdict>,
    calls: AtomicUsize,
}

impl MockAgent {
    pub fn new(kind: AgentKind, confidence: f64) -> Self {
        Self {
            kind,
            confidence,
            fail: false,
            delay: None,
            analysis: serde_json::Value::Null,
            context_update: None,
            verdict: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(kind: AgentKind) -> Self {
        Self {
            fail: true,
            ..Self::new(kind, 0.0)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_analysis(mut self, analysis: serde_json::Value) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn with_context_update(mut self, update: ContextUpdate) -> Self {
        self.context_update = Some(update);
        self
    }

    pub fn with_verdict(mut self, verdict: RiskVerdict) -> Self {
        self.verdict = Some(verdict);
        self
    }

    /// Number of `analyze` and consultation calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    async fn analyze(
        &self,
        request: &AgentRequest,
        _ctx: &AgentContext,
    ) -> Result<AgentResponse, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(AgentError::Backend(format!("{} mock failure", self.kind)));
        }
        let mut response = AgentResponse::new(
            request.request_id,
            self.kind,
            self.confidence,
            format!("{} mock response", self.kind),
        );
        response.analysis = self.analysis.clone();
        response.context_update = self.context_update.clone();
        response.verdict = self.verdict.clone();
        Ok(response)
    }
}

/// A TechnicalAnalyst output with the given score.
pub fn technical_response(score: f64, confidence: f64) -> AgentResponse {
    let mut response = AgentResponse::new(
        Uuid::new_v4(),
        AgentKind::Technical,
        confidence,
        format!("score {score:.1}/10"),
    );
    response.analysis = json!({ "technical_score": score, "atr_percent": 1.0 });
    response
}

pub fn memory(symbol: &str, outcome: TradeOutcome, distance: f32) -> RecalledMemory {
    RecalledMemory {
        memory: TradeMemory {
            id: Uuid::new_v4(),
            user_id: "alice".to_string(),
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            outcome,
            pnl_percent: if outcome == TradeOutcome::Loss { -3.0 } else { 4.0 },
            narrative: format!("Trade for {symbol}"),
            source: MemorySource::Ai,
            embedding: Vec::new(),
        },
        distance,
    }
}

/// `n` hourly candles compounding `pct_per_bar` percent from `start`.
pub fn trending_candles(n: usize, start: f64, pct_per_bar: f64) -> Vec<Candle> {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now);
    let factor = 1.0 + pct_per_bar / 100.0;
    (0..n)
        .map(|i| {
            let close = start * factor.powi(i as i32);
            let open = close / factor;
            let d = |v: f64| Decimal::from_f64(v).unwrap_or_default().round_dp(8);
            Candle {
                open_time: base + ChronoDuration::hours(i as i64),
                open: d(open),
                high: d(open.max(close) * 1.002),
                low: d(open.min(close) * 0.998),
                close: d(close),
                volume: Decimal::from(1_000),
            }
        })
        .collect()
}

/// A memory index that never answers within any sane timeout.
pub struct StalledIndex {
    pub delay: Duration,
}

#[async_trait]
impl MemoryIndex for StalledIndex {
    async fn insert(&self, _memory: TradeMemory) -> Result<(), StoreError> {
        Ok(())
    }

    async fn nearest(
        &self,
        _user_id: &str,
        _query: &[f32],
        _k: usize,
    ) -> Result<Vec<RecalledMemory>, StoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }
}
