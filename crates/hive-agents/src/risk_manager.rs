use async_trait::async_trait;
use hive_models::agent_message::{AgentKind, AgentRequest, AgentResponse, RiskVerdict};
use hive_models::decision::TradeAction;
use hive_models::memory::TradeOutcome;
use hive_models::portfolio::RiskParameters;
use serde_json::json;
use tracing::debug;

use crate::agent::{Agent, AgentContext};
use crate::error::AgentError;

const TECH_WEIGHT: f64 = 0.6;
const REGIME_WEIGHT: f64 = 0.25;
const SENTIMENT_WEIGHT: f64 = 0.15;
const MEMORY_STEP: f64 = 0.05;
const MEMORY_CAP: f64 = 0.15;

/// Technical score above which a Risk-Off regime triggers a macro consultation.
pub const TRAP_TECH_SCORE: f64 = 8.0;
pub const TRAP_REGIME_SCORE: f64 = 4.0;
pub const BUY_TECH_FLOOR: f64 = 6.0;
pub const SELL_TECH_CEILING: f64 = 2.5;

pub fn trap_question(symbol: &str) -> String {
    format!("Excellent tech signal for {symbol} but macro is Risk-Off. Is this a trap?")
}

pub fn recheck_question(symbol: &str, confidence: f64) -> String {
    format!("Technical read on {symbol} is low-confidence ({confidence:.2}). Re-check the setup?")
}

/// Query used to recall similar past trades.
pub fn situation_narrative(symbol: &str, regime: &str, tech_score: f64) -> String {
    format!("Trade for {symbol}. Macro: {regime}, Tech score: {tech_score:.1}")
}

/// Makes the final BUY/SELL/AVOID call from every prior output, the shared
/// context and recalled memories. Consults other analysts on conflicts.
#[derive(Debug)]
pub struct RiskManager {
    consultation_threshold: f64,
    consultation_enabled: bool,
}

impl Default for RiskManager {
    fn default() -> Self {
        Self::new(0.4, true)
    }
}

impl RiskManager {
    pub fn new(consultation_threshold: f64, consultation_enabled: bool) -> Self {
        Self {
            consultation_threshold,
            consultation_enabled,
        }
    }

    /// Signed confidence nudge from similar past trades, weighted by similarity.
    fn memory_adjustment(request: &AgentRequest) -> (f64, usize, usize) {
        let mut adjustment = 0.0;
        let mut losses = 0;
        let mut profits = 0;
        for recalled in &request.memories {
            let similarity = f64::from((1.0 - recalled.distance).clamp(0.0, 1.0));
            match recalled.memory.outcome {
                TradeOutcome::Loss => {
                    losses += 1;
                    adjustment -= MEMORY_STEP * similarity;
                }
                TradeOutcome::Profit => {
                    profits += 1;
                    adjustment += MEMORY_STEP * similarity * 0.6;
                }
                TradeOutcome::MissedOpportunity => {}
            }
        }
        (adjustment.clamp(-MEMORY_CAP, MEMORY_CAP), losses, profits)
    }

    fn stop_loss(base: &RiskParameters, technical: Option<&AgentResponse>) -> f64 {
        // Widen the stop for volatile symbols, at most to twice the base.
        let atr_stop = technical
            .and_then(|t| t.metric("atr_percent"))
            .map(|atr| atr * 1.5)
            .unwrap_or(0.0);
        if atr_stop > base.stop_loss_percent {
            atr_stop.min(base.stop_loss_percent * 2.0)
        } else {
            base.stop_loss_percent
        }
    }
}

#[async_trait]
impl Agent for RiskManager {
    fn kind(&self) -> AgentKind {
        AgentKind::Risk
    }

    async fn analyze(
        &self,
        request: &AgentRequest,
        ctx: &AgentContext,
    ) -> Result<AgentResponse, AgentError> {
        let symbol = request
            .symbol
            .as_deref()
            .ok_or_else(|| AgentError::Backend("risk decision needs a symbol".to_string()))?;
        let context = &request.context;
        let consult = self.consultation_enabled && ctx.can_consult();

        let mut technical = request.prior_from(AgentKind::Technical).cloned();
        if consult {
            if let Some(tech) = &technical {
                if tech.fallback || tech.confidence < self.consultation_threshold {
                    let question = recheck_question(symbol, tech.confidence);
                    if let Some(revised) = ctx
                        .consult(AgentKind::Risk, AgentKind::Technical, &question, request)
                        .await
                    {
                        technical = Some(revised);
                    }
                }
            }
        }
        let tech_score = technical
            .as_ref()
            .and_then(|t| t.metric("technical_score"))
            .unwrap_or(5.0);

        let mut macro_veto = None;
        if consult && tech_score > TRAP_TECH_SCORE && context.regime_score < TRAP_REGIME_SCORE {
            let question = trap_question(symbol);
            if let Some(answer) = ctx
                .consult(AgentKind::Risk, AgentKind::Macro, &question, request)
                .await
            {
                if answer.label("verdict") == Some("trap") {
                    macro_veto = Some(answer.summary.clone());
                }
            }
        }

        let composite = TECH_WEIGHT * tech_score / 10.0
            + REGIME_WEIGHT * context.regime_score / 10.0
            + SENTIMENT_WEIGHT * (context.sentiment_score + 1.0) / 2.0;
        let (memory_adjustment, losses, profits) = Self::memory_adjustment(request);
        let mut confidence = (composite + memory_adjustment).clamp(0.0, 1.0);

        let action = if macro_veto.is_some() {
            confidence *= 0.5;
            TradeAction::Avoid
        } else if tech_score <= SELL_TECH_CEILING {
            TradeAction::Sell
        } else if tech_score >= BUY_TECH_FLOOR && confidence >= request.min_confidence {
            TradeAction::Buy
        } else {
            TradeAction::Avoid
        };

        let base = request.risk_parameters.clone().unwrap_or(RiskParameters {
            capital_per_trade_percent: 5.0,
            stop_loss_percent: 3.0,
            take_profit_percent: 6.0,
        });
        let stop_loss_percent = Self::stop_loss(&base, technical.as_ref());

        let mut factors = vec![
            format!("tech {tech_score:.1}/10"),
            format!("regime {} {:.1}", context.market_regime, context.regime_score),
            format!("sentiment {} {:+.2}", context.sentiment, context.sentiment_score),
        ];
        if !request.memories.is_empty() {
            factors.push(format!(
                "{} similar past trades ({profits} won, {losses} lost, {memory_adjustment:+.2})",
                request.memories.len()
            ));
        }
        if let Some(veto) = &macro_veto {
            factors.push(format!("macro veto: {veto}"));
        }
        if action == TradeAction::Avoid && macro_veto.is_none() && tech_score >= BUY_TECH_FLOOR {
            factors.push(format!(
                "confidence {confidence:.2} below minimum {:.2}",
                request.min_confidence
            ));
        }
        let final_summary = format!("{action} {symbol}: {}", factors.join("; "));
        debug!(symbol, %action, confidence, "Risk decision");

        let mut response =
            AgentResponse::new(request.request_id, AgentKind::Risk, confidence, final_summary.clone());
        response.analysis = json!({
            "decision": action,
            "confidence_score": confidence,
            "composite": composite,
            "memory_adjustment": memory_adjustment,
            "technical_score": tech_score,
            "macro_veto": macro_veto.is_some(),
            "final_summary": final_summary,
        });
        response.verdict = Some(RiskVerdict {
            action,
            stop_loss_percent,
            take_profit_percent: base.take_profit_percent,
        });
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::agent::{ConsultationDesk, MetricsRecorder};
    use crate::macro_analyst::MacroAnalyst;
    use crate::registry::AgentRegistry;
    use crate::test_support::{memory, technical_response};
    use hive_models::agent_message::ChatMessage;
    use hive_models::context::{ContextSnapshot, MarketRegime};

    fn request(tech_score: f64, tech_confidence: f64, regime_score: f64) -> AgentRequest {
        let mut context = ContextSnapshot::default();
        context.regime_score = regime_score;
        context.market_regime = MarketRegime::from_score(regime_score);
        let mut request = AgentRequest::new("alice", context);
        request.symbol = Some("SOLUSDT".to_string());
        request.min_confidence = 0.6;
        request.prior.push(technical_response(tech_score, tech_confidence));
        request
    }

    fn desk() -> Arc<ConsultationDesk> {
        let registry = AgentRegistry::empty().with_agent(Arc::new(MacroAnalyst::new()));
        Arc::new(ConsultationDesk::new(
            Arc::new(registry),
            MetricsRecorder::disabled(),
            Duration::from_secs(1),
        ))
    }

    #[tokio::test]
    async fn strong_setup_in_good_regime_buys() {
        let response = RiskManager::default()
            .analyze(&request(8.5, 0.8, 7.0), &AgentContext::isolated())
            .await
            .unwrap();
        let verdict = response.verdict.unwrap();
        assert_eq!(verdict.action, TradeAction::Buy);
        assert!(response.confidence >= 0.6);
    }

    #[tokio::test]
    async fn weak_technicals_sell() {
        let response = RiskManager::default()
            .analyze(&request(2.0, 0.8, 5.0), &AgentContext::isolated())
            .await
            .unwrap();
        assert_eq!(response.verdict.unwrap().action, TradeAction::Sell);
    }

    #[tokio::test]
    async fn risk_off_trap_is_consulted_and_vetoed() {
        let desk = desk();
        let ctx = AgentContext::with_desk(Arc::clone(&desk));
        let response = RiskManager::default()
            .analyze(&request(9.0, 0.8, 2.0), &ctx)
            .await
            .unwrap();

        assert_eq!(response.verdict.unwrap().action, TradeAction::Avoid);
        assert_eq!(response.analysis["macro_veto"], true);
        let transcript = desk.take_transcript();
        assert_eq!(transcript.len(), 1);
        match &transcript[0] {
            ChatMessage::Consultation {
                from_agent,
                to_agent,
                question,
                ..
            } => {
                assert_eq!(*from_agent, AgentKind::Risk);
                assert_eq!(*to_agent, AgentKind::Macro);
                assert_eq!(
                    question,
                    "Excellent tech signal for SOLUSDT but macro is Risk-Off. Is this a trap?"
                );
            }
            other => panic!("expected consultation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_consultation_without_conflict() {
        let desk = desk();
        let ctx = AgentContext::with_desk(Arc::clone(&desk));
        RiskManager::default()
            .analyze(&request(9.0, 0.8, 6.5), &ctx)
            .await
            .unwrap();
        assert!(desk.take_transcript().is_empty());
    }

    #[tokio::test]
    async fn past_losses_lower_confidence() {
        let base = RiskManager::default()
            .analyze(&request(7.0, 0.8, 6.0), &AgentContext::isolated())
            .await
            .unwrap();

        let mut with_memories = request(7.0, 0.8, 6.0);
        with_memories.memories = vec![
            memory("SOLUSDT", TradeOutcome::Loss, 0.1),
            memory("SOLUSDT", TradeOutcome::Loss, 0.2),
        ];
        let cautious = RiskManager::default()
            .analyze(&with_memories, &AgentContext::isolated())
            .await
            .unwrap();

        assert!(cautious.confidence < base.confidence);
        assert!(cautious.summary.contains("2 lost"));
    }

    #[tokio::test]
    async fn missing_symbol_is_an_error() {
        let mut request = request(7.0, 0.8, 6.0);
        request.symbol = None;
        let result = RiskManager::default()
            .analyze(&request, &AgentContext::isolated())
            .await;
        assert!(matches!(result, Err(AgentError::Backend(_))));
    }
}
