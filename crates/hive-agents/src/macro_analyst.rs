use async_trait::async_trait;
use hive_models::agent_message::{AgentKind, AgentRequest, AgentResponse};
use hive_models::context::{ContextUpdate, MarketRegime};
use serde_json::json;

use crate::agent::{Agent, AgentContext};
use crate::error::AgentError;
use crate::indicators::{closes, consecutive_trend, sma, SMA_SHORT};

/// Rule-based market regime assessment from fear & greed, total market cap
/// change and the BTC trend (candles on the request are the BTC history).
#[derive(Debug, Default)]
pub struct MacroAnalyst;

impl MacroAnalyst {
    pub fn new() -> Self {
        Self
    }

    fn assess(request: &AgentRequest) -> (f64, Vec<String>, usize) {
        let signals = &request.signals;
        let mut score = 5.0;
        let mut reasons = Vec::new();
        let mut inputs = 0;

        if let Some(fng) = &signals.fear_and_greed {
            inputs += 1;
            let delta = (f64::from(fng.value) - 50.0) / 50.0 * 2.5;
            score += delta;
            reasons.push(format!(
                "Fear & Greed {} ({}, {delta:+.1})",
                fng.value, fng.classification
            ));
        }

        if let Some(change) = signals.market_cap_change_24h {
            inputs += 1;
            let delta = change.clamp(-5.0, 5.0) * 0.3;
            score += delta;
            reasons.push(format!("Market cap 24h {change:+.2}% ({delta:+.1})"));
        }

        let btc = closes(&request.candles);
        if let (Some(last), Some(sma20)) = (btc.last(), sma(&btc, SMA_SHORT)) {
            inputs += 1;
            if *last > sma20 {
                score += 1.0;
                reasons.push("BTC above SMA20 (+1.0)".to_string());
            } else {
                score -= 1.0;
                reasons.push("BTC below SMA20 (-1.0)".to_string());
            }
            let trend = consecutive_trend(&btc);
            if trend >= 3 {
                score += 0.5;
                reasons.push(format!("BTC {trend} higher closes (+0.5)"));
            } else if trend <= -3 {
                score -= 0.5;
                reasons.push(format!("BTC {} lower closes (-0.5)", -trend));
            }
        }

        (score.clamp(0.0, 10.0), reasons, inputs)
    }
}

#[async_trait]
impl Agent for MacroAnalyst {
    fn kind(&self) -> AgentKind {
        AgentKind::Macro
    }

    async fn analyze(
        &self,
        request: &AgentRequest,
        _ctx: &AgentContext,
    ) -> Result<AgentResponse, AgentError> {
        let (score, reasons, inputs) = Self::assess(request);
        let regime = MarketRegime::from_score(score);
        let confidence = (0.35 + 0.2 * inputs as f64).min(0.95);
        let reasoning = if reasons.is_empty() {
            "No macro inputs available; assuming a neutral market".to_string()
        } else {
            reasons.join(". ")
        };

        let mut response = AgentResponse::new(
            request.request_id,
            AgentKind::Macro,
            confidence,
            format!("Market regime {regime} (score {score:.1}/10)"),
        );
        response.analysis = json!({
            "market_regime": regime.as_str(),
            "regime_score": score,
            "reasoning": reasoning,
        });
        response.context_update = Some(ContextUpdate {
            market_regime: Some(regime),
            regime_score: Some(score),
            fear_and_greed: request.signals.fear_and_greed.clone(),
            ..Default::default()
        });
        Ok(response)
    }

    async fn handle_consultation(
        &self,
        question: &str,
        from: AgentKind,
        request: &AgentRequest,
    ) -> Result<AgentResponse, AgentError> {
        let context = &request.context;
        let fear = context
            .fear_and_greed
            .as_ref()
            .map(|f| format!(", Fear & Greed {}", f.value))
            .unwrap_or_default();

        let (verdict, answer) = match context.market_regime {
            MarketRegime::RiskOff => (
                "trap",
                format!(
                    "Likely a trap. Regime is Risk-Off at {:.1}/10{fear}; strong single-asset \
                     signals rarely hold against the broad market. Preserve capital.",
                    context.regime_score
                ),
            ),
            _ if context.regime_score < 4.0 => (
                "trap",
                format!(
                    "Caution. Regime score {:.1}/10{fear} is weak; treat the signal as suspect.",
                    context.regime_score
                ),
            ),
            _ => (
                "acceptable",
                format!(
                    "Macro is not hostile ({} at {:.1}/10{fear}); the signal can stand on its own.",
                    context.market_regime, context.regime_score
                ),
            ),
        };

        let mut response = AgentResponse::new(request.request_id, AgentKind::Macro, 0.7, answer);
        response.analysis = json!({
            "verdict": verdict,
            "question": question,
            "asked_by": from.name(),
            "regime_score": context.regime_score,
        });
        Ok(response)
    }
}
