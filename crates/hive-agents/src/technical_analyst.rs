use async_trait::async_trait;
use hive_models::agent_message::{AgentKind, AgentRequest, AgentResponse};
use serde_json::json;
use tracing::debug;

use crate::agent::{Agent, AgentContext};
use crate::error::AgentError;
use crate::indicators::{
    atr, closes, consecutive_trend, macd, rsi, sma, ATR_PERIOD, MACD_FAST, MACD_SIGNAL, MACD_SLOW,
    RSI_PERIOD, SMA_LONG, SMA_SHORT,
};

/// Candles a consultation re-reads: enough for MACD, too few for SMA50.
pub const RECHECK_WINDOW: usize = 40;

/// Indicator readings for one symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TechnicalReading {
    pub score: f64,
    pub trend: &'static str,
    pub momentum: &'static str,
    pub rsi: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub sma20: Option<f64>,
    pub sma50: Option<f64>,
    pub atr_percent: Option<f64>,
    pub notes: Vec<String>,
    /// False when the history is too short for every indicator.
    pub complete: bool,
}

/// Scores a symbol 0-10 from RSI, MACD, SMA20/50, ATR and the close trend.
#[derive(Debug, Default)]
pub struct TechnicalAnalyst;

impl TechnicalAnalyst {
    pub fn new() -> Self {
        Self
    }

    pub fn read(request: &AgentRequest) -> TechnicalReading {
        let values = closes(&request.candles);
        let mut reading = TechnicalReading {
            score: 5.0,
            ..Default::default()
        };
        let last = values.last().copied().unwrap_or(0.0);

        reading.rsi = rsi(&values, RSI_PERIOD);
        if let Some(r) = reading.rsi {
            // Trend-following: strength is rewarded until it gets stretched.
            let delta = if r > 80.0 {
                0.0
            } else if r > 70.0 {
                0.5
            } else if r >= 50.0 {
                1.0
            } else if r >= 30.0 {
                -0.5
            } else {
                -1.0
            };
            reading.score += delta;
            reading.notes.push(format!("RSI {r:.0} ({delta:+.1})"));
        }

        let m = macd(&values, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        if let Some(m) = m {
            let histogram = if m.histogram > 0.0 { 1.0 } else { -1.0 };
            let line = if m.line > 0.0 { 0.5 } else { -0.5 };
            let delta = histogram + line;
            reading.score += delta;
            reading.macd_histogram = Some(m.histogram);
            reading.notes.push(format!("MACD histogram {:.4} ({delta:+.1})", m.histogram));
        }
        reading.momentum = match m {
            Some(m) if m.histogram > 0.0 && m.line > 0.0 => "Bullish",
            Some(m) if m.histogram < 0.0 && m.line < 0.0 => "Bearish",
            _ => "Neutral",
        };

        reading.sma20 = sma(&values, SMA_SHORT);
        reading.sma50 = sma(&values, SMA_LONG);
        if let (Some(short), Some(long)) = (reading.sma20, reading.sma50) {
            let delta = if short > long { 1.0 } else { -1.0 };
            reading.score += delta;
            reading.notes.push(format!("SMA20 {short:.2} vs SMA50 {long:.2} ({delta:+.1})"));
        }
        if let Some(short) = reading.sma20 {
            let delta = if last > short { 0.5 } else { -0.5 };
            reading.score += delta;
        }

        let trend = consecutive_trend(&values);
        if trend >= 3 {
            reading.score += 1.0;
            reading.notes.push(format!("{trend} higher closes (+1.0)"));
        } else if trend <= -3 {
            reading.score -= 1.0;
            reading.notes.push(format!("{} lower closes (-1.0)", -trend));
        }
        reading.trend = match (reading.sma20, reading.sma50) {
            (Some(s), Some(l)) if s > l && trend >= 0 => "Uptrend",
            (Some(s), Some(l)) if s < l && trend <= 0 => "Downtrend",
            _ if trend >= 3 => "Uptrend",
            _ if trend <= -3 => "Downtrend",
            _ => "Sideways",
        };

        if last > 0.0 {
            reading.atr_percent = atr(&request.candles, ATR_PERIOD).map(|a| a / last * 100.0);
        }
        reading.complete = reading.sma50.is_some() && reading.macd_histogram.is_some();
        reading.score = reading.score.clamp(0.0, 10.0);
        reading
    }

    fn respond(request: &AgentRequest, reading: &TechnicalReading, summary_prefix: &str) -> AgentResponse {
        let symbol = request.symbol.as_deref().unwrap_or("symbol");
        let decisiveness = (reading.score - 5.0).abs() / 5.0;
        let mut confidence = 0.4 + 0.5 * decisiveness;
        if !reading.complete {
            confidence *= 0.6;
        }

        let mut response = AgentResponse::new(
            request.request_id,
            AgentKind::Technical,
            confidence,
            format!(
                "{summary_prefix}{symbol}: score {:.1}/10, {}, {} momentum",
                reading.score, reading.trend, reading.momentum
            ),
        );
        response.analysis = json!({
            "technical_score": reading.score,
            "trend": reading.trend,
            "momentum": reading.momentum,
            "rsi": reading.rsi,
            "macd_histogram": reading.macd_histogram,
            "sma20": reading.sma20,
            "sma50": reading.sma50,
            "atr_percent": reading.atr_percent,
            "notes": reading.notes,
        });
        response
    }
}

#[async_trait]
impl Agent for TechnicalAnalyst {
    fn kind(&self) -> AgentKind {
        AgentKind::Technical
    }

    async fn analyze(
        &self,
        request: &AgentRequest,
        _ctx: &AgentContext,
    ) -> Result<AgentResponse, AgentError> {
        if request.candles.len() < 2 {
            return Err(AgentError::Backend(format!(
                "not enough candles for {}",
                request.symbol.as_deref().unwrap_or("request")
            )));
        }
        let reading = Self::read(request);
        Ok(Self::respond(request, &reading, ""))
    }

    /// Re-reads only the most recent [`RECHECK_WINDOW`] candles and reports
    /// whether the short-horizon signal agrees with the full-history one.
    /// A diverging signal lowers confidence.
    async fn handle_consultation(
        &self,
        question: &str,
        from: AgentKind,
        request: &AgentRequest,
    ) -> Result<AgentResponse, AgentError> {
        if request.candles.len() < 2 {
            return Err(AgentError::Backend("no price history to re-check".to_string()));
        }
        debug!(%from, question, "Re-checking technical read on recent candles");
        let full = Self::read(request);

        let start = request.candles.len().saturating_sub(RECHECK_WINDOW);
        let mut recent_request = request.clone();
        recent_request.candles = request.candles[start..].to_vec();
        let recent = Self::read(&recent_request);

        let same_side = (recent.score - 5.0) * (full.score - 5.0) >= 0.0;
        let holds = same_side && (recent.score - full.score).abs() < 2.0;

        let mut response = Self::respond(&recent_request, &recent, "Re-checked ");
        if !holds {
            response.confidence *= 0.7;
        }
        response.summary = format!(
            "{} over the last {} candles vs {:.1} on full history; {}",
            response.summary,
            recent_request.candles.len(),
            full.score,
            if holds {
                "the signal holds"
            } else {
                "recent action diverges from the trend"
            }
        );
        if let Some(analysis) = response.analysis.as_object_mut() {
            analysis.insert("window".to_string(), json!(recent_request.candles.len()));
            analysis.insert("full_history_score".to_string(), json!(full.score));
            analysis.insert("signal_holds".to_string(), json!(holds));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::trending_candles;
    use hive_models::context::ContextSnapshot;

    fn request(candles: Vec<hive_models::market::Candle>) -> AgentRequest {
        let mut request = AgentRequest::new("alice", ContextSnapshot::default());
        request.symbol = Some("SOLUSDT".to_string());
        request.candles = candles;
        request
    }

    #[tokio::test]
    async fn strong_uptrend_scores_high() {
        let response = TechnicalAnalyst
            .analyze(&request(trending_candles(100, 100.0, 1.0)), &AgentContext::isolated())
            .await
            .unwrap();
        let score = response.metric("technical_score").unwrap();
        assert!(score > 8.0, "score {score}");
        assert_eq!(response.label("trend"), Some("Uptrend"));
        assert_eq!(response.label("momentum"), Some("Bullish"));
        assert!(response.confidence > 0.6);
    }

    #[tokio::test]
    async fn downtrend_scores_low() {
        let response = TechnicalAnalyst
            .analyze(&request(trending_candles(100, 100.0, -1.0)), &AgentContext::isolated())
            .await
            .unwrap();
        let score = response.metric("technical_score").unwrap();
        assert!(score <= 2.5, "score {score}");
        assert_eq!(response.label("trend"), Some("Downtrend"));
    }

    #[tokio::test]
    async fn short_history_is_low_confidence() {
        let response = TechnicalAnalyst
            .analyze(&request(trending_candles(10, 100.0, 0.5)), &AgentContext::isolated())
            .await
            .unwrap();
        assert!(response.confidence < 0.4);
        assert!(response.metric("sma50").is_none());
    }

    #[tokio::test]
    async fn no_candles_is_an_error() {
        let result = TechnicalAnalyst
            .analyze(&request(Vec::new()), &AgentContext::isolated())
            .await;
        assert!(matches!(result, Err(AgentError::Backend(_))));
    }

    #[tokio::test]
    async fn consultation_rereads_the_recent_window() {
        // A long rally that has just rolled over.
        let mut candles = trending_candles(100, 100.0, 1.0);
        candles.extend(trending_candles(RECHECK_WINDOW, 270.0, -1.0));
        let recent = TechnicalAnalyst::read(&request(
            candles[candles.len() - RECHECK_WINDOW..].to_vec(),
        ));
        let request = request(candles);
        let full = TechnicalAnalyst::read(&request);

        let recheck = TechnicalAnalyst
            .handle_consultation("Re-check the setup?", AgentKind::Risk, &request)
            .await
            .unwrap();

        assert_eq!(recheck.metric("window"), Some(RECHECK_WINDOW as f64));
        assert_eq!(recheck.metric("technical_score"), Some(recent.score));
        assert_eq!(recheck.metric("full_history_score"), Some(full.score));
        // The window is too short for the long average.
        assert!(recheck.metric("sma50").is_none());
        assert!(full.sma50.is_some());
        assert!(recheck.summary.starts_with("Re-checked SOLUSDT"));
    }

    #[tokio::test]
    async fn consultation_agreeing_with_the_trend_keeps_its_confidence() {
        let request = request(trending_candles(100, 100.0, 1.0));
        let recheck = TechnicalAnalyst
            .handle_consultation("Re-check the setup?", AgentKind::Risk, &request)
            .await
            .unwrap();
        assert_eq!(recheck.analysis["signal_holds"], json!(true));
        assert!(recheck.summary.ends_with("the signal holds"));
    }
}
