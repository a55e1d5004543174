use std::collections::BTreeMap;

use async_trait::async_trait;
use hive_models::agent_message::{AgentKind, AgentRequest, AgentResponse};
use hive_models::context::{ContextUpdate, Sentiment};
use serde_json::json;

use crate::agent::{Agent, AgentContext};
use crate::error::AgentError;

const BULLISH: &[&str] = &[
    "surge", "surges", "rally", "rallies", "soar", "soars", "gain", "gains", "bull", "bullish",
    "record", "adoption", "approval", "approved", "breakout", "rise", "rises", "inflow",
    "inflows", "partnership", "launch", "upgrade", "etf",
];

const BEARISH: &[&str] = &[
    "crash", "crashes", "plunge", "plunges", "drop", "drops", "bear", "bearish", "hack",
    "hacked", "ban", "lawsuit", "sell-off", "selloff", "fear", "decline", "declines", "outflow",
    "outflows", "liquidation", "liquidations", "exploit", "fraud", "probe",
];

const MAX_TOPICS: usize = 5;

/// Keyword-scored headline sentiment.
#[derive(Debug, Default)]
pub struct SentimentAnalyst;

impl SentimentAnalyst {
    pub fn new() -> Self {
        Self
    }
}

fn tokens(headline: &str) -> impl Iterator<Item = String> + '_ {
    headline
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

#[async_trait]
impl Agent for SentimentAnalyst {
    fn kind(&self) -> AgentKind {
        AgentKind::Sentiment
    }

    async fn analyze(
        &self,
        request: &AgentRequest,
        _ctx: &AgentContext,
    ) -> Result<AgentResponse, AgentError> {
        let headlines = &request.signals.headlines;
        let mut bullish = 0usize;
        let mut bearish = 0usize;
        let mut hits: BTreeMap<String, usize> = BTreeMap::new();

        for headline in headlines {
            for token in tokens(headline) {
                let matched = if BULLISH.contains(&token.as_str()) {
                    bullish += 1;
                    true
                } else if BEARISH.contains(&token.as_str()) {
                    bearish += 1;
                    true
                } else {
                    false
                };
                if matched {
                    *hits.entry(token).or_default() += 1;
                }
            }
        }

        let total = bullish + bearish;
        let score = if total == 0 {
            0.0
        } else {
            (bullish as f64 - bearish as f64) / total as f64
        };
        let sentiment = Sentiment::from_score(score);

        let mut ranked: Vec<(String, usize)> = hits.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let narrative = ranked.first().map(|(word, _)| word.clone());

        let mut key_topics: Vec<String> = Vec::new();
        let candidates = request.signals.trending.iter().cloned();
        for topic in candidates.chain(ranked.into_iter().map(|(word, _)| word)) {
            if key_topics.len() == MAX_TOPICS {
                break;
            }
            if !key_topics.contains(&topic) {
                key_topics.push(topic);
            }
        }

        let confidence = if headlines.is_empty() {
            0.2
        } else {
            (0.3 + 0.05 * headlines.len() as f64).min(0.9)
        };

        let mut response = AgentResponse::new(
            request.request_id,
            AgentKind::Sentiment,
            confidence,
            format!(
                "{sentiment} ({score:+.2}) from {} headlines, {bullish} bullish / {bearish} bearish cues",
                headlines.len()
            ),
        );
        response.analysis = json!({
            "sentiment": sentiment.as_str(),
            "sentiment_score": score,
            "key_topics": key_topics,
            "dominant_narrative": narrative,
        });
        response.context_update = Some(ContextUpdate {
            sentiment: Some(sentiment),
            sentiment_score: Some(score),
            key_topics: Some(key_topics),
            dominant_narrative: narrative,
            ..Default::default()
        });
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_models::context::ContextSnapshot;

    fn request(headlines: &[&str], trending: &[&str]) -> AgentRequest {
        let mut request = AgentRequest::new("alice", ContextSnapshot::default());
        request.signals.headlines = headlines.iter().map(|s| s.to_string()).collect();
        request.signals.trending = trending.iter().map(|s| s.to_string()).collect();
        request
    }

    #[tokio::test]
    async fn bullish_headlines() {
        let response = SentimentAnalyst
            .analyze(
                &request(
                    &["Bitcoin ETF inflows surge to record", "Solana rally continues"],
                    &["SOL"],
                ),
                &AgentContext::isolated(),
            )
            .await
            .unwrap();
        assert_eq!(response.label("sentiment"), Some("Bullish"));
        assert_eq!(response.metric("sentiment_score"), Some(1.0));
        let update = response.context_update.unwrap();
        assert!(update.market_regime.is_none());
        let topics = update.key_topics.unwrap();
        assert_eq!(topics[0], "SOL");
        assert!(topics.len() <= MAX_TOPICS);
    }

    #[tokio::test]
    async fn bearish_headlines() {
        let response = SentimentAnalyst
            .analyze(
                &request(&["Exchange hacked, prices crash", "Regulators probe lending desk"], &[]),
                &AgentContext::isolated(),
            )
            .await
            .unwrap();
        assert_eq!(response.label("sentiment"), Some("Bearish"));
        assert!(response.metric("sentiment_score").unwrap() < -0.2);
    }

    #[tokio::test]
    async fn no_news_is_neutral_low_confidence() {
        let response = SentimentAnalyst
            .analyze(&request(&[], &[]), &AgentContext::isolated())
            .await
            .unwrap();
        assert_eq!(response.label("sentiment"), Some("Neutral"));
        assert_eq!(response.confidence, 0.2);
    }
}
