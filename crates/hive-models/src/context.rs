use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall risk appetite of the market as judged by the macro analyst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MarketRegime {
    #[serde(rename = "Risk-On")]
    RiskOn,
    #[serde(rename = "Risk-Off")]
    RiskOff,
    #[default]
    Neutral,
}

impl MarketRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::RiskOn => "Risk-On",
            MarketRegime::RiskOff => "Risk-Off",
            MarketRegime::Neutral => "Neutral",
        }
    }

    /// Regime implied by a 0-10 score.
    pub fn from_score(score: f64) -> Self {
        if score >= 6.0 {
            MarketRegime::RiskOn
        } else if score < 4.0 {
            MarketRegime::RiskOff
        } else {
            MarketRegime::Neutral
        }
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Sentiment {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Bullish => "Bullish",
            Sentiment::Bearish => "Bearish",
            Sentiment::Neutral => "Neutral",
        }
    }

    pub fn from_score(score: f64) -> Self {
        if score > 0.2 {
            Sentiment::Bullish
        } else if score < -0.2 {
            Sentiment::Bearish
        } else {
            Sentiment::Neutral
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FearAndGreed {
    /// 0 (extreme fear) to 100 (extreme greed).
    pub value: u8,
    pub classification: String,
}

/// Point-in-time copy of the shared market view.
///
/// Macro owns `market_regime`, `regime_score` and `fear_and_greed`.
/// Sentiment owns `sentiment`, `sentiment_score`, `key_topics` and `dominant_narrative`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub market_regime: MarketRegime,
    /// 0.0 (danger) to 10.0 (opportunity).
    pub regime_score: f64,
    pub sentiment: Sentiment,
    /// -1.0 to 1.0.
    pub sentiment_score: f64,
    pub key_topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dominant_narrative: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fear_and_greed: Option<FearAndGreed>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ContextSnapshot {
    fn default() -> Self {
        Self {
            market_regime: MarketRegime::Neutral,
            regime_score: 5.0,
            sentiment: Sentiment::Neutral,
            sentiment_score: 0.0,
            key_topics: Vec::new(),
            dominant_narrative: None,
            fear_and_greed: None,
            updated_at: Utc::now(),
        }
    }
}

impl ContextSnapshot {
    /// Field-level merge: only fields present in `update` overwrite.
    pub fn apply(&mut self, update: ContextUpdate) {
        if update.is_empty() {
            return;
        }
        if let Some(regime) = update.market_regime {
            self.market_regime = regime;
        }
        if let Some(score) = update.regime_score {
            self.regime_score = score.clamp(0.0, 10.0);
        }
        if let Some(fng) = update.fear_and_greed {
            self.fear_and_greed = Some(fng);
        }
        if let Some(sentiment) = update.sentiment {
            self.sentiment = sentiment;
        }
        if let Some(score) = update.sentiment_score {
            self.sentiment_score = score.clamp(-1.0, 1.0);
        }
        if let Some(topics) = update.key_topics {
            let mut deduped: Vec<String> = Vec::with_capacity(topics.len());
            for topic in topics {
                if !deduped.contains(&topic) {
                    deduped.push(topic);
                }
            }
            self.key_topics = deduped;
        }
        if let Some(narrative) = update.dominant_narrative {
            self.dominant_narrative = Some(narrative);
        }
        self.updated_at = Utc::now();
    }
}

/// Partial context update. Absent fields leave the snapshot untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_regime: Option<MarketRegime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regime_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fear_and_greed: Option<FearAndGreed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_topics: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dominant_narrative: Option<String>,
}

impl ContextUpdate {
    pub fn is_empty(&self) -> bool {
        self.market_regime.is_none()
            && self.regime_score.is_none()
            && self.fear_and_greed.is_none()
            && self.sentiment.is_none()
            && self.sentiment_score.is_none()
            && self.key_topics.is_none()
            && self.dominant_narrative.is_none()
    }

    /// Drop the macro-owned fields, returning the names of those that were set.
    pub fn strip_macro_fields(&mut self) -> Vec<&'static str> {
        let mut stripped = Vec::new();
        if self.market_regime.take().is_some() {
            stripped.push("market_regime");
        }
        if self.regime_score.take().is_some() {
            stripped.push("regime_score");
        }
        if self.fear_and_greed.take().is_some() {
            stripped.push("fear_and_greed");
        }
        stripped
    }

    /// Drop the sentiment-owned fields, returning the names of those that were set.
    pub fn strip_sentiment_fields(&mut self) -> Vec<&'static str> {
        let mut stripped = Vec::new();
        if self.sentiment.take().is_some() {
            stripped.push("sentiment");
        }
        if self.sentiment_score.take().is_some() {
            stripped.push("sentiment_score");
        }
        if self.key_topics.take().is_some() {
            stripped.push("key_topics");
        }
        if self.dominant_narrative.take().is_some() {
            stripped.push("dominant_narrative");
        }
        stripped
    }
}
