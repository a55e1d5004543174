use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::{ContextSnapshot, ContextUpdate};
use crate::decision::TradeAction;
use crate::market::{Candle, MarketSignals};
use crate::memory::RecalledMemory;
use crate::portfolio::RiskParameters;

/// The roles in the decision pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgentKind {
    #[serde(rename = "MacroAnalyst")]
    Macro,
    #[serde(rename = "SentimentAnalyst")]
    Sentiment,
    #[serde(rename = "TechnicalAnalyst")]
    Technical,
    #[serde(rename = "RiskManager")]
    Risk,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::Macro,
        AgentKind::Sentiment,
        AgentKind::Technical,
        AgentKind::Risk,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::Macro => "MacroAnalyst",
            AgentKind::Sentiment => "SentimentAnalyst",
            AgentKind::Technical => "TechnicalAnalyst",
            AgentKind::Risk => "RiskManager",
        }
    }

    /// Short key used in configuration files.
    pub fn key(&self) -> &'static str {
        match self {
            AgentKind::Macro => "macro",
            AgentKind::Sentiment => "sentiment",
            AgentKind::Technical => "technical",
            AgentKind::Risk => "risk",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        AgentKind::ALL.into_iter().find(|k| k.key() == key)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Input handed to an agent. Fields irrelevant to a role are left empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub request_id: Uuid,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Shared context as seen when the request was built.
    pub context: ContextSnapshot,
    #[serde(default)]
    pub signals: MarketSignals,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candles: Vec<Candle>,
    /// Outputs of agents that ran earlier in the pipeline.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prior: Vec<AgentResponse>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memories: Vec<RecalledMemory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_parameters: Option<RiskParameters>,
    #[serde(default)]
    pub min_confidence: f64,
}

impl AgentRequest {
    pub fn new(user_id: impl Into<String>, context: ContextSnapshot) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user_id: user_id.into(),
            symbol: None,
            context,
            signals: MarketSignals::default(),
            candles: Vec::new(),
            prior: Vec::new(),
            memories: Vec::new(),
            risk_parameters: None,
            min_confidence: 0.0,
        }
    }

    pub fn prior_from(&self, kind: AgentKind) -> Option<&AgentResponse> {
        self.prior.iter().find(|r| r.agent == kind)
    }
}

/// The RiskManager's authoritative call for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub action: TradeAction,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub request_id: Uuid,
    pub agent: AgentKind,
    /// 0.0 to 1.0.
    pub confidence: f64,
    pub summary: String,
    /// Role-specific structured output (scores, trend labels, answers).
    #[serde(default)]
    pub analysis: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_update: Option<ContextUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<RiskVerdict>,
    /// Prompt sent to a model-backed agent, kept for the transcript.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// True when the response was substituted after the agent failed.
    #[serde(default)]
    pub fallback: bool,
}

impl AgentResponse {
    pub fn new(request_id: Uuid, agent: AgentKind, confidence: f64, summary: impl Into<String>) -> Self {
        Self {
            request_id,
            agent,
            confidence: confidence.clamp(0.0, 1.0),
            summary: summary.into(),
            analysis: serde_json::Value::Null,
            context_update: None,
            verdict: None,
            prompt: None,
            fallback: false,
        }
    }

    /// Neutral stand-in used when an agent call fails or times out.
    pub fn neutral_fallback(request_id: Uuid, agent: AgentKind, reason: &str) -> Self {
        let mut response = Self::new(request_id, agent, 0.0, format!("{agent} unavailable: {reason}"));
        response.fallback = true;
        response
    }

    /// Numeric field from `analysis`.
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.analysis.get(key).and_then(|v| v.as_f64())
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.analysis.get(key).and_then(|v| v.as_str())
    }
}

/// One entry of the agent transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatMessage {
    Direct {
        agent: AgentKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        response: String,
    },
    Consultation {
        from_agent: AgentKind,
        to_agent: AgentKind,
        question: String,
        answer: String,
    },
    Failure {
        agent: AgentKind,
        error: String,
    },
}

impl ChatMessage {
    pub fn is_consultation(&self) -> bool {
        matches!(self, ChatMessage::Consultation { .. })
    }

    pub fn agent(&self) -> AgentKind {
        match self {
            ChatMessage::Direct { agent, .. } => *agent,
            ChatMessage::Consultation { from_agent, .. } => *from_agent,
            ChatMessage::Failure { agent, .. } => *agent,
        }
    }
}
