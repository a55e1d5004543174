use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent_message::{AgentKind, ChatMessage};
use crate::context::ContextSnapshot;
use crate::portfolio::RiskParameters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Avoid,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
            TradeAction::Avoid => "AVOID",
        })
    }
}

/// Per-agent summary attached to a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent: AgentKind,
    pub confidence: f64,
    pub summary: String,
    pub fallback: bool,
    pub elapsed_ms: u64,
}

/// The pipeline's final call for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeDecision {
    pub id: Uuid,
    pub symbol: String,
    pub action: TradeAction,
    pub confidence: f64,
    pub reasoning: String,
    pub risk_parameters: RiskParameters,
    pub context: ContextSnapshot,
    pub agent_reports: Vec<AgentReport>,
    pub chat: Vec<ChatMessage>,
    /// Number of recalled memories that informed the decision.
    pub memories_used: usize,
    /// Set when memory recall or any agent fell back.
    pub degraded: bool,
    pub decided_at: DateTime<Utc>,
    pub processing_time_ms: u64,
}

impl TradeDecision {
    pub fn consultations(&self) -> impl Iterator<Item = &ChatMessage> {
        self.chat.iter().filter(|m| m.is_consultation())
    }
}
