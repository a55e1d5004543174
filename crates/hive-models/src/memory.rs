use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOutcome {
    Profit,
    Loss,
    MissedOpportunity,
}

impl TradeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeOutcome::Profit => "profit",
            TradeOutcome::Loss => "loss",
            TradeOutcome::MissedOpportunity => "missed_opportunity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemorySource {
    Ai,
    Human,
}

/// Narrative record of a closed trade, embedded for similarity recall.
/// Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeMemory {
    pub id: Uuid,
    pub user_id: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: TradeOutcome,
    pub pnl_percent: f64,
    pub narrative: String,
    pub source: MemorySource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

/// A memory returned from recall with its distance to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalledMemory {
    pub memory: TradeMemory,
    pub distance: f32,
}
