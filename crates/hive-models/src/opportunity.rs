use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a detected price move: `detected -> analyzing -> {bought | ignored}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityStatus {
    Detected,
    Analyzing,
    Bought,
    Ignored,
}

impl OpportunityStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OpportunityStatus::Bought | OpportunityStatus::Ignored)
    }

    pub fn can_transition_to(&self, next: OpportunityStatus) -> bool {
        matches!(
            (self, next),
            (OpportunityStatus::Detected, OpportunityStatus::Analyzing)
                | (OpportunityStatus::Analyzing, OpportunityStatus::Bought)
                | (OpportunityStatus::Analyzing, OpportunityStatus::Ignored)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityStatus::Detected => "detected",
            OpportunityStatus::Analyzing => "analyzing",
            OpportunityStatus::Bought => "bought",
            OpportunityStatus::Ignored => "ignored",
        }
    }
}

impl fmt::Display for OpportunityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price_change_percent: f64,
    pub status: OpportunityStatus,
}

impl Opportunity {
    pub fn detected(symbol: impl Into<String>, price_change_percent: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            timestamp: Utc::now(),
            price_change_percent,
            status: OpportunityStatus::Detected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_never_transition() {
        for terminal in [OpportunityStatus::Bought, OpportunityStatus::Ignored] {
            assert!(terminal.is_terminal());
            for next in [
                OpportunityStatus::Detected,
                OpportunityStatus::Analyzing,
                OpportunityStatus::Bought,
                OpportunityStatus::Ignored,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn detected_cannot_skip_analysis() {
        assert!(!OpportunityStatus::Detected.can_transition_to(OpportunityStatus::Bought));
        assert!(OpportunityStatus::Detected.can_transition_to(OpportunityStatus::Analyzing));
    }

    #[test]
    fn status_serializes_lowercase() {
        let opp = Opportunity::detected("SOLUSDT", 4.2);
        let json = serde_json::to_value(&opp).unwrap();
        assert_eq!(json["status"], "detected");
    }
}
