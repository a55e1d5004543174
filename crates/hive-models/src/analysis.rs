use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WinStats {
    pub trades: usize,
    pub wins: usize,
    pub total_pnl: Decimal,
}

impl WinStats {
    pub fn record(&mut self, win: bool, pnl: Decimal) {
        self.trades += 1;
        if win {
            self.wins += 1;
        }
        self.total_pnl += pnl;
    }

    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.trades as f64
        }
    }
}

/// A recurring losing behaviour found in the logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MistakePattern {
    pub pattern: String,
    pub occurrences: usize,
    pub detail: String,
}

/// A single proposed change to a strategy config, addressed by dotted path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDelta {
    pub path: String,
    pub current: serde_json::Value,
    pub proposed: serde_json::Value,
    pub rationale: String,
}

/// Read-only performance analysis of one user's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub user_id: String,
    pub generated_at: DateTime<Utc>,
    pub total_trades: usize,
    pub overall: WinStats,
    pub by_symbol: BTreeMap<String, WinStats>,
    pub by_regime: BTreeMap<String, WinStats>,
    pub average_win_percent: f64,
    pub average_loss_percent: f64,
    pub missed_opportunities: usize,
    pub mistakes: Vec<MistakePattern>,
    /// Empty when history is too short to propose anything.
    pub suggested_changes: Vec<ConfigDelta>,
    pub insufficient_data: bool,
    pub analysis_summary: String,
}

/// MAIN vs SHADOW equity for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowComparison {
    pub user_id: String,
    pub main_equity: Decimal,
    pub shadow_equity: Decimal,
    /// (shadow - main) / main, percent.
    pub relative_difference_percent: f64,
    pub shadow_trades: usize,
}
