use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-agent invocation counters, upserted on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetric {
    pub agent_name: String,
    pub success_count: u64,
    pub error_count: u64,
    pub total_response_time_ms: u64,
    pub last_activity: DateTime<Utc>,
}

impl AgentMetric {
    pub fn average_response_ms(&self) -> Option<u64> {
        if self.success_count == 0 {
            None
        } else {
            Some(self.total_response_time_ms / self.success_count)
        }
    }
}
