use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::analysis::ConfigDelta;

/// Top-level configuration for the hive binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HiveConfig {
    pub store: StoreConfig,
    pub agents: AgentsConfig,
    pub scanner: ScannerConfig,
    pub stream: StreamConfig,
    pub execution: ExecutionConfig,
    pub scheduler: SchedulerConfig,
    /// Template copied into every new user's strategy config.
    pub strategy: StrategyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub sqlite_path: String,
    /// Maximum number of strategy configs held in the moka hot cache.
    pub memory_max_capacity: u64,
    pub memory_ttl_seconds: u64,
    /// Model used to embed trade narratives for recall.
    pub embedder: EmbedderKind,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "data/hive.db".to_string(),
            memory_max_capacity: 1_000,
            memory_ttl_seconds: 300,
            embedder: EmbedderKind::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    /// Local sentence-embedding model.
    #[default]
    Fastembed,
    /// Deterministic feature hashing; needs no model download.
    Hashing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentBackend {
    /// Deterministic in-process analysts.
    #[default]
    Rules,
    /// External model CLI fed a system prompt and the JSON request.
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSettings {
    /// One of `macro`, `sentiment`, `technical`, `risk`.
    pub agent: String,
    #[serde(default)]
    pub backend: AgentBackend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentsConfig {
    /// Deadline for one whole pipeline run.
    pub total_timeout_seconds: u64,
    pub agent_timeout_seconds: u64,
    pub memory_timeout_ms: u64,
    pub memory_recall_k: usize,
    /// Technical confidence below this makes the RiskManager consult the TechnicalAnalyst.
    pub consultation_confidence_threshold: f64,
    pub consultation_enabled: bool,
    /// Per-agent backend overrides. Agents not listed use the rule backend.
    pub agents: Vec<AgentSettings>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            total_timeout_seconds: 120,
            agent_timeout_seconds: 45,
            memory_timeout_ms: 2_000,
            memory_recall_k: 3,
            consultation_confidence_threshold: 0.4,
            consultation_enabled: true,
            agents: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScannerConfig {
    pub enabled: bool,
    pub threshold_percent: f64,
    pub window_seconds: u64,
    /// Only symbols quoted in this asset are tracked.
    pub quote_suffix: String,
    pub max_tracked: usize,
    pub resubscribe_attempts: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_percent: 3.5,
            window_seconds: 300,
            quote_suffix: "USDT".to_string(),
            max_tracked: 20,
            resubscribe_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// JSON-lines ticker replay file. No stream is opened when unset.
    pub replay_path: Option<String>,
    pub replay_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// Channel capacity for lossy (display) consumers.
    pub display_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            replay_path: None,
            replay_interval_ms: 1_000,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            display_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub starting_balance: Decimal,
    /// Fraction of notional charged per fill, e.g. 0.001 for 0.1%.
    pub fee_rate: Decimal,
    /// Times a position may extend its take-profit before it must be sold.
    pub max_hold_count: u32,
    /// JSON snapshot of prices/candles/signals served by the in-memory feed.
    pub price_snapshot: Option<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            starting_balance: Decimal::from(100_000),
            fee_rate: Decimal::ZERO,
            max_hold_count: 3,
            price_snapshot: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub cycle_interval_seconds: u64,
    pub maintenance_interval_seconds: u64,
    /// Users whose bots the daemon cycles.
    pub users: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_interval_seconds: 900,
            maintenance_interval_seconds: 3_600,
            users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskManagement {
    pub capital_per_trade_percent: f64,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub max_concurrent_trades: usize,
    pub allow_averaging_in: bool,
    pub min_confidence: f64,
    /// A SELL with no long position opens a short instead of being skipped.
    pub allow_shorting: bool,
}

impl Default for RiskManagement {
    fn default() -> Self {
        Self {
            capital_per_trade_percent: 5.0,
            stop_loss_percent: 3.0,
            take_profit_percent: 6.0,
            max_concurrent_trades: 5,
            allow_averaging_in: false,
            min_confidence: 0.6,
            allow_shorting: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TradingSettings {
    pub trading_enabled: bool,
    /// Explicit watch list. When empty the feed's top symbols are used.
    pub symbols_to_analyze: Vec<String>,
    pub top_candidates: usize,
    pub kline_interval: String,
    pub kline_limit: usize,
    pub enable_position_review: bool,
    pub take_profit_hold_increment_percent: f64,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            trading_enabled: true,
            symbols_to_analyze: Vec::new(),
            top_candidates: 10,
            kline_interval: "4h".to_string(),
            kline_limit: 100,
            enable_position_review: true,
            take_profit_hold_increment_percent: 2.0,
        }
    }
}

/// Per-user strategy settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StrategyConfig {
    pub risk_management: RiskManagement,
    pub trading: TradingSettings,
    /// Free-form per-user extras.
    pub overrides: serde_json::Map<String, serde_json::Value>,
}

impl StrategyConfig {
    /// Value at a dotted path such as `risk_management.stop_loss_percent`.
    pub fn value_at(&self, path: &str) -> Option<serde_json::Value> {
        let root = serde_json::to_value(self).ok()?;
        path.split('.')
            .try_fold(&root, |node, segment| node.get(segment))
            .cloned()
    }

    /// Return a copy with every delta applied. Unknown paths are an error.
    pub fn with_deltas(&self, deltas: &[ConfigDelta]) -> Result<Self, serde_json::Error> {
        let mut root = serde_json::to_value(self)?;
        for delta in deltas {
            let mut node = &mut root;
            for segment in delta.path.split('.') {
                node = match node.get_mut(segment) {
                    Some(next) => next,
                    None => {
                        return Err(serde::de::Error::custom(format!(
                            "unknown config path: {}",
                            delta.path
                        )))
                    }
                };
            }
            *node = delta.proposed.clone();
        }
        serde_json::from_value(root)
    }
}
