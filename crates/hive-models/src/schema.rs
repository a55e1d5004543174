/// SQLite schema for the hive store.
///
/// Structured records are persisted as JSON in `*_json` columns next to the
/// columns used for filtering and ordering. Money values inside the JSON are
/// decimal strings.
pub const STORE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS users (
    user_id     TEXT PRIMARY KEY,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS strategy_configs (
    user_id     TEXT NOT NULL,
    is_shadow   INTEGER NOT NULL DEFAULT 0,
    config_json TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (user_id, is_shadow)
);
CREATE TABLE IF NOT EXISTS portfolios (
    user_id        TEXT NOT NULL,
    kind           TEXT NOT NULL,
    portfolio_json TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    PRIMARY KEY (user_id, kind)
);
CREATE TABLE IF NOT EXISTS trade_logs (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    kind       TEXT NOT NULL,
    symbol     TEXT NOT NULL,
    log_json   TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trade_logs_user ON trade_logs(user_id, kind, created_at);
CREATE TABLE IF NOT EXISTS decision_logs (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    symbol     TEXT NOT NULL,
    decision   TEXT NOT NULL,
    log_json   TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_decision_logs_user ON decision_logs(user_id, created_at);
CREATE TABLE IF NOT EXISTS missed_opportunities (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    symbol     TEXT NOT NULL,
    entry_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_missed_user ON missed_opportunities(user_id, created_at);
CREATE TABLE IF NOT EXISTS trade_memories (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    symbol      TEXT NOT NULL,
    outcome     TEXT NOT NULL,
    memory_json TEXT NOT NULL,
    embedding   BLOB NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memories_user ON trade_memories(user_id);
CREATE TABLE IF NOT EXISTS agent_metrics (
    agent_name             TEXT PRIMARY KEY,
    success_count          INTEGER NOT NULL DEFAULT 0,
    error_count            INTEGER NOT NULL DEFAULT 0,
    total_response_time_ms INTEGER NOT NULL DEFAULT 0,
    last_activity          TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS bot_status (
    user_id    TEXT PRIMARY KEY,
    active     INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
";

