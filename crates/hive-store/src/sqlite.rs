use chrono::{DateTime, SecondsFormat, Utc};
use hive_models::config::StrategyConfig;
use hive_models::logs::{DecisionLogEntry, MissedOpportunity, TradeLog};
use hive_models::memory::TradeMemory;
use hive_models::metrics::AgentMetric;
use hive_models::portfolio::{Portfolio, PortfolioKind};
use hive_models::schema::STORE_DDL;
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;

use crate::error::StoreError;

fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Synchronous SQLite accessor for all persisted hive state.
///
/// Access from async code goes through [`crate::Store`], which serializes it
/// behind a mutex since `rusqlite::Connection` is not `Sync`.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the store at `path`. Creates the schema and enables WAL.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(STORE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database. Useful for tests and isolated backtests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(STORE_DDL)?;
        Ok(Self { conn })
    }

    // ---- users ----

    /// Create a user with a copy of `template`, a MAIN portfolio and an inactive bot,
    /// all in one transaction. Returns false if the user already existed.
    pub fn create_user(
        &mut self,
        user_id: &str,
        template: &StrategyConfig,
        starting_balance: Decimal,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let portfolio = Portfolio::new(user_id, PortfolioKind::Main, starting_balance);
        let config_json = serde_json::to_string(template)?;
        let portfolio_json = serde_json::to_string(&portfolio)?;

        let tx = self.conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO users (user_id, created_at) VALUES (?1, ?2)",
            rusqlite::params![user_id, ts(&now)],
        )?;
        if inserted == 0 {
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO strategy_configs (user_id, is_shadow, config_json, updated_at) \
             VALUES (?1, 0, ?2, ?3)",
            rusqlite::params![user_id, config_json, ts(&now)],
        )?;
        tx.execute(
            "INSERT INTO portfolios (user_id, kind, portfolio_json, updated_at) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![user_id, PortfolioKind::Main.as_str(), portfolio_json, ts(&now)],
        )?;
        tx.execute(
            "INSERT INTO bot_status (user_id, active, updated_at) VALUES (?1, 0, ?2)",
            rusqlite::params![user_id, ts(&now)],
        )?;
        tx.commit()?;
        Ok(true)
    }

    pub fn user_exists(&self, user_id: &str) -> Result<bool, StoreError> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT user_id FROM users WHERE user_id = ?1",
                rusqlite::params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn users(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT user_id FROM users ORDER BY user_id")?;
        let users = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(users)
    }

    // ---- strategy configs ----

    pub fn strategy_config(
        &self,
        user_id: &str,
        shadow: bool,
    ) -> Result<Option<StrategyConfig>, StoreError> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT config_json FROM strategy_configs WHERE user_id = ?1 AND is_shadow = ?2",
                rusqlite::params![user_id, shadow],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn save_strategy_config(
        &self,
        user_id: &str,
        shadow: bool,
        config: &StrategyConfig,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO strategy_configs (user_id, is_shadow, config_json, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(user_id, is_shadow) DO UPDATE SET \
             config_json = excluded.config_json, updated_at = excluded.updated_at",
            rusqlite::params![
                user_id,
                shadow,
                serde_json::to_string(config)?,
                ts(&Utc::now())
            ],
        )?;
        Ok(())
    }

    pub fn delete_strategy_config(&self, user_id: &str, shadow: bool) -> Result<bool, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM strategy_configs WHERE user_id = ?1 AND is_shadow = ?2",
            rusqlite::params![user_id, shadow],
        )?;
        Ok(deleted > 0)
    }

    // ---- portfolios ----

    pub fn portfolio(
        &self,
        user_id: &str,
        kind: PortfolioKind,
    ) -> Result<Option<Portfolio>, StoreError> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT portfolio_json FROM portfolios WHERE user_id = ?1 AND kind = ?2",
                rusqlite::params![user_id, kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn save_portfolio(&self, portfolio: &Portfolio) -> Result<(), StoreError> {
        upsert_portfolio(&self.conn, portfolio)
    }

    /// Persist a portfolio together with the trade log entry that produced it.
    /// Either both are written or neither.
    pub fn commit_trade(
        &mut self,
        portfolio: &Portfolio,
        log: Option<&TradeLog>,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        upsert_portfolio(&tx, portfolio)?;
        if let Some(log) = log {
            insert_trade_log(&tx, log)?;
        }
        tx.commit()?;
        Ok(())
    }

    // ---- trade logs ----

    /// Trade logs oldest first. `kind = None` returns both portfolios.
    pub fn trade_logs(
        &self,
        user_id: &str,
        kind: Option<PortfolioKind>,
    ) -> Result<Vec<TradeLog>, StoreError> {
        let rows: Vec<String> = match kind {
            Some(kind) => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT log_json FROM trade_logs WHERE user_id = ?1 AND kind = ?2 \
                     ORDER BY created_at, rowid",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![user_id, kind.as_str()], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT log_json FROM trade_logs WHERE user_id = ?1 ORDER BY created_at, rowid",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![user_id], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }

    // ---- decision logs ----

    pub fn append_decision_log(&self, entry: &DecisionLogEntry) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO decision_logs (id, user_id, symbol, decision, log_json, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                entry.id.to_string(),
                entry.user_id,
                entry.symbol,
                entry.decision.as_str(),
                serde_json::to_string(entry)?,
                ts(&entry.timestamp),
            ],
        )?;
        Ok(())
    }

    /// Most recent decision log entries, newest first.
    pub fn decision_logs(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<DecisionLogEntry>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT log_json FROM decision_logs WHERE user_id = ?1 \
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![user_id, limit as i64], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }

    // ---- missed opportunities ----

    /// Append an entry and trim the user's history to `retention` most recent rows.
    pub fn append_missed_opportunity(
        &mut self,
        entry: &MissedOpportunity,
        retention: usize,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO missed_opportunities (id, user_id, symbol, entry_json, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                entry.id.to_string(),
                entry.user_id,
                entry.symbol,
                serde_json::to_string(entry)?,
                ts(&entry.timestamp),
            ],
        )?;
        trim_missed(&tx, &entry.user_id, retention)?;
        tx.commit()?;
        Ok(())
    }

    /// Trim every user's missed opportunities. Returns rows deleted.
    pub fn trim_missed_opportunities(&self, retention: usize) -> Result<usize, StoreError> {
        let mut deleted = 0;
        for user_id in self.users()? {
            deleted += trim_missed(&self.conn, &user_id, retention)?;
        }
        Ok(deleted)
    }

    /// Missed opportunities newest first.
    pub fn missed_opportunities(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<MissedOpportunity>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT entry_json FROM missed_opportunities WHERE user_id = ?1 \
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![user_id, limit as i64], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }

    // ---- trade memories ----

    pub fn insert_memory(&self, memory: &TradeMemory) -> Result<(), StoreError> {
        // The embedding lives in its own column; keep the JSON copy small.
        let mut stored = memory.clone();
        let embedding = std::mem::take(&mut stored.embedding);
        self.conn.execute(
            "INSERT INTO trade_memories (id, user_id, symbol, outcome, memory_json, embedding, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                memory.id.to_string(),
                memory.user_id,
                memory.symbol,
                memory.outcome.as_str(),
                serde_json::to_string(&stored)?,
                encode_embedding(&embedding),
                ts(&memory.timestamp),
            ],
        )?;
        Ok(())
    }

    /// All memories for a user with embeddings populated.
    pub fn memories(&self, user_id: &str) -> Result<Vec<TradeMemory>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT memory_json, embedding FROM trade_memories WHERE user_id = ?1 \
             ORDER BY created_at, rowid",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(json, blob)| {
                let mut memory: TradeMemory = serde_json::from_str(&json)?;
                memory.embedding = decode_embedding(&blob);
                Ok::<_, StoreError>(memory)
            })
            .collect()
    }

    pub fn memory_count(&self, user_id: &str) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM trade_memories WHERE user_id = ?1",
            rusqlite::params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ---- agent metrics ----

    pub fn record_agent_success(&self, agent_name: &str, elapsed_ms: u64) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO agent_metrics (agent_name, success_count, error_count, total_response_time_ms, last_activity) \
             VALUES (?1, 1, 0, ?2, ?3) \
             ON CONFLICT(agent_name) DO UPDATE SET \
             success_count = success_count + 1, \
             total_response_time_ms = total_response_time_ms + excluded.total_response_time_ms, \
             last_activity = excluded.last_activity",
            rusqlite::params![agent_name, elapsed_ms as i64, ts(&Utc::now())],
        )?;
        Ok(())
    }

    pub fn record_agent_error(&self, agent_name: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO agent_metrics (agent_name, success_count, error_count, total_response_time_ms, last_activity) \
             VALUES (?1, 0, 1, 0, ?2) \
             ON CONFLICT(agent_name) DO UPDATE SET \
             error_count = error_count + 1, last_activity = excluded.last_activity",
            rusqlite::params![agent_name, ts(&Utc::now())],
        )?;
        Ok(())
    }

    pub fn agent_metrics(&self) -> Result<Vec<AgentMetric>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT agent_name, success_count, error_count, total_response_time_ms, last_activity \
             FROM agent_metrics ORDER BY agent_name",
        )?;
        let metrics = stmt
            .query_map([], |row| {
                let last_activity: String = row.get(4)?;
                Ok(AgentMetric {
                    agent_name: row.get(0)?,
                    success_count: row.get::<_, i64>(1)? as u64,
                    error_count: row.get::<_, i64>(2)? as u64,
                    total_response_time_ms: row.get::<_, i64>(3)? as u64,
                    last_activity: DateTime::parse_from_rfc3339(&last_activity)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(metrics)
    }

    // ---- bot status ----

    /// Unknown users are treated as inactive.
    pub fn bot_active(&self, user_id: &str) -> Result<bool, StoreError> {
        let active: Option<bool> = self
            .conn
            .query_row(
                "SELECT active FROM bot_status WHERE user_id = ?1",
                rusqlite::params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(active.unwrap_or(false))
    }

    pub fn set_bot_active(&self, user_id: &str, active: bool) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO bot_status (user_id, active, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(user_id) DO UPDATE SET active = excluded.active, updated_at = excluded.updated_at",
            rusqlite::params![user_id, active, ts(&Utc::now())],
        )?;
        Ok(())
    }
}

fn upsert_portfolio(conn: &Connection, portfolio: &Portfolio) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO portfolios (user_id, kind, portfolio_json, updated_at) VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(user_id, kind) DO UPDATE SET \
         portfolio_json = excluded.portfolio_json, updated_at = excluded.updated_at",
        rusqlite::params![
            portfolio.user_id,
            portfolio.kind.as_str(),
            serde_json::to_string(portfolio)?,
            ts(&portfolio.updated_at),
        ],
    )?;
    Ok(())
}

fn insert_trade_log(conn: &Connection, log: &TradeLog) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO trade_logs (id, user_id, kind, symbol, log_json, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            log.id.to_string(),
            log.user_id,
            log.kind.as_str(),
            log.symbol,
            serde_json::to_string(log)?,
            ts(&log.timestamp),
        ],
    )?;
    Ok(())
}

fn trim_missed(conn: &Connection, user_id: &str, retention: usize) -> Result<usize, StoreError> {
    let deleted = conn.execute(
        "DELETE FROM missed_opportunities WHERE user_id = ?1 AND rowid NOT IN ( \
             SELECT rowid FROM missed_opportunities WHERE user_id = ?1 \
             ORDER BY created_at DESC, rowid DESC LIMIT ?2)",
        rusqlite::params![user_id, retention as i64],
    )?;
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_models::logs::DecisionKind;
    use hive_models::memory::{MemorySource, TradeOutcome};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn store_with_user(user: &str) -> SqliteStore {
        let mut store = SqliteStore::open_in_memory().unwrap();
        assert!(store
            .create_user(user, &StrategyConfig::default(), dec!(100000))
            .unwrap());
        store
    }

    fn missed(user: &str, symbol: &str) -> MissedOpportunity {
        MissedOpportunity {
            id: Uuid::new_v4(),
            user_id: user.to_string(),
            symbol: symbol.to_string(),
            reason: "low confidence".to_string(),
            confidence: 0.3,
            final_summary: "weak momentum".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn create_user_seeds_config_portfolio_and_bot() {
        let store = store_with_user("alice");
        assert!(store.user_exists("alice").unwrap());
        assert_eq!(
            store.strategy_config("alice", false).unwrap(),
            Some(StrategyConfig::default())
        );
        let portfolio = store.portfolio("alice", PortfolioKind::Main).unwrap().unwrap();
        assert_eq!(portfolio.balance, dec!(100000));
        assert!(portfolio.positions.is_empty());
        assert!(!store.bot_active("alice").unwrap());
        assert!(store.portfolio("alice", PortfolioKind::Shadow).unwrap().is_none());
    }

    #[test]
    fn create_user_twice_is_noop() {
        let mut store = store_with_user("alice");
        let created = store
            .create_user("alice", &StrategyConfig::default(), dec!(5))
            .unwrap();
        assert!(!created);
        let portfolio = store.portfolio("alice", PortfolioKind::Main).unwrap().unwrap();
        assert_eq!(portfolio.balance, dec!(100000));
    }

    #[test]
    fn shadow_config_is_separate() {
        let store = store_with_user("alice");
        let mut shadow = StrategyConfig::default();
        shadow.risk_management.stop_loss_percent = 4.0;
        store.save_strategy_config("alice", true, &shadow).unwrap();

        assert_eq!(
            store.strategy_config("alice", true).unwrap().unwrap().risk_management.stop_loss_percent,
            4.0
        );
        assert_eq!(
            store.strategy_config("alice", false).unwrap().unwrap().risk_management.stop_loss_percent,
            3.0
        );
        assert!(store.delete_strategy_config("alice", true).unwrap());
        assert!(store.strategy_config("alice", true).unwrap().is_none());
    }

    #[test]
    fn commit_trade_writes_portfolio_and_log() {
        let mut store = store_with_user("alice");
        let mut portfolio = store.portfolio("alice", PortfolioKind::Main).unwrap().unwrap();
        portfolio.balance = dec!(100100);
        let log = TradeLog {
            id: Uuid::new_v4(),
            user_id: "alice".to_string(),
            kind: PortfolioKind::Main,
            symbol: "BTCUSDT".to_string(),
            side: Default::default(),
            amount: dec!(0.02),
            entry_price: dec!(50000),
            exit_price: dec!(55000),
            pnl: dec!(100),
            pnl_percent: 10.0,
            reason: "take profit".to_string(),
            market_context: None,
            applied_risk_parameters: None,
            timestamp: Utc::now(),
        };
        store.commit_trade(&portfolio, Some(&log)).unwrap();

        let reloaded = store.portfolio("alice", PortfolioKind::Main).unwrap().unwrap();
        assert_eq!(reloaded.balance, dec!(100100));
        let logs = store.trade_logs("alice", Some(PortfolioKind::Main)).unwrap();
        assert_eq!(logs, vec![log]);
        assert!(store.trade_logs("alice", Some(PortfolioKind::Shadow)).unwrap().is_empty());
    }

    #[test]
    fn missed_opportunities_are_trimmed_on_insert() {
        let mut store = store_with_user("alice");
        for i in 0..7 {
            store
                .append_missed_opportunity(&missed("alice", &format!("SYM{i}USDT")), 5)
                .unwrap();
        }
        let kept = store.missed_opportunities("alice", 100).unwrap();
        assert_eq!(kept.len(), 5);
        assert_eq!(kept[0].symbol, "SYM6USDT");
        assert_eq!(kept[4].symbol, "SYM2USDT");
    }

    #[test]
    fn trim_all_users() {
        let mut store = store_with_user("alice");
        for _ in 0..4 {
            store
                .append_missed_opportunity(&missed("alice", "ETHUSDT"), 100)
                .unwrap();
        }
        assert_eq!(store.trim_missed_opportunities(1).unwrap(), 3);
        assert_eq!(store.missed_opportunities("alice", 100).unwrap().len(), 1);
    }

    #[test]
    fn decision_logs_newest_first() {
        let store = store_with_user("alice");
        store
            .append_decision_log(&DecisionLogEntry::new("alice", "BTCUSDT", DecisionKind::Buy, "first"))
            .unwrap();
        store
            .append_decision_log(&DecisionLogEntry::new("alice", "BTCUSDT", DecisionKind::SellNow, "second"))
            .unwrap();
        let logs = store.decision_logs("alice", 10).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].decision, DecisionKind::SellNow);
    }

    #[test]
    fn memory_embedding_survives_storage() {
        let store = store_with_user("alice");
        let memory = TradeMemory {
            id: Uuid::new_v4(),
            user_id: "alice".to_string(),
            symbol: "SOLUSDT".to_string(),
            timestamp: Utc::now(),
            outcome: TradeOutcome::Loss,
            pnl_percent: -3.2,
            narrative: "Sold 10 SOLUSDT".to_string(),
            source: MemorySource::Ai,
            embedding: vec![0.25, -0.5, 1.0],
        };
        store.insert_memory(&memory).unwrap();

        let memories = store.memories("alice").unwrap();
        assert_eq!(memories, vec![memory]);
        assert_eq!(store.memory_count("alice").unwrap(), 1);
        assert_eq!(store.memory_count("bob").unwrap(), 0);
    }

    #[test]
    fn agent_metrics_upsert() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.record_agent_success("MacroAnalyst", 120).unwrap();
        store.record_agent_success("MacroAnalyst", 80).unwrap();
        store.record_agent_error("MacroAnalyst").unwrap();
        store.record_agent_error("RiskManager").unwrap();

        let metrics = store.agent_metrics().unwrap();
        assert_eq!(metrics.len(), 2);
        let macro_metric = &metrics[0];
        assert_eq!(macro_metric.agent_name, "MacroAnalyst");
        assert_eq!(macro_metric.success_count, 2);
        assert_eq!(macro_metric.error_count, 1);
        assert_eq!(macro_metric.total_response_time_ms, 200);
        assert_eq!(macro_metric.average_response_ms(), Some(100));
        assert_eq!(metrics[1].success_count, 0);
        assert_eq!(metrics[1].error_count, 1);
    }

    #[test]
    fn bot_status_toggle() {
        let store = store_with_user("alice");
        store.set_bot_active("alice", true).unwrap();
        assert!(store.bot_active("alice").unwrap());
        assert!(!store.bot_active("nobody").unwrap());
    }
}
