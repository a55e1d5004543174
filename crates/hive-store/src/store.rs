use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use hive_models::config::StrategyConfig;
use hive_models::logs::{DecisionLogEntry, MissedOpportunity, TradeLog, MISSED_OPPORTUNITY_RETENTION};
use hive_models::metrics::AgentMetric;
use hive_models::portfolio::{Portfolio, PortfolioKind};
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::StoreError;
use crate::memory::MemoryCache;
use crate::sqlite::SqliteStore;

/// Shared persistence handle: strategy configs are read through moka (hot) then SQLite.
///
/// SQLite access is synchronized via `Mutex` since `rusqlite::Connection` is not `Sync`.
/// Config writes invalidate the hot entry so readers never see a stale config.
pub struct Store {
    configs: MemoryCache<(String, bool), StrategyConfig>,
    sqlite: Mutex<SqliteStore>,
}

impl Store {
    pub fn new(sqlite: SqliteStore, max_capacity: u64, memory_ttl: Duration) -> Self {
        Self {
            configs: MemoryCache::new(max_capacity, memory_ttl),
            sqlite: Mutex::new(sqlite),
        }
    }

    /// In-memory store with a small hot cache. Used by tests and isolated runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(
            SqliteStore::open_in_memory()?,
            100,
            Duration::from_secs(60),
        ))
    }

    fn conn(&self) -> Result<MutexGuard<'_, SqliteStore>, StoreError> {
        self.sqlite
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("SQLite mutex poisoned: {e}")))
    }

    pub fn create_user(
        &self,
        user_id: &str,
        template: &StrategyConfig,
        starting_balance: Decimal,
    ) -> Result<bool, StoreError> {
        self.conn()?.create_user(user_id, template, starting_balance)
    }

    pub fn user_exists(&self, user_id: &str) -> Result<bool, StoreError> {
        self.conn()?.user_exists(user_id)
    }

    pub fn users(&self) -> Result<Vec<String>, StoreError> {
        self.conn()?.users()
    }

    /// Strategy config for a user. Missing MAIN config is `ConfigurationMissing`.
    pub async fn strategy_config(&self, user_id: &str) -> Result<StrategyConfig, StoreError> {
        self.find_strategy_config(user_id, false)
            .await?
            .ok_or_else(|| StoreError::ConfigurationMissing(user_id.to_string()))
    }

    /// Pending shadow proposal, if any.
    pub async fn shadow_config(&self, user_id: &str) -> Result<Option<StrategyConfig>, StoreError> {
        self.find_strategy_config(user_id, true).await
    }

    async fn find_strategy_config(
        &self,
        user_id: &str,
        shadow: bool,
    ) -> Result<Option<StrategyConfig>, StoreError> {
        let key = (user_id.to_string(), shadow);
        if let Some(config) = self.configs.get(&key).await {
            return Ok(Some(config));
        }

        let config = self.conn()?.strategy_config(user_id, shadow)?;
        if let Some(config) = &config {
            debug!(user_id, shadow, "Promoting strategy config to hot cache");
            self.configs.insert(key, config.clone()).await;
        }
        Ok(config)
    }

    pub async fn save_strategy_config(
        &self,
        user_id: &str,
        shadow: bool,
        config: &StrategyConfig,
    ) -> Result<(), StoreError> {
        self.conn()?.save_strategy_config(user_id, shadow, config)?;
        self.configs.invalidate(&(user_id.to_string(), shadow)).await;
        Ok(())
    }

    pub async fn delete_shadow_config(&self, user_id: &str) -> Result<bool, StoreError> {
        let deleted = self.conn()?.delete_strategy_config(user_id, true)?;
        self.configs.invalidate(&(user_id.to_string(), true)).await;
        Ok(deleted)
    }

    pub fn portfolio(
        &self,
        user_id: &str,
        kind: PortfolioKind,
    ) -> Result<Option<Portfolio>, StoreError> {
        self.conn()?.portfolio(user_id, kind)
    }

    pub fn save_portfolio(&self, portfolio: &Portfolio) -> Result<(), StoreError> {
        self.conn()?.save_portfolio(portfolio)
    }

    pub fn commit_trade(
        &self,
        portfolio: &Portfolio,
        log: Option<&TradeLog>,
    ) -> Result<(), StoreError> {
        self.conn()?.commit_trade(portfolio, log)
    }

    pub fn trade_logs(
        &self,
        user_id: &str,
        kind: Option<PortfolioKind>,
    ) -> Result<Vec<TradeLog>, StoreError> {
        self.conn()?.trade_logs(user_id, kind)
    }

    pub fn append_decision_log(&self, entry: &DecisionLogEntry) -> Result<(), StoreError> {
        self.conn()?.append_decision_log(entry)
    }

    pub fn decision_logs(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<DecisionLogEntry>, StoreError> {
        self.conn()?.decision_logs(user_id, limit)
    }

    pub fn append_missed_opportunity(&self, entry: &MissedOpportunity) -> Result<(), StoreError> {
        self.conn()?
            .append_missed_opportunity(entry, MISSED_OPPORTUNITY_RETENTION)
    }

    pub fn missed_opportunities(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<MissedOpportunity>, StoreError> {
        self.conn()?.missed_opportunities(user_id, limit)
    }

    pub fn trim_missed_opportunities(&self) -> Result<usize, StoreError> {
        self.conn()?
            .trim_missed_opportunities(MISSED_OPPORTUNITY_RETENTION)
    }

    pub fn record_agent_success(&self, agent_name: &str, elapsed_ms: u64) -> Result<(), StoreError> {
        self.conn()?.record_agent_success(agent_name, elapsed_ms)
    }

    pub fn record_agent_error(&self, agent_name: &str) -> Result<(), StoreError> {
        self.conn()?.record_agent_error(agent_name)
    }

    pub fn agent_metrics(&self) -> Result<Vec<AgentMetric>, StoreError> {
        self.conn()?.agent_metrics()
    }

    pub fn bot_active(&self, user_id: &str) -> Result<bool, StoreError> {
        self.conn()?.bot_active(user_id)
    }

    pub fn set_bot_active(&self, user_id: &str, active: bool) -> Result<(), StoreError> {
        self.conn()?.set_bot_active(user_id, active)
    }

    /// Run `f` against the underlying SQLite store while holding the lock.
    pub fn with_sqlite<T>(
        &self,
        f: impl FnOnce(&mut SqliteStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.conn()?;
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .create_user("alice", &StrategyConfig::default(), dec!(100000))
            .unwrap();
        store
    }

    #[tokio::test]
    async fn config_read_through_and_invalidate() {
        let store = test_store();
        let config = store.strategy_config("alice").await.unwrap();
        assert_eq!(config, StrategyConfig::default());

        let mut updated = config.clone();
        updated.risk_management.min_confidence = 0.75;
        store.save_strategy_config("alice", false, &updated).await.unwrap();

        let reread = store.strategy_config("alice").await.unwrap();
        assert_eq!(reread.risk_management.min_confidence, 0.75);
    }

    #[tokio::test]
    async fn missing_config_is_an_error() {
        let store = test_store();
        let err = store.strategy_config("bob").await.unwrap_err();
        assert!(matches!(err, StoreError::ConfigurationMissing(user) if user == "bob"));
    }

    #[tokio::test]
    async fn shadow_config_lifecycle() {
        let store = test_store();
        assert!(store.shadow_config("alice").await.unwrap().is_none());

        let mut shadow = StrategyConfig::default();
        shadow.risk_management.take_profit_percent = 8.0;
        store.save_strategy_config("alice", true, &shadow).await.unwrap();
        assert_eq!(store.shadow_config("alice").await.unwrap(), Some(shadow));

        assert!(store.delete_shadow_config("alice").await.unwrap());
        assert!(store.shadow_config("alice").await.unwrap().is_none());
    }
}
