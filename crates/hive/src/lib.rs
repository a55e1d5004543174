//! Hive - an autonomous paper-trading assistant.
//!
//! Market, macro and sentiment signals run through a pipeline of specialist
//! agents; their consensus is executed against per-user paper portfolios and
//! closed trades feed a similarity memory that biases later decisions.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use hive::models::HiveConfig;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let runtime = hive::build_runtime(&HiveConfig::default())?;
//! runtime.engine.init_user("alice")?;
//! let _outcome = runtime.engine.analyze_on_demand("alice", "SOLUSDT").await?;
//! # Ok(())
//! # }
//! ```

pub mod daemon;
pub mod engine;
pub mod error;

pub use hive_agents as agents;
pub use hive_market as market;
pub use hive_models as models;
pub use hive_portfolio as portfolio;
pub use hive_store as store;

pub use daemon::Daemon;
pub use engine::{BacktestReport, BacktestRequest, CycleReport, OnDemand, TradingEngine};
pub use error::EngineError;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hive_agents::AgentRegistry;
use hive_market::{InMemoryFeed, JsonLinesSource, StreamHub};
use hive_models::{EmbedderKind, HiveConfig};
use hive_store::{Embedder, HashingEmbedder, MemoryStore, SqliteStore, Store};

/// Everything a process needs: the engine plus the live feed and ticker hub.
pub struct Runtime {
    pub engine: Arc<TradingEngine>,
    pub feed: Arc<InMemoryFeed>,
    /// Present when a ticker stream is configured.
    pub hub: Option<Arc<StreamHub>>,
}

/// Build the engine and its collaborators from configuration.
pub fn build_runtime(config: &HiveConfig) -> Result<Runtime, anyhow::Error> {
    let sqlite_path = &config.store.sqlite_path;
    if let Some(parent) = Path::new(sqlite_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let sqlite = SqliteStore::open(sqlite_path)
        .with_context(|| format!("Failed to open store: {sqlite_path}"))?;
    let store = Arc::new(Store::new(
        sqlite,
        config.store.memory_max_capacity,
        Duration::from_secs(config.store.memory_ttl_seconds),
    ));

    let registry = Arc::new(AgentRegistry::from_config(&config.agents)?);

    let feed = Arc::new(match &config.execution.price_snapshot {
        Some(path) => InMemoryFeed::load(path)
            .with_context(|| format!("Failed to load price snapshot: {path}"))?,
        None => InMemoryFeed::new(),
    });

    let hub = config.stream.replay_path.as_ref().map(|path| {
        let source = Arc::new(JsonLinesSource::new(
            path.clone(),
            Duration::from_millis(config.stream.replay_interval_ms),
        ));
        Arc::new(StreamHub::new(source, config.stream.clone()))
    });

    let memory = MemoryStore::sqlite_with(embedder(config.store.embedder)?, Arc::clone(&store));
    let engine = Arc::new(TradingEngine::new(
        config.clone(),
        store,
        registry,
        feed.clone(),
        memory,
    ));

    Ok(Runtime { engine, feed, hub })
}

#[cfg(feature = "fastembed")]
fn embedder(kind: EmbedderKind) -> Result<Arc<dyn Embedder>, anyhow::Error> {
    use tracing::info;

    match kind {
        EmbedderKind::Fastembed => {
            let embedder =
                hive_store::FastEmbedder::new().context("Failed to load embedding model")?;
            info!(dimensions = embedder.dimensions(), "Loaded sentence embedder");
            Ok(Arc::new(embedder))
        }
        EmbedderKind::Hashing => Ok(Arc::new(HashingEmbedder::default())),
    }
}

#[cfg(not(feature = "fastembed"))]
fn embedder(kind: EmbedderKind) -> Result<Arc<dyn Embedder>, anyhow::Error> {
    use tracing::warn;

    if kind == EmbedderKind::Fastembed {
        warn!("Built without the fastembed feature; using the hashing embedder");
    }
    Ok(Arc::new(HashingEmbedder::default()))
}
