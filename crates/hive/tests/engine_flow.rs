//! Facade-level flows: on-demand deduplication, bot gating, streaming
//! backtests, shadow comparison and daemon shutdown.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use hive::agents::test_support::{trending_candles, MockAgent};
use hive::agents::{AgentRegistry, EventSink, MARKET_BENCHMARK};
use hive::market::InMemoryFeed;
use hive::models::{AgentKind, EmbedderKind, HiveConfig, PortfolioKind, StreamEvent};
use hive::portfolio::{BatchStatus, BuyContext, PortfolioError};
use hive::store::{MemoryStore, Store};
use hive::{BacktestRequest, Daemon, EngineError, OnDemand, TradingEngine};
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn rising_feed() -> Arc<InMemoryFeed> {
    let feed = Arc::new(InMemoryFeed::new());
    feed.set_candles("SOLUSDT", trending_candles(100, 100.0, 1.0));
    feed.set_candles(MARKET_BENCHMARK, trending_candles(100, 40_000.0, 0.5));
    feed
}

fn engine_with(config: HiveConfig, registry: AgentRegistry) -> TradingEngine {
    TradingEngine::new(
        config,
        Arc::new(Store::open_in_memory().unwrap()),
        Arc::new(registry),
        rising_feed(),
        MemoryStore::in_memory(),
    )
}

fn engine() -> TradingEngine {
    let config = HiveConfig::default();
    let registry = AgentRegistry::rule_based(&config.agents);
    engine_with(config, registry)
}

fn replay_candles(n: usize) -> BTreeMap<String, Vec<hive::models::Candle>> {
    let mut candles = BTreeMap::new();
    candles.insert("SOLUSDT".to_string(), trending_candles(n, 100.0, 1.0));
    candles.insert(MARKET_BENCHMARK.to_string(), trending_candles(n, 40_000.0, 0.5));
    candles
}

#[tokio::test]
async fn concurrent_requests_for_one_symbol_share_a_single_analysis() {
    let config = HiveConfig::default();
    let registry = AgentRegistry::rule_based(&config.agents).with_agent(Arc::new(
        MockAgent::new(AgentKind::Technical, 0.9).with_delay(Duration::from_millis(200)),
    ));
    let engine = engine_with(config, registry);
    engine.init_user("alice").unwrap();

    let (first, second) = tokio::join!(
        engine.analyze_on_demand("alice", "SOLUSDT"),
        engine.analyze_on_demand("alice", "solusdt"),
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    let decided = outcomes
        .iter()
        .filter(|o| matches!(o, OnDemand::Decided { .. }))
        .count();
    let deduplicated = outcomes
        .iter()
        .filter(|o| matches!(o, OnDemand::AlreadyAnalyzing))
        .count();
    assert_eq!(decided, 1);
    assert_eq!(deduplicated, 1);

    let tracked = engine.opportunities();
    assert_eq!(tracked.len(), 1);
    assert!(tracked[0].status.is_terminal());
}

#[tokio::test]
async fn resolved_symbol_is_not_analyzed_again() {
    let engine = engine();
    engine.init_user("alice").unwrap();

    let first = engine.analyze_on_demand("alice", "SOLUSDT").await.unwrap();
    let second = engine.analyze_on_demand("alice", "SOLUSDT").await.unwrap();

    assert!(matches!(first, OnDemand::Decided { .. }));
    let tracked = engine.opportunities();
    assert_eq!(tracked.len(), 1);
    assert!(tracked[0].status.is_terminal());
    assert!(matches!(second, OnDemand::AlreadyResolved(status) if status == tracked[0].status));

    let risk_runs = engine
        .store()
        .agent_metrics()
        .unwrap()
        .into_iter()
        .find(|m| m.agent_name == "RiskManager")
        .map(|m| m.success_count)
        .unwrap_or(0);
    assert_eq!(risk_runs, 1);
}

#[tokio::test]
async fn decided_request_reports_the_uppercased_symbol() {
    let engine = engine();
    engine.init_user("alice").unwrap();

    match engine.analyze_on_demand("alice", "solusdt").await.unwrap() {
        OnDemand::Decided { decision, .. } => assert_eq!(decision.symbol, "SOLUSDT"),
        other => panic!("nothing else was running: {other:?}"),
    }
}

#[tokio::test]
async fn cycle_requires_an_active_bot() {
    let engine = engine();
    engine.init_user("alice").unwrap();
    assert!(!engine.bot_active("alice").unwrap());

    let err = engine.run_cycle("alice").await.unwrap_err();
    assert!(matches!(err, EngineError::BotInactive(user) if user == "alice"));
}

#[tokio::test]
async fn active_cycle_accounts_for_every_decision() {
    let mut config = HiveConfig::default();
    config.strategy.trading.symbols_to_analyze = vec!["SOLUSDT".to_string()];
    let registry = AgentRegistry::rule_based(&config.agents);
    let engine = engine_with(config, registry);
    engine.init_user("alice").unwrap();
    engine.set_bot_active("alice", true).unwrap();

    let report = engine.run_cycle("alice").await.unwrap();

    assert_eq!(report.decisions, 1);
    let accounted = report.bought.len()
        + report.shorted.len()
        + report.sold.len()
        + report.avoided
        + report.skipped.len()
        + report.errors.len();
    assert_eq!(accounted, 1);
    assert!(report.reviewed.is_empty());
}

#[tokio::test]
async fn init_user_is_idempotent() {
    let engine = engine();
    assert!(engine.init_user("alice").unwrap());
    assert!(!engine.init_user("alice").unwrap());
}

#[tokio::test]
async fn backtest_stream_ends_with_close() {
    let engine = engine();
    let (tx, mut rx) = mpsc::channel(64);
    let sink = EventSink::streaming(tx, CancellationToken::new());
    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    });

    let report = engine
        .backtest(
            BacktestRequest {
                user_id: "backtester".to_string(),
                candles: replay_candles(60),
                warmup: 30,
                max_steps: Some(5),
                ..Default::default()
            },
            sink,
        )
        .await
        .unwrap();
    let events = collector.await.unwrap();

    assert_eq!(report.steps, 5);
    assert!(!report.cancelled);
    assert_eq!(report.starting_balance, dec!(100000));
    let analyses = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Analysis { .. }))
        .count();
    assert_eq!(analyses, 10);
    assert!(matches!(events.last(), Some(StreamEvent::Close { .. })));

    // The replay trades against its own portfolio.
    assert!(!engine.store().user_exists("backtester").unwrap());
}

#[tokio::test]
async fn backtest_stops_when_the_consumer_goes_away() {
    let engine = engine();
    let (tx, rx) = mpsc::channel(64);
    drop(rx);
    let sink = EventSink::streaming(tx, CancellationToken::new());

    let report = engine
        .backtest(
            BacktestRequest {
                user_id: "backtester".to_string(),
                candles: replay_candles(60),
                warmup: 30,
                ..Default::default()
            },
            sink,
        )
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.steps, 0);
}

#[tokio::test]
async fn backtest_without_candles_fails_and_still_closes() {
    let engine = engine();
    let (tx, mut rx) = mpsc::channel(8);
    let sink = EventSink::streaming(tx, CancellationToken::new());

    let result = engine
        .backtest(
            BacktestRequest {
                user_id: "backtester".to_string(),
                ..Default::default()
            },
            sink,
        )
        .await;
    assert!(result.is_err());

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(StreamEvent::Error { .. })));
    assert!(matches!(events.last(), Some(StreamEvent::Close { .. })));
}

#[tokio::test]
async fn fresh_user_has_matching_main_and_shadow_equity() {
    let engine = engine();
    engine.init_user("alice").unwrap();

    let comparison = engine.compare_shadow("alice").await.unwrap();
    assert_eq!(comparison.main_equity, dec!(100000));
    assert_eq!(comparison.shadow_equity, dec!(100000));
    assert_eq!(comparison.relative_difference_percent, 0.0);
    assert_eq!(comparison.shadow_trades, 0);
}

#[tokio::test]
async fn optimize_stores_a_shadow_only_when_it_proposes_changes() {
    let engine = engine();
    engine.init_user("alice").unwrap();

    let report = engine.optimize("alice").await.unwrap();
    let shadow = engine.store().shadow_config("alice").await.unwrap();
    assert_eq!(shadow.is_some(), !report.suggested_changes.is_empty());
}

#[tokio::test]
async fn sell_all_with_nothing_open_fails() {
    let engine = engine();
    engine.init_user("alice").unwrap();

    let report = engine.sell_all("alice").await.unwrap();
    assert_eq!(report.status, BatchStatus::Failed);
    assert!(report.items.is_empty());
    assert_eq!(engine.maintenance().unwrap(), 0);
}

#[tokio::test]
async fn manual_close_settles_at_the_feed_price() {
    let engine = engine();
    engine.init_user("alice").unwrap();

    let missing = engine.close_position("alice", "SOLUSDT", "done").await.unwrap_err();
    assert!(matches!(
        missing,
        EngineError::Portfolio(PortfolioError::NoSuchPosition { .. })
    ));

    engine
        .execution()
        .engine()
        .buy(
            "alice",
            PortfolioKind::Main,
            "SOLUSDT",
            dec!(1000),
            dec!(100),
            BuyContext::default(),
        )
        .await
        .unwrap();
    let trade = engine
        .close_position("alice", "solusdt", "taking profit by hand")
        .await
        .unwrap();

    assert_eq!(trade.symbol, "SOLUSDT");
    assert_eq!(trade.reason, "taking profit by hand");
    assert!(trade.pnl > dec!(0));
    let portfolio = engine
        .execution()
        .engine()
        .portfolio("alice", PortfolioKind::Main)
        .unwrap();
    assert!(portfolio.positions.is_empty());
}

#[tokio::test]
async fn daemon_stops_on_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = HiveConfig::default();
    config.store.sqlite_path = dir
        .path()
        .join("state/hive.db")
        .to_string_lossy()
        .into_owned();
    config.store.embedder = EmbedderKind::Hashing;
    config.scheduler.users = vec!["alice".to_string()];

    let runtime = hive::build_runtime(&config).unwrap();
    runtime.engine.init_user("alice").unwrap();
    let daemon = Daemon::new(runtime);
    let cancel = daemon.cancel_token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });
    tokio::time::timeout(Duration::from_secs(5), daemon.run())
        .await
        .unwrap()
        .unwrap();
}
