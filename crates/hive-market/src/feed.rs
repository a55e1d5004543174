use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use hive_models::market::{Candle, MarketSignals, Ticker};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::MarketError;

/// Source of prices and candles. The only way market data enters the engine.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Most recent `limit` candles, oldest first.
    async fn historical_data(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketError>;

    async fn current_price(&self, symbol: &str) -> Result<Option<Decimal>, MarketError>;

    /// The `n` most liquid symbols.
    async fn top_symbols(&self, n: usize) -> Result<Vec<String>, MarketError>;

    /// Market-wide signals for the macro and sentiment analysts.
    async fn market_signals(&self) -> Result<MarketSignals, MarketError> {
        Ok(MarketSignals::default())
    }
}

/// Serializable contents of an [`InMemoryFeed`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSnapshot {
    pub prices: BTreeMap<String, Decimal>,
    pub candles: BTreeMap<String, Vec<Candle>>,
    /// Quote volume used to rank `top_symbols`.
    pub volumes: BTreeMap<String, Decimal>,
    pub signals: MarketSignals,
}

/// Feed backed by an in-process snapshot. Live tickers can be folded in with
/// [`InMemoryFeed::apply_tickers`].
#[derive(Default)]
pub struct InMemoryFeed {
    state: RwLock<FeedSnapshot>,
}

impl InMemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: FeedSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    /// Load a JSON snapshot from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MarketError> {
        let raw = std::fs::read_to_string(path)?;
        let snapshot: FeedSnapshot = serde_json::from_str(&raw)?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .prices
            .insert(symbol.to_string(), price);
    }

    pub fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(last) = candles.last() {
            state.prices.entry(symbol.to_string()).or_insert(last.close);
        }
        state.candles.insert(symbol.to_string(), candles);
    }

    pub fn set_volume(&self, symbol: &str, volume: Decimal) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .volumes
            .insert(symbol.to_string(), volume);
    }

    pub fn set_signals(&self, signals: MarketSignals) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).signals = signals;
    }

    /// Update last prices from a ticker batch.
    pub fn apply_tickers(&self, tickers: &[Ticker]) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        for ticker in tickers {
            state.prices.insert(ticker.symbol.clone(), ticker.price);
        }
    }
}

#[async_trait]
impl PriceFeed for InMemoryFeed {
    async fn historical_data(
        &self,
        symbol: &str,
        _interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let candles = state.candles.get(symbol).map(Vec::as_slice).unwrap_or(&[]);
        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].to_vec())
    }

    async fn current_price(&self, symbol: &str) -> Result<Option<Decimal>, MarketError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.prices.get(symbol).copied())
    }

    async fn top_symbols(&self, n: usize) -> Result<Vec<String>, MarketError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut symbols: Vec<(String, Decimal)> = state
            .prices
            .keys()
            .chain(state.candles.keys())
            .map(|s| {
                let volume = state.volumes.get(s).copied().unwrap_or_default();
                (s.clone(), volume)
            })
            .collect();
        symbols.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        symbols.dedup_by(|a, b| a.0 == b.0);
        Ok(symbols.into_iter().take(n).map(|(s, _)| s).collect())
    }

    async fn market_signals(&self) -> Result<MarketSignals, MarketError> {
        Ok(self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .signals
            .clone())
    }
}

/// Walks recorded candles one step at a time. At step `i` the feed only sees
/// candles up to and including index `i`, and the current price is that candle's close.
pub struct ReplayFeed {
    candles: BTreeMap<String, Vec<Candle>>,
    signals: MarketSignals,
    cursor: AtomicUsize,
}

impl ReplayFeed {
    pub fn new(candles: BTreeMap<String, Vec<Candle>>, signals: MarketSignals) -> Self {
        Self {
            candles,
            signals,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Number of steps available (length of the longest history).
    pub fn len(&self) -> usize {
        self.candles.values().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn set_cursor(&self, step: usize) {
        self.cursor.store(step, Ordering::SeqCst);
    }

    /// Move to the next step. Returns false when already at the end.
    pub fn advance(&self) -> bool {
        let current = self.cursor();
        if current + 1 >= self.len() {
            return false;
        }
        self.set_cursor(current + 1);
        true
    }

    fn visible(&self, symbol: &str) -> &[Candle] {
        let candles = self.candles.get(symbol).map(Vec::as_slice).unwrap_or(&[]);
        let end = (self.cursor() + 1).min(candles.len());
        &candles[..end]
    }

    pub fn symbols(&self) -> Vec<String> {
        self.candles.keys().cloned().collect()
    }
}

#[async_trait]
impl PriceFeed for ReplayFeed {
    async fn historical_data(
        &self,
        symbol: &str,
        _interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketError> {
        let visible = self.visible(symbol);
        let start = visible.len().saturating_sub(limit);
        Ok(visible[start..].to_vec())
    }

    async fn current_price(&self, symbol: &str) -> Result<Option<Decimal>, MarketError> {
        Ok(self.visible(symbol).last().map(|c| c.close))
    }

    async fn top_symbols(&self, n: usize) -> Result<Vec<String>, MarketError> {
        Ok(self.symbols().into_iter().take(n).collect())
    }

    async fn market_signals(&self) -> Result<MarketSignals, MarketError> {
        Ok(self.signals.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::rising_candles;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn historical_data_returns_tail() {
        let feed = InMemoryFeed::new();
        feed.set_candles("BTCUSDT", rising_candles(50, 100.0, 1.0));

        let candles = feed.historical_data("BTCUSDT", "4h", 10).await.unwrap();
        assert_eq!(candles.len(), 10);
        assert_eq!(candles.last().unwrap().close, dec!(149));
        assert!(feed.historical_data("ETHUSDT", "4h", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn price_defaults_to_last_close() {
        let feed = InMemoryFeed::new();
        feed.set_candles("BTCUSDT", rising_candles(3, 10.0, 1.0));
        assert_eq!(feed.current_price("BTCUSDT").await.unwrap(), Some(dec!(12)));
        feed.set_price("BTCUSDT", dec!(50000));
        assert_eq!(feed.current_price("BTCUSDT").await.unwrap(), Some(dec!(50000)));
        assert_eq!(feed.current_price("NOPEUSDT").await.unwrap(), None);
    }

    #[tokio::test]
    async fn top_symbols_ranked_by_volume() {
        let feed = InMemoryFeed::new();
        feed.set_price("AUSDT", dec!(1));
        feed.set_price("BUSDT", dec!(1));
        feed.set_price("CUSDT", dec!(1));
        feed.set_volume("BUSDT", dec!(500));
        feed.set_volume("CUSDT", dec!(100));

        let top = feed.top_symbols(2).await.unwrap();
        assert_eq!(top, vec!["BUSDT", "CUSDT"]);
    }

    #[tokio::test]
    async fn snapshot_file_loads() {
        let mut snapshot = FeedSnapshot::default();
        snapshot.prices.insert("SOLUSDT".to_string(), dec!(150.5));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.json");
        std::fs::write(&path, serde_json::to_string(&snapshot).unwrap()).unwrap();

        let feed = InMemoryFeed::load(&path).unwrap();
        assert_eq!(feed.current_price("SOLUSDT").await.unwrap(), Some(dec!(150.5)));
    }

    #[tokio::test]
    async fn replay_feed_hides_the_future() {
        let mut candles = BTreeMap::new();
        candles.insert("BTCUSDT".to_string(), rising_candles(5, 100.0, 10.0));
        let feed = ReplayFeed::new(candles, MarketSignals::default());

        assert_eq!(feed.len(), 5);
        assert_eq!(feed.current_price("BTCUSDT").await.unwrap(), Some(dec!(100)));
        assert_eq!(feed.historical_data("BTCUSDT", "1h", 100).await.unwrap().len(), 1);

        while feed.advance() {}
        assert_eq!(feed.cursor(), 4);
        assert_eq!(feed.current_price("BTCUSDT").await.unwrap(), Some(dec!(140)));
        assert_eq!(feed.historical_data("BTCUSDT", "1h", 3).await.unwrap().len(), 3);
    }
}
