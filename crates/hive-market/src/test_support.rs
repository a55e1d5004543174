//! Scripted fakes for exercising the hub, the scanner and anything built on a feed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hive_models::market::{Candle, Ticker};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::error::MarketError;
use crate::source::{StreamInterest, TickerBatch, TickerSource};

pub fn decimal(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or_default()
}

pub fn ticker(symbol: &str, price: f64) -> Ticker {
    ticker_at(symbol, price, Utc::now())
}

pub fn ticker_at(symbol: &str, price: f64, at: DateTime<Utc>) -> Ticker {
    Ticker {
        symbol: symbol.to_string(),
        price: decimal(price),
        price_change_percent: 0.0,
        event_time: at,
    }
}

/// `n` hourly candles whose close starts at `start` and moves by `step` each bar.
pub fn rising_candles(n: usize, start: f64, step: f64) -> Vec<Candle> {
    let origin = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    (0..n)
        .map(|i| {
            let close = start + step * i as f64;
            let open = close - step;
            Candle {
                open_time: origin + chrono::Duration::hours(i as i64),
                open: decimal(open),
                high: decimal(close.max(open) * 1.01),
                low: decimal(close.min(open) * 0.99),
                close: decimal(close),
                volume: decimal(1_000.0),
            }
        })
        .collect()
}

/// Poll `condition` until it holds. Panics after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within 2s");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Default)]
struct ChannelState {
    tx: Option<mpsc::Sender<TickerBatch>>,
    interests: Vec<StreamInterest>,
    open_count: usize,
    fail_next: usize,
}

/// Ticker source driven by the test: push batches, drop the connection, or
/// make the next opens fail.
#[derive(Default)]
pub struct ChannelSource {
    state: Mutex<ChannelState>,
}

impl ChannelSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Successful opens so far.
    pub fn open_count(&self) -> usize {
        self.state().open_count
    }

    pub fn last_interest(&self) -> Option<StreamInterest> {
        self.state().interests.last().cloned()
    }

    pub fn fail_next_opens(&self, n: usize) {
        self.state().fail_next = n;
    }

    pub fn is_open(&self) -> bool {
        self.state().tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Send a batch on the current connection. False when none is open.
    pub async fn push(&self, batch: TickerBatch) -> bool {
        let tx = self.state().tx.clone();
        match tx {
            Some(tx) => tx.send(batch).await.is_ok(),
            None => false,
        }
    }

    /// Close the current connection as if the upstream hung up.
    pub fn drop_connection(&self) {
        self.state().tx = None;
    }
}

#[async_trait]
impl TickerSource for ChannelSource {
    async fn open(
        &self,
        interest: StreamInterest,
    ) -> Result<mpsc::Receiver<TickerBatch>, MarketError> {
        let mut state = self.state();
        state.interests.push(interest);
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(MarketError::Upstream("scripted open failure".to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        state.tx = Some(tx);
        state.open_count += 1;
        Ok(rx)
    }
}
