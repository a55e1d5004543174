use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hive_models::market::Ticker;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::MarketError;

pub type TickerBatch = Vec<Ticker>;

/// Symbols an upstream connection should carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamInterest {
    All,
    Symbols(BTreeSet<String>),
}

impl StreamInterest {
    pub fn symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StreamInterest::Symbols(symbols.into_iter().map(Into::into).collect())
    }

    /// Union of both interests. Never narrower than either side.
    pub fn merge(&self, other: &StreamInterest) -> StreamInterest {
        match (self, other) {
            (StreamInterest::All, _) | (_, StreamInterest::All) => StreamInterest::All,
            (StreamInterest::Symbols(a), StreamInterest::Symbols(b)) => {
                StreamInterest::Symbols(a.union(b).cloned().collect())
            }
        }
    }

    pub fn matches(&self, symbol: &str) -> bool {
        match self {
            StreamInterest::All => true,
            StreamInterest::Symbols(symbols) => symbols.contains(symbol),
        }
    }
}

/// An upstream ticker connection. A closed receiver means the connection dropped.
#[async_trait]
pub trait TickerSource: Send + Sync {
    async fn open(&self, interest: StreamInterest)
        -> Result<mpsc::Receiver<TickerBatch>, MarketError>;
}

/// Replays ticker batches from a JSON-lines file, one batch (a JSON array of
/// tickers) per line. Event times are restamped on send. The connection closes
/// at end of file, so a reconnect replays from the top.
pub struct JsonLinesSource {
    path: PathBuf,
    interval: Duration,
}

impl JsonLinesSource {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
        }
    }

    fn parse(raw: &str) -> Result<Vec<TickerBatch>, MarketError> {
        raw.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_str::<TickerBatch>(line).map_err(MarketError::from))
            .collect()
    }
}

#[async_trait]
impl TickerSource for JsonLinesSource {
    async fn open(
        &self,
        interest: StreamInterest,
    ) -> Result<mpsc::Receiver<TickerBatch>, MarketError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let batches = Self::parse(&raw)?;
        let interval = self.interval;
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            for batch in batches {
                let now = Utc::now();
                let batch: TickerBatch = batch
                    .into_iter()
                    .filter(|t| interest.matches(&t.symbol))
                    .map(|mut t| {
                        t.event_time = now;
                        t
                    })
                    .collect();
                if !batch.is_empty() && tx.send(batch).await.is_err() {
                    return;
                }
                tokio::time::sleep(interval).await;
            }
            debug!("Ticker replay reached end of file");
        });

        Ok(rx)
    }
}
