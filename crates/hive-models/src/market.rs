use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::context::FearAndGreed;

/// OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    pub fn close_f64(&self) -> f64 {
        self.close.to_f64().unwrap_or(0.0)
    }

    pub fn high_f64(&self) -> f64 {
        self.high.to_f64().unwrap_or(0.0)
    }

    pub fn low_f64(&self) -> f64 {
        self.low.to_f64().unwrap_or(0.0)
    }
}

/// A single price update from the live ticker stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub price: Decimal,
    /// Rolling 24h change reported by the upstream, if any.
    #[serde(default)]
    pub price_change_percent: f64,
    pub event_time: DateTime<Utc>,
}

/// Market-wide inputs for the macro and sentiment analysts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSignals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fear_and_greed: Option<FearAndGreed>,
    /// 24h change of total market capitalisation, percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap_change_24h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub btc_dominance: Option<f64>,
    #[serde(default)]
    pub headlines: Vec<String>,
    #[serde(default)]
    pub trending: Vec<String>,
}
