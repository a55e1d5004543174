//! Indicator math over candle closes. Every function returns `None` when the
//! history is too short for the requested period.

use hive_models::market::Candle;

pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const SMA_SHORT: usize = 20;
pub const SMA_LONG: usize = 50;
pub const ATR_PERIOD: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(Candle::close_f64).collect()
}

pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// EMA series seeded with the SMA of the first `period` values.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    let mut series = Vec::with_capacity(values.len() - period + 1);
    series.push(seed);
    for value in &values[period..] {
        let prev = series[series.len() - 1];
        series.push(value * k + prev * (1.0 - k));
    }
    series
}

/// Wilder-smoothed RSI.
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() <= period {
        return None;
    }
    let changes: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let mut avg_gain = changes[..period].iter().filter(|c| **c > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss =
        changes[..period].iter().filter(|c| **c < 0.0).map(|c| -c).sum::<f64>() / period as f64;

    for change in &changes[period..] {
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast >= slow || values.len() < slow + signal {
        return None;
    }
    let fast_ema = ema_series(values, fast);
    let slow_ema = ema_series(values, slow);
    // Align the fast series to the slow one's start.
    let offset = slow - fast;
    let line: Vec<f64> = slow_ema
        .iter()
        .zip(&fast_ema[offset..])
        .map(|(s, f)| f - s)
        .collect();
    let signal_series = ema_series(&line, signal);
    let line_last = *line.last()?;
    let signal_last = *signal_series.last()?;
    Some(Macd {
        line: line_last,
        signal: signal_last,
        histogram: line_last - signal_last,
    })
}

/// Average true range over the last `period` bars.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() <= period {
        return None;
    }
    let ranges: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let prev_close = w[0].close_f64();
            let high = w[1].high_f64();
            let low = w[1].low_f64();
            (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs())
        })
        .collect();
    sma(&ranges, period)
}

/// Consecutive closes in one direction counted back from the latest bar.
/// Positive for higher closes, negative for lower.
pub fn consecutive_trend(values: &[f64]) -> i32 {
    let mut count = 0i32;
    for pair in values.windows(2).rev() {
        let step = if pair[1] > pair[0] {
            1
        } else if pair[1] < pair[0] {
            -1
        } else {
            0
        };
        if step == 0 || (count != 0 && step != count.signum()) {
            break;
        }
        count += step;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize, start: f64, step: f64) -> Vec<f64> {
        (0..n).map(|i| start + step * i as f64).collect()
    }

    #[test]
    fn sma_of_tail() {
        let values = ramp(10, 1.0, 1.0);
        assert_eq!(sma(&values, 4), Some(8.5));
        assert_eq!(sma(&values, 11), None);
    }

    #[test]
    fn rsi_extremes() {
        assert_eq!(rsi(&ramp(30, 100.0, 1.0), RSI_PERIOD), Some(100.0));
        let falling = rsi(&ramp(30, 100.0, -1.0), RSI_PERIOD).unwrap();
        assert!(falling < 1e-9);
        assert_eq!(rsi(&[1.0; 30], RSI_PERIOD), Some(50.0));
        assert_eq!(rsi(&ramp(14, 1.0, 1.0), RSI_PERIOD), None);
    }

    #[test]
    fn rsi_mixed_is_bounded() {
        let values: Vec<f64> = (0..60)
            .map(|i| {
                let step = if i % 3 == 0 { -2.0 } else { 1.5 };
                100.0 + step * i as f64 / 10.0
            })
            .collect();
        let value = rsi(&values, RSI_PERIOD).unwrap();
        assert!((0.0..=100.0).contains(&value));
    }

    #[test]
    fn macd_positive_in_uptrend() {
        let values: Vec<f64> = (0..80).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let m = macd(&values, MACD_FAST, MACD_SLOW, MACD_SIGNAL).unwrap();
        assert!(m.line > 0.0);
        assert!(m.histogram > 0.0);
        assert!(macd(&values[..30], MACD_FAST, MACD_SLOW, MACD_SIGNAL).is_none());
    }

    #[test]
    fn trend_counts_from_latest_bar() {
        assert_eq!(consecutive_trend(&[1.0, 2.0, 3.0, 4.0]), 3);
        assert_eq!(consecutive_trend(&[5.0, 1.0, 2.0, 3.0]), 2);
        assert_eq!(consecutive_trend(&[4.0, 3.0, 2.0]), -2);
        assert_eq!(consecutive_trend(&[1.0, 1.0]), 0);
        assert_eq!(consecutive_trend(&[1.0]), 0);
    }
}
