use std::sync::{PoisonError, RwLock};

use hive_models::agent_message::AgentKind;
use hive_models::context::{ContextSnapshot, ContextUpdate};
use tracing::warn;

/// Market context shared by the analysts of one run.
///
/// Macro owns the regime fields and Sentiment owns the mood fields. Readers get
/// an owned copy, so a snapshot is never half-updated.
#[derive(Debug, Default)]
pub struct SharedContext {
    inner: RwLock<ContextSnapshot>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge the present fields of `update`.
    pub fn update_context(&self, update: ContextUpdate) {
        if update.is_empty() {
            return;
        }
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(update);
    }

    /// Merge only the fields `owner` is allowed to write.
    pub fn update_from(&self, owner: AgentKind, mut update: ContextUpdate) {
        let stripped = match owner {
            AgentKind::Macro => update.strip_sentiment_fields(),
            AgentKind::Sentiment => update.strip_macro_fields(),
            AgentKind::Technical | AgentKind::Risk => {
                let mut all = update.strip_macro_fields();
                all.extend(update.strip_sentiment_fields());
                all
            }
        };
        if !stripped.is_empty() {
            warn!(agent = %owner, fields = ?stripped, "Dropped context fields outside agent ownership");
        }
        self.update_context(update);
    }

    pub fn reset(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = ContextSnapshot::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_models::context::{MarketRegime, Sentiment};

    #[test]
    fn partial_update_keeps_other_fields() {
        let context = SharedContext::new();
        context.update_context(ContextUpdate {
            sentiment: Some(Sentiment::Bullish),
            sentiment_score: Some(0.6),
            ..Default::default()
        });
        context.update_context(ContextUpdate {
            regime_score: Some(8.0),
            ..Default::default()
        });

        let snapshot = context.snapshot();
        assert_eq!(snapshot.sentiment, Sentiment::Bullish);
        assert_eq!(snapshot.sentiment_score, 0.6);
        assert_eq!(snapshot.regime_score, 8.0);
        assert_eq!(snapshot.market_regime, MarketRegime::Neutral);
    }

    #[test]
    fn owner_cannot_write_foreign_fields() {
        let context = SharedContext::new();
        context.update_from(
            AgentKind::Sentiment,
            ContextUpdate {
                market_regime: Some(MarketRegime::RiskOff),
                regime_score: Some(1.0),
                sentiment: Some(Sentiment::Bearish),
                ..Default::default()
            },
        );

        let snapshot = context.snapshot();
        assert_eq!(snapshot.market_regime, MarketRegime::Neutral);
        assert_eq!(snapshot.regime_score, 5.0);
        assert_eq!(snapshot.sentiment, Sentiment::Bearish);
    }

    #[test]
    fn technical_writes_nothing() {
        let context = SharedContext::new();
        let before = context.snapshot();
        context.update_from(
            AgentKind::Technical,
            ContextUpdate {
                regime_score: Some(9.0),
                key_topics: Some(vec!["ETF".to_string()]),
                ..Default::default()
            },
        );
        let after = context.snapshot();
        assert_eq!(after.regime_score, before.regime_score);
        assert!(after.key_topics.is_empty());
    }

    #[test]
    fn concurrent_owners_do_not_clobber() {
        let context = std::sync::Arc::new(SharedContext::new());
        let macro_ctx = std::sync::Arc::clone(&context);
        let sentiment_ctx = std::sync::Arc::clone(&context);

        let a = std::thread::spawn(move || {
            for i in 0..100 {
                macro_ctx.update_from(
                    AgentKind::Macro,
                    ContextUpdate {
                        regime_score: Some(f64::from(i % 10)),
                        ..Default::default()
                    },
                );
            }
        });
        let b = std::thread::spawn(move || {
            for _ in 0..100 {
                sentiment_ctx.update_from(
                    AgentKind::Sentiment,
                    ContextUpdate {
                        sentiment: Some(Sentiment::Bullish),
                        ..Default::default()
                    },
                );
            }
        });
        a.join().unwrap();
        b.join().unwrap();

        let snapshot = context.snapshot();
        assert_eq!(snapshot.sentiment, Sentiment::Bullish);
        assert_eq!(snapshot.regime_score, 9.0);
    }
}
