use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hive_models::config::ScannerConfig;
use hive_models::market::Ticker;
use hive_models::opportunity::{Opportunity, OpportunityStatus};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::MarketError;
use crate::hub::{Delivery, HubEvent, StreamHub};
use crate::source::StreamInterest;

/// Outcome of asking to analyze a symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum BeginAnalysis {
    /// The caller owns the analysis and must `resolve` it.
    Started(Opportunity),
    AlreadyAnalyzing,
    AlreadyResolved(OpportunityStatus),
    NotTracked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Bought,
    Ignored,
}

impl From<Resolution> for OpportunityStatus {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Bought => OpportunityStatus::Bought,
            Resolution::Ignored => OpportunityStatus::Ignored,
        }
    }
}

struct PriceWindow {
    base: Decimal,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
struct ScannerState {
    /// Oldest first.
    opportunities: VecDeque<Opportunity>,
    windows: HashMap<String, PriceWindow>,
}

impl ScannerState {
    fn latest_mut(&mut self, symbol: &str) -> Option<&mut Opportunity> {
        self.opportunities.iter_mut().rev().find(|o| o.symbol == symbol)
    }

    fn has_open(&self, symbol: &str) -> bool {
        self.opportunities
            .iter()
            .any(|o| o.symbol == symbol && !o.status.is_terminal())
    }

    /// Drop the oldest resolved records beyond `cap`. Open records are never dropped.
    fn trim(&mut self, cap: usize) {
        while self.opportunities.len() > cap {
            match self.opportunities.iter().position(|o| o.status.is_terminal()) {
                Some(index) => {
                    self.opportunities.remove(index);
                }
                None => break,
            }
        }
    }
}

/// Tracks fast-moving symbols and the analysis lifecycle of each detection.
///
/// All transitions go through one mutex, so two callers racing on the same
/// symbol see exactly one `Started`.
pub struct OpportunityScanner {
    config: ScannerConfig,
    state: Mutex<ScannerState>,
    detections: broadcast::Sender<Opportunity>,
}

impl OpportunityScanner {
    pub fn new(config: ScannerConfig) -> Self {
        let (detections, _) = broadcast::channel(64);
        Self {
            config,
            state: Mutex::new(ScannerState::default()),
            detections,
        }
    }

    fn state(&self) -> MutexGuard<'_, ScannerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receiver for newly detected opportunities.
    pub fn detections(&self) -> broadcast::Receiver<Opportunity> {
        self.detections.subscribe()
    }

    /// Fold a ticker batch into the price windows. Returns new detections.
    pub fn observe(&self, tickers: &[Ticker]) -> Vec<Opportunity> {
        let window = chrono::Duration::seconds(self.config.window_seconds as i64);
        let mut detected = Vec::new();
        let mut state = self.state();

        for ticker in tickers {
            if !ticker.symbol.ends_with(&self.config.quote_suffix) || ticker.price <= Decimal::ZERO {
                continue;
            }
            let Some(current) = state.windows.get(&ticker.symbol) else {
                state.windows.insert(
                    ticker.symbol.clone(),
                    PriceWindow {
                        base: ticker.price,
                        started_at: ticker.event_time,
                    },
                );
                continue;
            };

            let expired = ticker.event_time - current.started_at > window;
            let change = ((ticker.price - current.base) / current.base * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0);
            let fresh = PriceWindow {
                base: ticker.price,
                started_at: ticker.event_time,
            };

            if expired {
                state.windows.insert(ticker.symbol.clone(), fresh);
                continue;
            }
            if change > self.config.threshold_percent {
                state.windows.insert(ticker.symbol.clone(), fresh);
                if state.has_open(&ticker.symbol) {
                    debug!(symbol = %ticker.symbol, change, "Move ignored; opportunity already open");
                    continue;
                }
                let opportunity = Opportunity::detected(ticker.symbol.clone(), change);
                info!(symbol = %ticker.symbol, change_percent = change, "Fast mover detected");
                state.opportunities.push_back(opportunity.clone());
                detected.push(opportunity);
            }
        }

        state.trim(self.config.max_tracked);
        drop(state);

        for opportunity in &detected {
            // No receivers is fine.
            let _ = self.detections.send(opportunity.clone());
        }
        detected
    }

    /// Record a detection for `symbol` unless one is already open.
    pub fn track(&self, symbol: &str, price_change_percent: f64) -> Option<Opportunity> {
        let mut state = self.state();
        if state.has_open(symbol) {
            return None;
        }
        let opportunity = Opportunity::detected(symbol, price_change_percent);
        state.opportunities.push_back(opportunity.clone());
        state.trim(self.config.max_tracked);
        Some(opportunity)
    }

    /// `detected -> analyzing` for the latest record of `symbol`.
    pub fn begin_analysis(&self, symbol: &str) -> BeginAnalysis {
        let mut state = self.state();
        let Some(latest) = state.latest_mut(symbol) else {
            return BeginAnalysis::NotTracked;
        };
        match latest.status {
            OpportunityStatus::Detected => {
                latest.status = OpportunityStatus::Analyzing;
                BeginAnalysis::Started(latest.clone())
            }
            OpportunityStatus::Analyzing => BeginAnalysis::AlreadyAnalyzing,
            status => BeginAnalysis::AlreadyResolved(status),
        }
    }

    /// Like `begin_analysis`, but an untracked symbol gets a record first.
    /// A resolved symbol reports its status and is not analyzed again.
    pub fn begin_analysis_or_track(&self, symbol: &str) -> BeginAnalysis {
        let mut state = self.state();
        if state.latest_mut(symbol).is_none() {
            state.opportunities.push_back(Opportunity::detected(symbol, 0.0));
            state.trim(self.config.max_tracked);
        }
        let Some(latest) = state.latest_mut(symbol) else {
            return BeginAnalysis::NotTracked;
        };
        match latest.status {
            OpportunityStatus::Detected => {
                latest.status = OpportunityStatus::Analyzing;
                BeginAnalysis::Started(latest.clone())
            }
            OpportunityStatus::Analyzing => BeginAnalysis::AlreadyAnalyzing,
            status => BeginAnalysis::AlreadyResolved(status),
        }
    }

    /// `analyzing -> bought | ignored` for the latest record of `symbol`.
    pub fn resolve(&self, symbol: &str, resolution: Resolution) -> Result<Opportunity, MarketError> {
        let next = OpportunityStatus::from(resolution);
        let mut state = self.state();
        let latest = state
            .latest_mut(symbol)
            .ok_or_else(|| MarketError::NotTracked(symbol.to_string()))?;
        if !latest.status.can_transition_to(next) {
            return Err(MarketError::InvalidTransition {
                symbol: symbol.to_string(),
                from: latest.status,
                to: next,
            });
        }
        latest.status = next;
        debug!(symbol, status = %next, "Opportunity resolved");
        Ok(latest.clone())
    }

    /// Newest first, at most `max_tracked`.
    pub fn opportunities(&self) -> Vec<Opportunity> {
        self.state()
            .opportunities
            .iter()
            .rev()
            .take(self.config.max_tracked)
            .cloned()
            .collect()
    }

    pub fn status(&self, symbol: &str) -> Option<OpportunityStatus> {
        self.state()
            .opportunities
            .iter()
            .rev()
            .find(|o| o.symbol == symbol)
            .map(|o| o.status)
    }

    /// Consume the hub until cancelled. A fatal stream error re-subscribes up to
    /// `resubscribe_attempts` times.
    pub async fn run(
        self: Arc<Self>,
        hub: Arc<StreamHub>,
        cancel: CancellationToken,
    ) -> Result<(), MarketError> {
        let mut attempts: u32 = 0;

        loop {
            let mut subscription = hub.subscribe(Delivery::Reliable, None);
            hub.connect(StreamInterest::All);
            info!(consumer = subscription.id(), "Opportunity scanner subscribed");

            let fatal = loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        hub.disconnect(subscription.id());
                        info!("Opportunity scanner stopped");
                        return Ok(());
                    }
                    event = subscription.recv() => match event {
                        Some(HubEvent::Tickers(batch)) => {
                            self.observe(&batch);
                        }
                        Some(HubEvent::Disconnected) => warn!("Ticker stream disconnected"),
                        Some(HubEvent::Reconnected) => info!("Ticker stream reconnected"),
                        Some(HubEvent::Fatal(reason)) => break reason,
                        None => break "hub closed the subscription".to_string(),
                    }
                }
            };

            hub.disconnect(subscription.id());
            attempts += 1;
            if attempts > self.config.resubscribe_attempts {
                error!(attempts, reason = %fatal, "Opportunity scanner giving up");
                return Err(MarketError::Upstream(fatal));
            }
            warn!(attempt = attempts, reason = %fatal, "Ticker stream failed; resubscribing");

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(Duration::from_secs(u64::from(attempts))) => {}
            }
        }
    }
}
