use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hive_models::config::StreamConfig;
use hive_models::market::Ticker;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::source::{StreamInterest, TickerBatch, TickerSource};

pub type ConsumerId = u64;

/// How a consumer wants events delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Unbounded queue; nothing is dropped. For state-tracking consumers.
    Reliable,
    /// Bounded queue; events are dropped (and counted) when the consumer lags.
    Lossy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    Tickers(Arc<Vec<Ticker>>),
    /// The upstream dropped; the hub is retrying.
    Disconnected,
    Reconnected,
    /// Retries exhausted. The upstream slot has been cleared.
    Fatal(String),
}

enum ConsumerTx {
    Reliable(mpsc::UnboundedSender<HubEvent>),
    Lossy(mpsc::Sender<HubEvent>),
}

enum ConsumerRx {
    Reliable(mpsc::UnboundedReceiver<HubEvent>),
    Lossy(mpsc::Receiver<HubEvent>),
}

struct Consumer {
    id: ConsumerId,
    filter: Option<BTreeSet<String>>,
    tx: ConsumerTx,
    dropped: Arc<AtomicU64>,
}

impl Consumer {
    /// Non-blocking send. Returns false once the receiver is gone.
    fn deliver(&self, event: HubEvent) -> bool {
        match &self.tx {
            ConsumerTx::Reliable(tx) => tx.send(event).is_ok(),
            ConsumerTx::Lossy(tx) => match tx.try_send(event) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            },
        }
    }
}

/// A registered consumer's end of the hub.
pub struct Subscription {
    id: ConsumerId,
    rx: ConsumerRx,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<HubEvent> {
        match &mut self.rx {
            ConsumerRx::Reliable(rx) => rx.recv().await,
            ConsumerRx::Lossy(rx) => rx.recv().await,
        }
    }

    /// Events dropped because this (lossy) consumer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct Upstream {
    generation: u64,
    interest_tx: watch::Sender<StreamInterest>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct HubState {
    consumers: Vec<Consumer>,
    next_id: ConsumerId,
    interest: Option<StreamInterest>,
    upstream: Option<Upstream>,
    generation: u64,
}

impl HubState {
    /// Deliver to every consumer in registration order, pruning closed ones.
    fn broadcast(&mut self, event: &HubEvent) {
        self.consumers.retain(|c| c.deliver(event.clone()));
    }

    fn fan_out(&mut self, batch: TickerBatch) {
        let all = Arc::new(batch);
        self.consumers.retain(|c| {
            let event = match &c.filter {
                None => HubEvent::Tickers(Arc::clone(&all)),
                Some(filter) => {
                    let subset: Vec<Ticker> = all
                        .iter()
                        .filter(|t| filter.contains(&t.symbol))
                        .cloned()
                        .collect();
                    if subset.is_empty() {
                        return true;
                    }
                    HubEvent::Tickers(Arc::new(subset))
                }
            };
            c.deliver(event)
        });
    }

    fn close_upstream(&mut self) {
        if let Some(upstream) = self.upstream.take() {
            upstream.cancel.cancel();
        }
        self.interest = None;
    }

    /// Clear the upstream slot only if it still belongs to `generation`.
    fn release(&mut self, generation: u64) {
        if self
            .upstream
            .as_ref()
            .is_some_and(|u| u.generation == generation)
        {
            self.close_upstream();
        }
    }
}

/// Fans one upstream ticker connection out to many consumers.
///
/// The upstream is opened by the first [`StreamHub::connect`] and closed when the
/// last consumer disconnects. Later connects widen the interest set; the upstream
/// is reopened with the union.
pub struct StreamHub {
    source: Arc<dyn TickerSource>,
    config: StreamConfig,
    state: Arc<Mutex<HubState>>,
}

fn lock(state: &Mutex<HubState>) -> MutexGuard<'_, HubState> {
    // Hub state stays consistent across a panicking consumer send.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StreamHub {
    pub fn new(source: Arc<dyn TickerSource>, config: StreamConfig) -> Self {
        Self {
            source,
            config,
            state: Arc::new(Mutex::new(HubState::default())),
        }
    }

    /// Register a consumer. `filter` limits delivered tickers to those symbols.
    pub fn subscribe(&self, delivery: Delivery, filter: Option<Vec<String>>) -> Subscription {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = state.next_id;
        let dropped = Arc::new(AtomicU64::new(0));
        let (tx, rx) = match delivery {
            Delivery::Reliable => {
                let (tx, rx) = mpsc::unbounded_channel();
                (ConsumerTx::Reliable(tx), ConsumerRx::Reliable(rx))
            }
            Delivery::Lossy => {
                let (tx, rx) = mpsc::channel(self.config.display_buffer.max(1));
                (ConsumerTx::Lossy(tx), ConsumerRx::Lossy(rx))
            }
        };
        state.consumers.push(Consumer {
            id,
            filter: filter.map(|f| f.into_iter().collect()),
            tx,
            dropped: Arc::clone(&dropped),
        });
        debug!(consumer = id, ?delivery, "Consumer subscribed");
        Subscription { id, rx, dropped }
    }

    /// Open the upstream if closed, otherwise widen its interest.
    pub fn connect(&self, interest: StreamInterest) {
        let mut state = lock(&self.state);
        let merged = match &state.interest {
            Some(current) => current.merge(&interest),
            None => interest,
        };
        state.interest = Some(merged.clone());

        if let Some(upstream) = &state.upstream {
            upstream.interest_tx.send_if_modified(|current| {
                if *current == merged {
                    false
                } else {
                    *current = merged.clone();
                    true
                }
            });
            return;
        }

        state.generation += 1;
        let generation = state.generation;
        let (interest_tx, interest_rx) = watch::channel(merged);
        let cancel = CancellationToken::new();
        state.upstream = Some(Upstream {
            generation,
            interest_tx,
            cancel: cancel.clone(),
        });
        drop(state);

        info!(generation, "Opening upstream ticker connection");
        tokio::spawn(upstream_loop(
            Arc::clone(&self.source),
            self.config.clone(),
            Arc::clone(&self.state),
            generation,
            interest_rx,
            cancel,
        ));
    }

    /// Remove one consumer. The upstream closes when no consumers remain.
    pub fn disconnect(&self, id: ConsumerId) {
        let mut state = lock(&self.state);
        state.consumers.retain(|c| c.id != id);
        if state.consumers.is_empty() {
            info!("Last consumer left; closing upstream");
            state.close_upstream();
        }
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).upstream.is_some()
    }

    pub fn consumer_count(&self) -> usize {
        lock(&self.state).consumers.len()
    }

    pub fn interest(&self) -> Option<StreamInterest> {
        lock(&self.state).interest.clone()
    }
}

fn backoff_delay(config: &StreamConfig, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    let delay = config
        .reconnect_base_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(config.reconnect_max_delay_ms);
    Duration::from_millis(delay)
}

async fn upstream_loop(
    source: Arc<dyn TickerSource>,
    config: StreamConfig,
    state: Arc<Mutex<HubState>>,
    generation: u64,
    mut interest_rx: watch::Receiver<StreamInterest>,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;
    let mut announce_reconnect = false;
    let mut last_error = String::new();

    'connection: loop {
        if failures > 0 {
            if failures > config.max_reconnect_attempts {
                error!(generation, error = %last_error, "Upstream reconnect attempts exhausted");
                let mut state = lock(&state);
                state.broadcast(&HubEvent::Fatal(last_error));
                state.release(generation);
                return;
            }
            let delay = backoff_delay(&config, failures);
            tokio::select! {
                _ = cancel.cancelled() => break 'connection,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let interest = interest_rx.borrow_and_update().clone();
        let mut rx = match source.open(interest).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(attempt = failures + 1, error = %e, "Failed to open upstream");
                last_error = e.to_string();
                failures += 1;
                continue;
            }
        };

        if announce_reconnect {
            info!(generation, "Upstream reconnected");
            lock(&state).broadcast(&HubEvent::Reconnected);
            announce_reconnect = false;
        }
        let mut delivered = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break 'connection,
                changed = interest_rx.changed() => {
                    if changed.is_err() {
                        break 'connection;
                    }
                    info!(generation, "Interest widened; reopening upstream");
                    continue 'connection;
                }
                batch = rx.recv() => match batch {
                    Some(batch) => {
                        if !delivered {
                            delivered = true;
                            failures = 0;
                        }
                        let mut state = lock(&state);
                        state.fan_out(batch);
                        if state.consumers.is_empty() {
                            state.release(generation);
                            break 'connection;
                        }
                    }
                    None => {
                        warn!(generation, "Upstream connection dropped");
                        lock(&state).broadcast(&HubEvent::Disconnected);
                        announce_reconnect = true;
                        last_error = "upstream closed".to_string();
                        failures = if delivered { 1 } else { failures + 1 };
                        continue 'connection;
                    }
                }
            }
        }
    }

    debug!(generation, "Upstream task stopped");
}
