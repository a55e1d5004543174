use std::sync::Arc;
use std::time::Duration;

use hive_market::{Delivery, HubEvent, InMemoryFeed, StreamHub, StreamInterest};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::TradingEngine;
use crate::error::EngineError;
use crate::Runtime;

/// The long-running process: opportunity scanner, live price updates,
/// scheduled trading cycles and housekeeping.
pub struct Daemon {
    engine: Arc<TradingEngine>,
    feed: Arc<InMemoryFeed>,
    hub: Option<Arc<StreamHub>>,
    cancel: CancellationToken,
}

impl Daemon {
    pub fn new(runtime: Runtime) -> Self {
        Self {
            engine: runtime.engine,
            feed: runtime.feed,
            hub: runtime.hub,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns a CancellationToken that can be used to trigger shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the daemon until cancelled.
    pub async fn run(&self) -> Result<(), EngineError> {
        info!("Hive daemon starting");

        let mut join_set = tokio::task::JoinSet::new();

        if let Some(hub) = &self.hub {
            if self.engine.config().scanner.enabled {
                let scanner = Arc::clone(self.engine.scanner());
                let hub = Arc::clone(hub);
                let cancel = self.cancel.clone();
                join_set.spawn(async move {
                    if let Err(e) = scanner.run(hub, cancel).await {
                        error!(error = %e, "Opportunity scanner stopped");
                    }
                });

                let engine = Arc::clone(&self.engine);
                let cancel = self.cancel.clone();
                join_set.spawn(async move {
                    detection_loop(engine, cancel).await;
                });
            }

            let hub = Arc::clone(hub);
            let feed = Arc::clone(&self.feed);
            let cancel = self.cancel.clone();
            join_set.spawn(async move {
                price_loop(hub, feed, cancel).await;
            });
        } else {
            info!("No ticker stream configured; scanner and live prices disabled");
        }

        {
            let engine = Arc::clone(&self.engine);
            let cancel = self.cancel.clone();
            join_set.spawn(async move {
                cycle_loop(engine, cancel).await;
            });
        }

        {
            let engine = Arc::clone(&self.engine);
            let cancel = self.cancel.clone();
            join_set.spawn(async move {
                maintenance_loop(engine, cancel).await;
            });
        }

        info!("All daemon tasks started");

        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Daemon task panicked");
            }
        }

        info!("Hive daemon stopped");
        Ok(())
    }
}

/// Keep the in-memory feed's prices current from the ticker stream.
async fn price_loop(hub: Arc<StreamHub>, feed: Arc<InMemoryFeed>, cancel: CancellationToken) {
    let mut subscription = hub.subscribe(Delivery::Lossy, None);
    hub.connect(StreamInterest::All);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = subscription.recv() => match event {
                Some(HubEvent::Tickers(batch)) => feed.apply_tickers(&batch),
                Some(HubEvent::Fatal(reason)) => {
                    warn!(reason = %reason, "Price updates lost the ticker stream");
                    break;
                }
                Some(_) => {}
                None => break,
            }
        }
    }

    hub.disconnect(subscription.id());
    if subscription.dropped() > 0 {
        debug!(dropped = subscription.dropped(), "Price loop dropped ticker batches");
    }
}

async fn detection_loop(engine: Arc<TradingEngine>, cancel: CancellationToken) {
    let mut detections = engine.scanner().detections();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            detection = detections.recv() => match detection {
                Ok(opportunity) => info!(
                    symbol = %opportunity.symbol,
                    change = opportunity.price_change_percent,
                    "Opportunity detected"
                ),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Detection log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    }
}

async fn cycle_loop(engine: Arc<TradingEngine>, cancel: CancellationToken) {
    let scheduler = engine.config().scheduler.clone();
    let interval = Duration::from_secs(scheduler.cycle_interval_seconds.max(1));

    loop {
        for user_id in &scheduler.users {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Cycle loop shutting down");
                    return;
                }
                result = engine.run_cycle(user_id) => match result {
                    Ok(_) => {}
                    Err(EngineError::BotInactive(_)) => {
                        debug!(user_id = %user_id, "Bot inactive; cycle skipped")
                    }
                    Err(e) => error!(user_id = %user_id, error = %e, "Trading cycle failed"),
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Cycle loop shutting down");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

async fn maintenance_loop(engine: Arc<TradingEngine>, cancel: CancellationToken) {
    let interval = Duration::from_secs(engine.config().scheduler.maintenance_interval_seconds.max(1));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Maintenance loop shutting down");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = engine.maintenance() {
                    error!(error = %e, "Maintenance failed");
                }
            }
        }
    }
}
