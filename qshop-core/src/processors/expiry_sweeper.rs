//! ExpirySweeper processor.
//!
//! Periodically walks the registry for payment requests whose deadline
//! has passed, removes them, and tells the paying user the window
//! closed. A settlement that lands between two sweeps still wins: the
//! sweep only sees requests that are still `Open` at sweep time.

use crate::engine::ReconciliationEngine;
use crate::events::{DeliveryEvent, DeliveryEventSender};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct ExpirySweeper {
    engine: Arc<ReconciliationEngine>,
    delivery_tx: DeliveryEventSender,
    interval: std::time::Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl ExpirySweeper {
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        delivery_tx: DeliveryEventSender,
        interval: std::time::Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            delivery_tx,
            interval,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "ExpirySweeper started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("ExpirySweeper received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }

        info!("ExpirySweeper shutdown complete");
    }

    async fn sweep(&self) {
        let expired = self.engine.sweep_expired(OffsetDateTime::now_utc()).await;
        if expired.is_empty() {
            return;
        }

        info!(count = expired.len(), "expired open payment requests");

        for request in expired {
            let event = DeliveryEvent::PaymentExpired {
                user_id: request.user_id,
                request_id: request.id.clone(),
                payable_total: request.payable_total(),
            };
            if let Err(e) = self.delivery_tx.send(event).await {
                warn!(
                    request_id = %request.id,
                    error = %e,
                    "delivery channel closed; expiry notice dropped"
                );
            }
        }
    }
}
