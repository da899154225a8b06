//! SnapshotFlusher processor.
//!
//! Periodically writes the account, inventory, and catalog stores to
//! their JSON files, and performs one final flush on shutdown so the
//! last interval's mutations survive a clean restart. A crash between
//! flushes loses at most one interval of store mutations; open payment
//! requests are deliberately not persisted at all.

use crate::stores::{AccountStore, CatalogStore, InventoryStore, flush_stores};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

pub struct SnapshotFlusher {
    data_dir: PathBuf,
    accounts: Arc<AccountStore>,
    inventory: Arc<InventoryStore>,
    catalog: Arc<CatalogStore>,
    interval: std::time::Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl SnapshotFlusher {
    pub fn new(
        data_dir: PathBuf,
        accounts: Arc<AccountStore>,
        inventory: Arc<InventoryStore>,
        catalog: Arc<CatalogStore>,
        interval: std::time::Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            data_dir,
            accounts,
            inventory,
            catalog,
            interval,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!(
            data_dir = %self.data_dir.display(),
            interval_secs = self.interval.as_secs(),
            "SnapshotFlusher started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a boot does not
        // rewrite the files it just read.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("SnapshotFlusher received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    self.flush().await;
                }
            }
        }

        // Final flush so shutdown never loses the last interval.
        self.flush().await;
        info!("SnapshotFlusher shutdown complete");
    }

    async fn flush(&self) {
        if let Err(e) =
            flush_stores(&self.data_dir, &self.accounts, &self.inventory, &self.catalog).await
        {
            error!(error = %e, data_dir = %self.data_dir.display(), "store snapshot failed");
        }
    }
}
