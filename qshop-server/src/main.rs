//! QRIS Shop Server
//!
//! Hosts the payment reconciliation engine behind the provider callback
//! endpoint, plus the background processors (expiry sweeping, chat
//! delivery, store snapshots).

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::ConfigLoader;
use qshop_core::engine::ReconciliationEngine;
use qshop_core::events::{delivery_event_channel, operator_alert_channel};
use qshop_core::fulfillment::FulfillmentDispatcher;
use qshop_core::notify::{ChatNotifier, HttpChatNotifier, LogNotifier};
use qshop_core::processors::{DeliveryWorker, ExpirySweeper, SnapshotFlusher};
use qshop_core::qr::HttpQrIssuer;
use qshop_core::registry::PaymentRequestRegistry;
use qshop_core::stores::load_stores;
use server::{build_router, run_server};
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// QRIS storefront payment reconciliation service
#[derive(Parser, Debug)]
#[command(name = "qshop-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./qshop-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments
    let args = Args::parse();

    tracing::info!("Starting qshop-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ConfigLoader::new(&args.config, args.listen)
        .load()
        .map_err(|e| {
            tracing::error!("Failed to load configuration: {}", e);
            e
        })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let listen_addr = config.server.listen;

    // Load the persisted stores (missing files mean a fresh install)
    let (accounts, inventory, catalog) = load_stores(&config.storage.data_dir).await?;
    let accounts = Arc::new(accounts);
    let inventory = Arc::new(inventory);
    let catalog = Arc::new(catalog);
    tracing::info!(
        data_dir = %config.storage.data_dir.display(),
        "Stores loaded"
    );

    // Event channels and the shared shutdown signal
    let (delivery_tx, delivery_rx) = delivery_event_channel();
    let (alert_tx, alert_rx) = operator_alert_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Assemble the engine
    let qr_issuer = Arc::new(HttpQrIssuer::new(
        config.provider.generator_url.clone(),
        config.provider.qris_code.clone(),
        Duration::from_secs(config.provider.request_timeout_secs),
    ));
    let fulfillment =
        FulfillmentDispatcher::new(accounts.clone(), inventory.clone(), delivery_tx.clone());
    let engine = Arc::new(ReconciliationEngine::new(
        PaymentRequestRegistry::new(config.payment.open_retry_budget),
        qr_issuer,
        fulfillment,
        inventory.clone(),
        alert_tx,
        time::Duration::seconds(config.payment.expiry_secs as i64),
    ));

    let notifier: Arc<dyn ChatNotifier> = match &config.notify.relay_url {
        Some(url) => Arc::new(HttpChatNotifier::new(
            url.clone(),
            Duration::from_secs(config.provider.request_timeout_secs),
        )),
        None => {
            tracing::warn!("No chat relay configured; deliveries will only be logged");
            Arc::new(LogNotifier)
        }
    };

    // Spawn the background processors
    let sweeper = ExpirySweeper::new(
        engine.clone(),
        delivery_tx,
        Duration::from_secs(config.payment.sweep_interval_secs),
        shutdown_rx.clone(),
    );
    let worker = DeliveryWorker::new(
        notifier,
        delivery_rx,
        alert_rx,
        config.notify.operator_chat_id,
        shutdown_rx.clone(),
    );
    let flusher = SnapshotFlusher::new(
        config.storage.data_dir.clone(),
        accounts.clone(),
        inventory.clone(),
        catalog.clone(),
        Duration::from_secs(config.storage.flush_interval_secs),
        shutdown_rx,
    );
    let processor_handles = vec![
        tokio::spawn(sweeper.run()),
        tokio::spawn(worker.run()),
        tokio::spawn(flusher.run()),
    ];

    // Create application state and the router
    let app_state = AppState::new(engine, config.provider.callback_secret.as_deref());
    let router = build_router(app_state);

    // Run the server until a shutdown signal arrives
    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr).await;

    // Stop the processors; the flusher writes its final snapshot before
    // exiting.
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("All processors already stopped");
    }
    for handle in processor_handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Processor task panicked");
        }
    }

    tracing::info!("Server shutdown complete");
    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
