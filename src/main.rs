mod metrics;
mod payments;
mod server;
mod settings;
mod stripe;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::payments::{
    PaymentQueries, RedbPaymentStore, ReconciliationEngine, StatusNotifier,
};
use crate::server::AppState;
use crate::stripe::StripeProvider;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = settings::Config::load();
    if let Err(e) = cfg.validate() {
        tracing::error!(error = %e, "Invalid configuration; exiting");
        return Err(e.into());
    }
    tracing::info!(
        port = cfg.server_port,
        database = %cfg.database_path,
        gateway_timeout = ?cfg.gateway_timeout,
        "Starting payment reconciliation service"
    );

    let store = Arc::new(
        RedbPaymentStore::open(&cfg.database_path)
            .with_context(|| format!("opening payment store at {}", cfg.database_path))?,
    );
    let gateway = Arc::new(StripeProvider::new(cfg.stripe.clone())?);

    let notifier = Arc::new(StatusNotifier::new());
    let mut updates = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => tracing::info!(
                    payment_id = %update.payment_id,
                    payment_intent_id = %update.payment_intent_id,
                    from = %update.from,
                    status = %update.status,
                    origin = ?update.origin,
                    "Payment status changed"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Status listener lagged behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let engine = ReconciliationEngine::new(gateway, store.clone())
        .with_gateway_timeout(cfg.gateway_timeout)
        .with_notifier(notifier);

    let state = AppState {
        engine: Arc::new(engine),
        queries: PaymentQueries::new(store),
    };

    server::run_http_server(cfg.server_port, state).await
}
