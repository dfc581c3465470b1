use std::sync::Arc;

use event_bus::outbox::{OutboxRelay, PgOutbox};
use event_bus::service::{init_tracing, ServiceConfig};
use event_bus::{connect_bus, Publisher};
use tokio::sync::watch;

use company_rs::{start_company_event_consumer, store::PgCompanyStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting company service...");

    let config = ServiceConfig::from_env()?;
    let pool = config.connect_database(&sqlx::migrate!("./db/migrations")).await?;

    // Broker (fail-fast after the retry budget)
    let bus = connect_bus(&config.broker).await?;

    let store = Arc::new(PgCompanyStore::new(pool.clone()));
    let consumer = start_company_event_consumer(bus.clone(), store, config.consumer.clone()).await?;

    // Enrichment and lifecycle events are staged with the row change and published here
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay = OutboxRelay::new(Arc::new(PgOutbox::new(pool.clone())), Publisher::new(bus.clone()))
        .with_poll_interval(config.outbox_poll_interval);
    let relay_task = tokio::spawn(relay.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    consumer.close().await;
    if shutdown_tx.send(true).is_err() {
        tracing::debug!("Outbox relay already stopped");
    }
    relay_task.await?;
    bus.close().await?;
    pool.close().await;

    Ok(())
}
