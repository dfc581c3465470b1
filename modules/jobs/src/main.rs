use std::sync::Arc;

use event_bus::connect_bus;
use event_bus::service::{init_tracing, ServiceConfig};

use jobs_rs::{start_company_projection_consumer, store::PgCompanyMappingStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting job service...");

    let config = ServiceConfig::from_env()?;
    let pool = config.connect_database(&sqlx::migrate!("./db/migrations")).await?;
    let bus = connect_bus(&config.broker).await?;

    // Read side only: the mapping is fed by company lifecycle events
    let store = Arc::new(PgCompanyMappingStore::new(pool.clone()));
    let consumer = start_company_projection_consumer(bus.clone(), store, config.consumer.clone()).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    consumer.close().await;
    bus.close().await?;
    pool.close().await;

    Ok(())
}
