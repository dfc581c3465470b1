use std::sync::Arc;

use event_bus::connect_bus;
use event_bus::service::{init_tracing, ServiceConfig};

use profile_rs::{start_user_event_consumer, store::PgProfileStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting profile service...");

    let config = ServiceConfig::from_env()?;
    let pool = config.connect_database(&sqlx::migrate!("./db/migrations")).await?;
    let bus = connect_bus(&config.broker).await?;

    let consumer = start_user_event_consumer(
        bus.clone(),
        Arc::new(PgProfileStore::new(pool.clone())),
        config.consumer.clone(),
    )
    .await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    // Finish the profile being written before the pool goes away
    consumer.close().await;
    bus.close().await?;
    pool.close().await;

    Ok(())
}
