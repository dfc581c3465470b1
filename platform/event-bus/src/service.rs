//! Process bootstrap shared by the service binaries
//!
//! Every job-fair service logs JSON through `tracing`, reads the same
//! environment and runs its own migrations before it touches the broker.
//! What a service then starts (consumer, outbox relay or both) stays in
//! its `main.rs`.
//!
//! | Variable                      | Default                 |
//! |-------------------------------|-------------------------|
//! | `DATABASE_URL`                | required                |
//! | `BUS_TYPE`                    | `nats`                  |
//! | `NATS_URL`                    | `nats://localhost:4222` |
//! | `BROKER_CONNECT_MAX_ATTEMPTS` | `15`                    |
//! | `BROKER_CONNECT_BASE_DELAY_MS`| `2000`                  |
//! | `CONSUMER_MAX_DELIVERIES`     | `10`                    |
//! | `OUTBOX_POLL_INTERVAL_MS`     | `500`                   |

use std::env;
use std::time::Duration;

use sqlx::migrate::{MigrateError, Migrator};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::outbox::poll_interval_from_env;
use crate::{BrokerConfig, ConsumerConfig};

const DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] MigrateError),
}

/// Install the JSON log subscriber, filtered by `RUST_LOG` (default `info`)
///
/// A second call leaves the installed subscriber in place.
pub fn init_tracing() {
    let installed = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .try_init();

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Settings every service reads at startup
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub database_url: String,
    pub broker: BrokerConfig,
    pub consumer: ConsumerConfig,
    pub outbox_poll_interval: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, BootstrapError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| BootstrapError::Config("DATABASE_URL must be set".to_string()))?;

        Ok(Self {
            database_url,
            broker: BrokerConfig::from_env().map_err(BootstrapError::Config)?,
            consumer: ConsumerConfig::from_env().map_err(BootstrapError::Config)?,
            outbox_poll_interval: poll_interval_from_env().map_err(BootstrapError::Config)?,
        })
    }

    /// Open the service's pool and apply its migrations (fail-fast)
    pub async fn connect_database(&self, migrator: &Migrator) -> Result<PgPool, BootstrapError> {
        let pool = PgPoolOptions::new()
            .max_connections(DB_MAX_CONNECTIONS)
            .connect(&self.database_url)
            .await?;
        migrator.run(&pool).await?;

        tracing::info!(migrations = migrator.iter().count(), "Database ready");
        Ok(pool)
    }
}
