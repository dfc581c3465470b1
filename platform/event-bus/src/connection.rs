//! Broker connection manager
//!
//! Dials the broker with a bounded linear retry and declares the topology
//! before handing out a bus. Failing to connect after the last attempt is
//! fatal for the calling service.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use crate::retry::RetryConfig;
use crate::{BusResult, EventBus, InMemoryBus, NatsBus};

pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 15;
pub const DEFAULT_CONNECT_BASE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    Nats,
    InMemory,
}

impl BusType {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "nats" => BusType::Nats,
            "inmemory" => BusType::InMemory,
            other => {
                tracing::warn!(bus_type = %other, "Unknown BUS_TYPE, defaulting to nats");
                BusType::Nats
            }
        }
    }
}

/// Where and how to reach the broker
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub bus_type: BusType,
    pub url: String,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bus_type: BusType::Nats,
            url: DEFAULT_NATS_URL.to_string(),
            max_attempts: DEFAULT_CONNECT_ATTEMPTS,
            base_delay: DEFAULT_CONNECT_BASE_DELAY,
        }
    }
}

impl BrokerConfig {
    pub fn nats(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn in_memory() -> Self {
        Self {
            bus_type: BusType::InMemory,
            ..Self::default()
        }
    }

    /// Read `BUS_TYPE`, `NATS_URL`, `BROKER_CONNECT_MAX_ATTEMPTS` and
    /// `BROKER_CONNECT_BASE_DELAY_MS`
    pub fn from_env() -> Result<Self, String> {
        let bus_type = BusType::parse(&env::var("BUS_TYPE").unwrap_or_else(|_| "nats".to_string()));
        let url = env::var("NATS_URL").unwrap_or_else(|_| DEFAULT_NATS_URL.to_string());

        let max_attempts = match env::var("BROKER_CONNECT_MAX_ATTEMPTS") {
            Ok(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| format!("BROKER_CONNECT_MAX_ATTEMPTS must be a positive integer, got {raw:?}"))?,
            Err(_) => DEFAULT_CONNECT_ATTEMPTS,
        };

        let base_delay = match env::var("BROKER_CONNECT_BASE_DELAY_MS") {
            Ok(raw) => Duration::from_millis(
                raw.parse::<u64>()
                    .map_err(|_| format!("BROKER_CONNECT_BASE_DELAY_MS must be an integer, got {raw:?}"))?,
            ),
            Err(_) => DEFAULT_CONNECT_BASE_DELAY,
        };

        Ok(Self {
            bus_type,
            url,
            max_attempts,
            base_delay,
        })
    }

    /// Retry schedule for dialing: attempt `n` is followed by `n * base_delay`
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::linear(self.max_attempts, self.base_delay)
    }
}

/// Build the bus selected by `config`
pub async fn connect_bus(config: &BrokerConfig) -> BusResult<Arc<dyn EventBus>> {
    match config.bus_type {
        BusType::Nats => {
            tracing::info!(url = %config.url, "Connecting to NATS JetStream");
            Ok(Arc::new(NatsBus::connect(config).await?))
        }
        BusType::InMemory => {
            tracing::info!("Using in-memory event bus");
            Ok(Arc::new(InMemoryBus::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "BUS_TYPE",
            "NATS_URL",
            "BROKER_CONNECT_MAX_ATTEMPTS",
            "BROKER_CONNECT_BASE_DELAY_MS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = BrokerConfig::from_env().unwrap();
        assert_eq!(config.bus_type, BusType::Nats);
        assert_eq!(config.url, DEFAULT_NATS_URL);
        assert_eq!(config.max_attempts, 15);
        assert_eq!(config.base_delay, Duration::from_secs(2));
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        env::set_var("BUS_TYPE", "InMemory");
        env::set_var("BROKER_CONNECT_MAX_ATTEMPTS", "3");
        env::set_var("BROKER_CONNECT_BASE_DELAY_MS", "50");
        let config = BrokerConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.bus_type, BusType::InMemory);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_config().delay_after(2), Duration::from_millis(100));
    }

    #[test]
    #[serial]
    fn test_zero_attempts_rejected() {
        clear_env();
        env::set_var("BROKER_CONNECT_MAX_ATTEMPTS", "0");
        let result = BrokerConfig::from_env();
        clear_env();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_in_memory() {
        let bus = connect_bus(&BrokerConfig::in_memory()).await.unwrap();
        bus.publish("jobfair.events.company.deleted", b"{}".to_vec())
            .await
            .unwrap();
        bus.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_gives_up_when_broker_unreachable() {
        let config = BrokerConfig {
            bus_type: BusType::Nats,
            url: "nats://127.0.0.1:1".to_string(),
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
        };
        let err = connect_bus(&config).await.unwrap_err();
        assert!(matches!(err, crate::BusError::ConnectionError(_)));
    }
}
