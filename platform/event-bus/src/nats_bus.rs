//! NATS JetStream implementation of the EventBus trait

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, DeliverPolicy},
    stream::{Config as StreamConfig, StorageType},
    AckKind,
};
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};

use crate::connection::BrokerConfig;
use crate::retry::retry_with_backoff;
use crate::{
    Acknowledge, BusError, BusMessage, BusResult, Delivery, Disposition, EventBus,
    DEAD_LETTER_EXCHANGE, EXCHANGE,
};

pub const EVENTS_STREAM: &str = "JOBFAIR_EVENTS";
pub const DLQ_STREAM: &str = "JOBFAIR_DLQ";

const EVENTS_MAX_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 14);
const DLQ_MAX_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 30);
const ACK_WAIT: Duration = Duration::from_secs(30);

/// EventBus implementation using NATS JetStream
///
/// The exchange and the dead-letter exchange are file-backed streams;
/// queues are durable pull consumers with explicit acks and at most one
/// unacknowledged delivery at a time.
///
/// # Example
/// ```rust,no_run
/// use event_bus::{BrokerConfig, EventBus, NatsBus};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = NatsBus::connect(&BrokerConfig::nats("nats://localhost:4222")).await?;
/// bus.publish("jobfair.events.company.deleted", br#"{"user_id":42}"#.to_vec()).await?;
/// bus.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
    jetstream: jetstream::Context,
    closed: Arc<AtomicBool>,
}

impl NatsBus {
    /// Wrap an already-connected client. The topology is not declared.
    pub fn new(client: Client) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self {
            client,
            jetstream,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Dial the broker with linear backoff, then declare the topology
    ///
    /// Gives up after `config.max_attempts` attempts.
    pub async fn connect(config: &BrokerConfig) -> BusResult<Self> {
        let retry = config.retry_config();
        retry_with_backoff(|| Self::connect_once(&config.url), &retry, "broker_connect")
            .await
            .map_err(|e| {
                BusError::ConnectionError(format!(
                    "failed to connect to {} after {} attempts: {}",
                    config.url, config.max_attempts, e
                ))
            })
    }

    async fn connect_once(url: &str) -> BusResult<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;

        let bus = Self::new(client);
        bus.declare_topology().await?;

        tracing::info!(url = %url, "Connected to NATS JetStream");
        Ok(bus)
    }

    /// Create the event and dead-letter streams if they do not exist yet
    pub async fn declare_topology(&self) -> BusResult<()> {
        self.ensure_stream(EVENTS_STREAM, EXCHANGE, EVENTS_MAX_AGE).await?;
        self.ensure_stream(DLQ_STREAM, DEAD_LETTER_EXCHANGE, DLQ_MAX_AGE).await
    }

    async fn ensure_stream(&self, name: &str, prefix: &str, max_age: Duration) -> BusResult<()> {
        if self.jetstream.get_stream(name).await.is_ok() {
            return Ok(());
        }

        let config = StreamConfig {
            name: name.to_string(),
            subjects: vec![format!("{prefix}.>")],
            storage: StorageType::File,
            max_age,
            ..Default::default()
        };

        self.jetstream
            .get_or_create_stream(config)
            .await
            .map_err(|e| BusError::ConnectionError(format!("failed to declare stream {name}: {e}")))?;

        tracing::info!(stream = %name, subjects = %format!("{prefix}.>"), "Declared stream");
        Ok(())
    }

    /// Get a reference to the underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn ensure_open(&self) -> BusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        Ok(())
    }
}

fn stream_for(subjects: &[String]) -> BusResult<&'static str> {
    let events_prefix = format!("{EXCHANGE}.");
    let dlq_prefix = format!("{DEAD_LETTER_EXCHANGE}.");

    if subjects.iter().all(|s| s.starts_with(&events_prefix)) {
        Ok(EVENTS_STREAM)
    } else if subjects.iter().all(|s| s.starts_with(&dlq_prefix)) {
        Ok(DLQ_STREAM)
    } else {
        Err(BusError::InvalidSubject(format!(
            "subjects must all live under {EXCHANGE} or {DEAD_LETTER_EXCHANGE}: {subjects:?}"
        )))
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        self.ensure_open()?;

        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", "application/json");

        // The returned ack future is dropped: the publish is complete once
        // the client has accepted the message.
        self.jetstream
            .publish_with_headers(subject.to_string(), headers, payload.into())
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        subjects: &[String],
    ) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
        self.ensure_open()?;

        if subjects.is_empty() {
            return Err(BusError::InvalidSubject(format!("queue {queue} has no bindings")));
        }

        let stream_name = stream_for(subjects)?;
        let stream = self
            .jetstream
            .get_stream(stream_name)
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let consumer: jetstream::consumer::PullConsumer = stream
            .get_or_create_consumer(
                queue,
                pull::Config {
                    durable_name: Some(queue.to_string()),
                    filter_subjects: subjects.to_vec(),
                    ack_policy: AckPolicy::Explicit,
                    deliver_policy: DeliverPolicy::All,
                    ack_wait: ACK_WAIT,
                    max_ack_pending: 1,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::SubscribeError(format!("queue {queue}: {e}")))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::SubscribeError(format!("queue {queue}: {e}")))?;

        tracing::info!(queue = %queue, stream = %stream_name, "Consuming from durable queue");

        let deliveries = messages.map(|result| match result {
            Ok(message) => Ok(into_delivery(message)),
            Err(e) => Err(BusError::SubscribeError(e.to_string())),
        });

        Ok(deliveries.boxed())
    }

    async fn close(&self) -> BusResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.client
            .flush()
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;

        tracing::info!("NATS connection flushed; bus closed to new work");
        Ok(())
    }
}

fn into_delivery(message: jetstream::Message) -> Delivery {
    let mut bus_message = BusMessage::new(message.subject.to_string(), message.payload.to_vec());

    if let Some(nats_headers) = &message.headers {
        let mut headers = HashMap::new();
        for (key, values) in nats_headers.iter() {
            if let Some(value) = values.first() {
                headers.insert(key.to_string(), value.to_string());
            }
        }
        if !headers.is_empty() {
            bus_message = bus_message.with_headers(headers);
        }
    }

    let attempt = message
        .info()
        .map(|info| info.delivered.max(1) as u64)
        .unwrap_or(1);

    Delivery::new(
        bus_message,
        attempt,
        Box::new(NatsAcker {
            message: Some(message),
        }),
    )
}

struct NatsAcker {
    message: Option<jetstream::Message>,
}

#[async_trait]
impl Acknowledge for NatsAcker {
    async fn settle(&mut self, disposition: Disposition) -> BusResult<()> {
        let Some(message) = self.message.take() else {
            return Ok(());
        };

        let result = match disposition {
            Disposition::Ack => message.ack().await,
            Disposition::Requeue => message.ack_with(AckKind::Nak(None)).await,
        };

        result.map_err(|e| BusError::AckError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_for_subjects() {
        let events = vec!["jobfair.events.company.registered".to_string()];
        assert_eq!(stream_for(&events).unwrap(), EVENTS_STREAM);

        let dlq = vec!["jobfair.dlq.>".to_string()];
        assert_eq!(stream_for(&dlq).unwrap(), DLQ_STREAM);

        let mixed = vec![
            "jobfair.events.company.registered".to_string(),
            "jobfair.dlq.>".to_string(),
        ];
        assert!(stream_for(&mixed).is_err());
    }

    // These tests require a running NATS server with JetStream enabled
    // For manual testing: docker run -p 4222:4222 nats:2.10-alpine -js

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn test_nats_durable_queue_redelivers_after_requeue() {
        let bus = NatsBus::connect(&BrokerConfig::nats("nats://localhost:4222"))
            .await
            .expect("NATS server must be running on localhost:4222");

        let queue = format!("test-{}", uuid::Uuid::new_v4());
        let subject = format!("jobfair.events.test.{}", uuid::Uuid::new_v4().simple());
        let mut stream = bus.subscribe(&queue, &[subject.clone()]).await.unwrap();

        bus.publish(&subject, b"{}".to_vec()).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended")
            .unwrap();
        assert_eq!(first.attempt, 1);
        first.requeue().await.unwrap();

        let second = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("timeout waiting for redelivery")
            .expect("stream ended")
            .unwrap();
        assert_eq!(second.attempt, 2);
        second.ack().await.unwrap();

        bus.close().await.unwrap();
        bus.close().await.unwrap();
    }
}
