//! # Job-Fair Event Bus
//!
//! Cross-service event propagation for the job-fair backend. Services never
//! call each other directly; they publish catalog events to a shared topic
//! exchange and consume them from durable, per-service queues.
//!
//! ## Topology
//!
//! - **Exchange**: the JetStream stream `JOBFAIR_EVENTS`, bound to
//!   `jobfair.events.>`. An event with routing key `company.registered` is
//!   published on subject `jobfair.events.company.registered`.
//! - **Queue**: a durable pull consumer named after the owning service
//!   (`company-service.company-events`), filtered on the routing keys it
//!   binds. Instances of the same service compete on one queue.
//! - **Dead letters**: the stream `JOBFAIR_DLQ`, bound to `jobfair.dlq.>`.
//!
//! ## Implementations
//!
//! - **NatsBus**: Production implementation using NATS JetStream
//! - **InMemoryBus**: Test/dev implementation with durable in-process queues
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{
//!     CompanyDeleted, Consumer, ConsumerConfig, Event, InMemoryBus, Publisher, QueueBinding,
//!     EventBus, EventType,
//! };
//! use std::sync::Arc;
//!
//! # async fn example(handler: Arc<dyn event_bus::EventHandler>) -> Result<(), Box<dyn std::error::Error>> {
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//!
//! let consumer = Consumer::new(bus.clone(), ConsumerConfig::default());
//! let binding = QueueBinding::for_events("job-service.company-events", &EventType::COMPANY_LIFECYCLE);
//! let handle = consumer.subscribe(binding, handler).await?;
//!
//! let publisher = Publisher::new(bus.clone());
//! publisher.publish(Event::CompanyDeleted(CompanyDeleted { user_id: 42 })).await?;
//!
//! handle.close().await;
//! # Ok(())
//! # }
//! ```

mod catalog;
mod connection;
mod consumer;
mod dlq;
mod envelope;
mod inmemory_bus;
mod nats_bus;
pub mod outbox;
mod publisher;
pub mod retry;
pub mod service;

pub use catalog::{
    decode, CompanyChange, CompanyDeleted, CompanyRegistered, CompanyUpdated, Decoded, Event,
    EventType, UserRegistered,
};
pub use connection::{connect_bus, BrokerConfig, BusType};
pub use consumer::{
    Consumer, ConsumerConfig, ConsumerHandle, DeliveryContext, EventHandler, HandlerError,
    Outcome, QueueBinding,
};
pub use dlq::DeadLetter;
pub use envelope::{EnvelopeError, EnvelopeHeader, EventEnvelope, SCHEMA_VERSION};
pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;
pub use publisher::{PublishError, Publisher};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;

/// Name of the topic exchange all catalog events are published to
pub const EXCHANGE: &str = "jobfair.events";

/// Subject prefix for dead-lettered messages
pub const DEAD_LETTER_EXCHANGE: &str = "jobfair.dlq";

/// Subject an event with the given routing key is published on
pub fn event_subject(routing_key: &str) -> String {
    format!("{EXCHANGE}.{routing_key}")
}

/// Subject a dead letter is published on. Unparseable messages go to `jobfair.dlq.unknown`.
pub fn dead_letter_subject(event_type: Option<&str>) -> String {
    format!("{DEAD_LETTER_EXCHANGE}.{}", event_type.unwrap_or("unknown"))
}

/// A message received from the event bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The subject this message was published to
    pub subject: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
    /// Transport headers, when the broker carries them
    pub headers: Option<HashMap<String, String>>,
}

impl BusMessage {
    /// Create a new bus message
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self {
            subject,
            payload,
            headers: None,
        }
    }

    /// Add headers to the message
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// How a delivery was settled with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remove the message from the queue
    Ack,
    /// Return the message to the queue for redelivery
    Requeue,
}

/// Broker-side handle used to settle a single delivery
#[async_trait]
pub trait Acknowledge: Send {
    async fn settle(&mut self, disposition: Disposition) -> BusResult<()>;
}

/// A message handed to a queue subscriber
///
/// Must be settled with [`Delivery::ack`] or [`Delivery::requeue`]. A delivery
/// dropped unsettled is returned to its queue, the same as a broker does
/// when a consumer's channel closes.
pub struct Delivery {
    pub message: BusMessage,
    /// Delivery count for this message on this queue, starting at 1
    pub attempt: u64,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(message: BusMessage, attempt: u64, acker: Box<dyn Acknowledge>) -> Self {
        Self {
            message,
            attempt,
            acker,
        }
    }

    pub async fn ack(mut self) -> BusResult<()> {
        self.acker.settle(Disposition::Ack).await
    }

    pub async fn requeue(mut self) -> BusResult<()> {
        self.acker.settle(Disposition::Requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("subject", &self.message.subject)
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to queue: {0}")]
    SubscribeError(String),

    #[error("failed to settle delivery: {0}")]
    AckError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("invalid subject pattern: {0}")]
    InvalidSubject(String),

    #[error("event bus is closed")]
    Closed,
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Broker abstraction: publish to the exchange, consume from durable queues
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message to a subject
    ///
    /// Returns once the broker client has accepted the message. No
    /// confirmation from the broker is awaited.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Declare (idempotently) a durable queue bound to `subjects` and consume from it
    ///
    /// Subjects may use NATS wildcards (`*` for one token, `>` for the rest).
    /// Deliveries are handed out one at a time: the next one is only pulled
    /// once the stream is polled again.
    async fn subscribe(
        &self,
        queue: &str,
        subjects: &[String],
    ) -> BusResult<BoxStream<'static, BusResult<Delivery>>>;

    /// Flush and release the connection. Calling it again is a no-op.
    async fn close(&self) -> BusResult<()>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subjects() {
        assert_eq!(event_subject("company.registered"), "jobfair.events.company.registered");
        assert_eq!(dead_letter_subject(Some("company.updated")), "jobfair.dlq.company.updated");
        assert_eq!(dead_letter_subject(None), "jobfair.dlq.unknown");
    }
}
