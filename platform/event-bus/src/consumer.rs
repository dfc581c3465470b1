//! # Queue consumer
//!
//! Drives one durable queue: decodes each delivery against the catalog,
//! hands it to an [`EventHandler`] and settles it according to the outcome.
//!
//! ## Settlement
//!
//! | Situation                         | Action                                   |
//! |-----------------------------------|------------------------------------------|
//! | handler `Ok`                      | ack                                      |
//! | event type outside the catalog    | log, ack (dropped)                       |
//! | body is not a valid envelope      | dead-letter, ack                         |
//! | payload does not match its type   | dead-letter, ack                         |
//! | `HandlerError::Permanent`         | dead-letter, ack                         |
//! | `HandlerError::Transient`         | requeue, until `max_deliveries` reached  |
//! | dead-letter publish fails         | requeue                                  |
//!
//! Deliveries are processed one at a time; the next one is not pulled
//! until the current one is settled.

use std::env;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::dlq::DeadLetter;
use crate::{
    decode, event_subject, BusResult, Decoded, Delivery, EnvelopeHeader, Event, EventBus,
    EventEnvelope, EventType,
};

pub const DEFAULT_MAX_DELIVERIES: u64 = 10;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Deliveries allowed for a transiently failing message before it is dead-lettered
    pub max_deliveries: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_deliveries: DEFAULT_MAX_DELIVERIES,
        }
    }
}

impl ConsumerConfig {
    /// Read `CONSUMER_MAX_DELIVERIES`
    pub fn from_env() -> Result<Self, String> {
        let max_deliveries = match env::var("CONSUMER_MAX_DELIVERIES") {
            Ok(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| format!("CONSUMER_MAX_DELIVERIES must be a positive integer, got {raw:?}"))?,
            Err(_) => DEFAULT_MAX_DELIVERIES,
        };
        Ok(Self { max_deliveries })
    }
}

/// A durable queue and the routing keys bound to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub routing_keys: Vec<String>,
}

impl QueueBinding {
    pub fn new<I, K>(queue: impl Into<String>, routing_keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            queue: queue.into(),
            routing_keys: routing_keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn for_events(queue: impl Into<String>, events: &[EventType]) -> Self {
        Self::new(queue, events.iter().map(|e| e.as_str()))
    }

    fn subjects(&self) -> Vec<String> {
        self.routing_keys.iter().map(|k| event_subject(k)).collect()
    }
}

/// Where a delivery came from
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    pub queue: String,
    pub subject: String,
    /// 1 on first delivery, incremented on each redelivery
    pub attempt: u64,
}

/// Why a handler could not apply an event
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Worth retrying: the store or a dependency is unavailable
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retrying cannot help: the event conflicts with local state
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(err: impl fmt::Display) -> Self {
        HandlerError::Transient(err.to_string())
    }

    pub fn permanent(err: impl fmt::Display) -> Self {
        HandlerError::Permanent(err.to_string())
    }
}

/// Applies catalog events to a service's local state
///
/// Handlers must be idempotent: the same event may be delivered more
/// than once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &DeliveryContext,
        envelope: &EventEnvelope<Event>,
    ) -> Result<(), HandlerError>;
}

/// What happened to a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    Dropped,
    Requeued,
    DeadLettered,
}

/// Subscribes handlers to durable queues
#[derive(Clone)]
pub struct Consumer {
    bus: Arc<dyn EventBus>,
    config: ConsumerConfig,
}

impl Consumer {
    pub fn new(bus: Arc<dyn EventBus>, config: ConsumerConfig) -> Self {
        Self { bus, config }
    }

    /// Declare the queue, bind it and start consuming on a background task
    ///
    /// Returns once the queue is bound, so events published afterwards
    /// are guaranteed to reach it.
    pub async fn subscribe(
        &self,
        binding: QueueBinding,
        handler: Arc<dyn EventHandler>,
    ) -> BusResult<ConsumerHandle> {
        let mut stream = self.bus.subscribe(&binding.queue, &binding.subjects()).await?;

        for routing_key in &binding.routing_keys {
            tracing::info!(queue = %binding.queue, routing_key = %routing_key, "Queue bound");
        }

        let dispatcher = Dispatcher {
            bus: self.bus.clone(),
            config: self.config.clone(),
            queue: binding.queue.clone(),
            handler,
        };

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let queue = binding.queue.clone();

        let task = tokio::spawn(async move {
            tracing::info!(queue = %queue, "Consumer started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    next = stream.next() => match next {
                        Some(Ok(delivery)) => {
                            dispatcher.dispatch(delivery).await;
                        }
                        Some(Err(e)) => {
                            tracing::error!(queue = %queue, error = %e, "Error receiving delivery");
                        }
                        None => {
                            tracing::warn!(queue = %queue, "Delivery stream ended");
                            break;
                        }
                    },
                }
            }

            tracing::info!(queue = %queue, "Consumer stopped");
        });

        Ok(ConsumerHandle {
            queue: binding.queue,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Running consumer task. Dropping the handle stops the consumer.
pub struct ConsumerHandle {
    queue: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Stop consuming. A delivery being handled is finished and settled first.
    pub async fn close(self) {
        if self.shutdown.send(true).is_err() {
            tracing::debug!(queue = %self.queue, "Consumer task already stopped");
        }
        if let Err(e) = self.task.await {
            tracing::error!(queue = %self.queue, error = %e, "Consumer task failed");
        }
    }
}

struct Dispatcher {
    bus: Arc<dyn EventBus>,
    config: ConsumerConfig,
    queue: String,
    handler: Arc<dyn EventHandler>,
}

impl Dispatcher {
    async fn dispatch(&self, delivery: Delivery) -> Outcome {
        let envelope = match decode(&delivery.message.payload) {
            Ok(Decoded::Known(envelope)) => envelope,
            Ok(Decoded::Unknown(header)) => {
                tracing::warn!(
                    queue = %self.queue,
                    event_id = %header.event_id,
                    event_type = %header.event_type,
                    "Unknown event type, dropping"
                );
                self.ack(delivery).await;
                return Outcome::Dropped;
            }
            Err(e) => {
                tracing::warn!(
                    queue = %self.queue,
                    subject = %delivery.message.subject,
                    error = %e,
                    "Failed to decode message"
                );
                let header = e.header().cloned();
                return self.dead_letter(delivery, header.as_ref(), &e.to_string()).await;
            }
        };

        let span = tracing::info_span!(
            "process_event",
            queue = %self.queue,
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            attempt = delivery.attempt,
        );

        async {
            let ctx = DeliveryContext {
                queue: self.queue.clone(),
                subject: delivery.message.subject.clone(),
                attempt: delivery.attempt,
            };

            match self.handler.handle(&ctx, &envelope).await {
                Ok(()) => {
                    tracing::debug!("Event handled");
                    self.ack(delivery).await;
                    Outcome::Handled
                }
                Err(HandlerError::Permanent(reason)) => {
                    tracing::warn!(reason = %reason, "Permanent handler failure");
                    let header = envelope.header();
                    self.dead_letter(delivery, Some(&header), &reason).await
                }
                Err(HandlerError::Transient(reason)) if delivery.attempt >= self.config.max_deliveries => {
                    tracing::warn!(
                        reason = %reason,
                        max_deliveries = self.config.max_deliveries,
                        "Redelivery limit reached"
                    );
                    let header = envelope.header();
                    self.dead_letter(delivery, Some(&header), &reason).await
                }
                Err(HandlerError::Transient(reason)) => {
                    tracing::warn!(reason = %reason, "Transient handler failure, requeueing");
                    self.requeue(delivery).await;
                    Outcome::Requeued
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn dead_letter(
        &self,
        delivery: Delivery,
        header: Option<&EnvelopeHeader>,
        error: &str,
    ) -> Outcome {
        let letter = DeadLetter::new(&self.queue, &delivery.message, header, delivery.attempt, error);

        match letter.publish(self.bus.as_ref()).await {
            Ok(()) => {
                self.ack(delivery).await;
                Outcome::DeadLettered
            }
            Err(e) => {
                tracing::error!(
                    queue = %self.queue,
                    error = %e,
                    "Failed to publish dead letter, requeueing"
                );
                self.requeue(delivery).await;
                Outcome::Requeued
            }
        }
    }

    async fn ack(&self, delivery: Delivery) {
        if let Err(e) = delivery.ack().await {
            tracing::error!(queue = %self.queue, error = %e, "Failed to ack delivery");
        }
    }

    async fn requeue(&self, delivery: Delivery) {
        if let Err(e) = delivery.requeue().await {
            tracing::error!(queue = %self.queue, error = %e, "Failed to requeue delivery");
        }
    }
}
