//! Publishes catalog events to the exchange

use std::sync::Arc;

use serde::Serialize;

use crate::{event_subject, BusError, Event, EventBus, EventEnvelope};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to serialize envelope: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Wraps events in envelopes and publishes them under their routing key
///
/// A publish completes once the bus has accepted the message. Callers
/// that need the event to survive a crash stage it in the outbox instead
/// (see [`crate::outbox`]).
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn EventBus>,
}

impl Publisher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    /// Publish an event in a fresh envelope and return its event_id
    pub async fn publish(&self, event: Event) -> Result<String, PublishError> {
        let envelope = event.into_envelope();
        self.publish_envelope(&envelope).await?;
        Ok(envelope.event_id)
    }

    /// Publish a prebuilt envelope, routed by its `event_type`
    pub async fn publish_envelope<T: Serialize>(
        &self,
        envelope: &EventEnvelope<T>,
    ) -> Result<(), PublishError> {
        let body = serde_json::to_vec(envelope)?;
        self.publish_raw(&envelope.event_type, body).await
    }

    /// Publish an already-serialized envelope
    pub async fn publish_raw(&self, routing_key: &str, body: Vec<u8>) -> Result<(), PublishError> {
        let subject = event_subject(routing_key);
        self.bus.publish(&subject, body).await?;

        tracing::info!(subject = %subject, routing_key = %routing_key, "Published event");
        Ok(())
    }
}
