//! Dead Letter Queue (DLQ) handling
//!
//! Messages a consumer gives up on are wrapped in a [`DeadLetter`] and
//! published under `jobfair.dlq.<event_type>` so they can be inspected and
//! replayed. Unparseable messages land on `jobfair.dlq.unknown`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{dead_letter_subject, BusMessage, BusResult, EnvelopeHeader, EventBus};

/// A failed message together with why and where it failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Queue the message was consumed from
    pub queue: String,
    /// Subject the message was originally published on
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Deliveries made before giving up
    pub attempts: u64,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    /// Original body: JSON when it parsed, otherwise the lossy UTF-8 text
    pub body: serde_json::Value,
}

impl DeadLetter {
    pub fn new(
        queue: &str,
        message: &BusMessage,
        header: Option<&EnvelopeHeader>,
        attempts: u64,
        error: impl Into<String>,
    ) -> Self {
        let body = serde_json::from_slice(&message.payload).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&message.payload).into_owned())
        });

        Self {
            queue: queue.to_string(),
            subject: message.subject.clone(),
            event_id: header.map(|h| h.event_id.clone()),
            event_type: header.map(|h| h.event_type.clone()),
            attempts,
            error: error.into(),
            failed_at: Utc::now(),
            body,
        }
    }

    pub fn subject(&self) -> String {
        dead_letter_subject(self.event_type.as_deref())
    }

    /// Publish to the dead-letter exchange
    pub async fn publish(&self, bus: &dyn EventBus) -> BusResult<()> {
        let payload = serde_json::to_vec(self)
            .map_err(|e| crate::BusError::PublishError(format!("dead letter serialization: {e}")))?;

        bus.publish(&self.subject(), payload).await?;

        tracing::error!(
            queue = %self.queue,
            subject = %self.subject,
            event_id = ?self.event_id.as_deref(),
            event_type = self.event_type.as_deref().unwrap_or("unknown"),
            attempts = self.attempts,
            error = %self.error,
            "Message dead-lettered"
        );
        Ok(())
    }
}
