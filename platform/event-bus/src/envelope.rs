//! # Event Envelope
//!
//! Wire format shared by every service on the job-fair exchange.
//!
//! ## Envelope Fields
//!
//! - `event_id`: Unique identifier generated by the publisher (tracing, log-based dedup)
//! - `event_type`: Catalog name of the event, doubles as the routing key
//! - `timestamp`: RFC 3339 time the event was published or staged
//! - `version`: Schema version of the payload, fixed at [`SCHEMA_VERSION`]
//! - `data`: Event-specific payload (generic type parameter)
//!
//! Consumers always parse the header first ([`EnvelopeHeader`]) so that an
//! event type they do not know can still be identified, logged and dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Schema version stamped on every envelope. No negotiation is performed.
pub const SCHEMA_VERSION: &str = "1.0";

/// Standard event envelope
///
/// # Examples
///
/// ```rust
/// use event_bus::{EventEnvelope, SCHEMA_VERSION};
/// use serde_json::json;
///
/// let envelope = EventEnvelope::new("company.deleted", json!({ "user_id": 42 }));
/// assert_eq!(envelope.event_type, "company.deleted");
/// assert_eq!(envelope.version, SCHEMA_VERSION);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    /// Unique event identifier, opaque to consumers
    pub event_id: String,

    /// Catalog event type, also used as the routing key
    pub event_type: String,

    /// Publish time
    pub timestamp: DateTime<Utc>,

    /// Payload schema version
    pub version: String,

    /// Event-specific payload
    pub data: T,
}

impl<T> EventEnvelope<T> {
    /// Create a new envelope with a fresh event_id and the current timestamp
    pub fn new(event_type: impl Into<String>, data: T) -> Self {
        Self::with_event_id(Uuid::new_v4().to_string(), event_type, data)
    }

    /// Create an envelope with explicit event_id (useful for testing and replays)
    pub fn with_event_id(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        data: T,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            version: SCHEMA_VERSION.to_string(),
            data,
        }
    }

    /// Override the timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Extract the header fields, dropping the payload
    pub fn header(&self) -> EnvelopeHeader {
        EnvelopeHeader {
            event_id: self.event_id.clone(),
            event_type: self.event_type.clone(),
            timestamp: self.timestamp,
            version: self.version.clone(),
        }
    }
}

/// Envelope metadata without the payload
///
/// Parsing only the header lets a consumer recognise the event type before
/// committing to a payload schema.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnvelopeHeader {
    pub event_id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl EnvelopeHeader {
    /// Parse and validate the header of a raw message body
    ///
    /// # Validation Rules
    ///
    /// - `event_id`: Must be present; any string is accepted
    /// - `event_type`: Must be non-empty
    /// - `timestamp`: Must be RFC 3339
    /// - `version`: Must be non-empty
    pub fn parse(body: &[u8]) -> Result<Self, EnvelopeError> {
        let header: EnvelopeHeader =
            serde_json::from_slice(body).map_err(EnvelopeError::Malformed)?;

        if header.event_type.trim().is_empty() {
            return Err(EnvelopeError::Invalid("event_type cannot be empty".to_string()));
        }

        if header.version.trim().is_empty() {
            return Err(EnvelopeError::Invalid("version cannot be empty".to_string()));
        }

        Ok(header)
    }
}

/// Errors raised while decoding a message body
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(serde_json::Error),

    #[error("invalid envelope: {0}")]
    Invalid(String),

    #[error("malformed {} payload: {source}", .header.event_type)]
    Payload {
        header: EnvelopeHeader,
        source: serde_json::Error,
    },
}

impl EnvelopeError {
    /// Header of the failed message, when it could be read
    pub fn header(&self) -> Option<&EnvelopeHeader> {
        match self {
            EnvelopeError::Payload { header, .. } => Some(header),
            _ => None,
        }
    }
}
