//! # Event Catalog
//!
//! Closed set of events exchanged between job-fair services and the typed
//! payload of each one. The catalog name of an event is both its
//! `event_type` and the routing key it is published under.
//!
//! | Event                | Publisher                      | Consumers          |
//! |----------------------|--------------------------------|--------------------|
//! | `company.registered` | identity (origin), company     | company, jobs      |
//! | `company.updated`    | company                        | company, jobs      |
//! | `company.deleted`    | company                        | company, jobs      |
//! | `user.registered`    | identity                       | profile            |
//!
//! A `company_id` of `0` (or any non-positive value) on the wire means
//! "not yet assigned" and decodes to `None`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::envelope::{EnvelopeError, EnvelopeHeader, EventEnvelope};

/// Catalog of known event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    CompanyRegistered,
    CompanyUpdated,
    CompanyDeleted,
    UserRegistered,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::CompanyRegistered,
        EventType::CompanyUpdated,
        EventType::CompanyDeleted,
        EventType::UserRegistered,
    ];

    /// The company lifecycle events, in the order they occur
    pub const COMPANY_LIFECYCLE: [EventType; 3] = [
        EventType::CompanyRegistered,
        EventType::CompanyUpdated,
        EventType::CompanyDeleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::CompanyRegistered => "company.registered",
            EventType::CompanyUpdated => "company.updated",
            EventType::CompanyDeleted => "company.deleted",
            EventType::UserRegistered => "user.registered",
        }
    }

    /// Look up a catalog name. Returns `None` for event types outside the catalog.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn zero_as_none<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.filter(|id| *id > 0))
}

/// Payload of `company.registered`
///
/// Published twice per registration: once by identity without a
/// `company_id`, then again by the company service once the company row
/// exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyRegistered {
    pub user_id: i64,
    #[serde(
        default,
        deserialize_with = "zero_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub company_id: Option<i64>,
    pub company_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub industry: Vec<String>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub logo_url: String,
    #[serde(default)]
    pub country_code: String,
    #[serde(default)]
    pub contact_name: String,
}

impl CompanyRegistered {
    /// True once the company service has assigned an id
    pub fn is_enriched(&self) -> bool {
        self.company_id.is_some()
    }

    /// Copy of this registration carrying the assigned company id
    pub fn enriched(&self, company_id: i64) -> Self {
        Self {
            company_id: Some(company_id),
            ..self.clone()
        }
    }
}

/// One field-group change carried by `company.updated`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompanyChange {
    Renamed {
        company_name: String,
    },
    ContactChanged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        email: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phone: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        website: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        contact_name: Option<String>,
    },
    AddressChanged {
        address: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        country_code: Option<String>,
    },
    IndustriesChanged {
        industry: Vec<String>,
    },
    LogoChanged {
        logo_url: String,
    },
    /// Association of the user with a company id, used to repair projections
    Linked {
        company_id: i64,
        company_name: String,
    },
}

impl CompanyChange {
    /// Company id and name of a `linked` change that carries an assigned id
    ///
    /// A `linked` change with a non-positive `company_id` links nothing and
    /// yields `None`, as do all other change kinds.
    pub fn linked_company(&self) -> Option<(i64, &str)> {
        match self {
            CompanyChange::Linked { company_id, company_name } if *company_id > 0 => {
                Some((*company_id, company_name.as_str()))
            }
            _ => None,
        }
    }
}

/// Payload of `company.updated`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyUpdated {
    pub user_id: i64,
    #[serde(default)]
    pub changes: Vec<CompanyChange>,
}

impl CompanyUpdated {
    /// Name carried by a `renamed` or valid `linked` change, last one wins
    pub fn new_name(&self) -> Option<&str> {
        self.changes.iter().rev().find_map(|change| match change {
            CompanyChange::Renamed { company_name } => Some(company_name.as_str()),
            other => other.linked_company().map(|(_, name)| name),
        })
    }
}

/// Payload of `company.deleted`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyDeleted {
    pub user_id: i64,
}

/// Payload of `user.registered`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRegistered {
    pub user_id: i64,
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_photo_url: Option<String>,
}

/// A catalog event with its typed payload
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CompanyRegistered(CompanyRegistered),
    CompanyUpdated(CompanyUpdated),
    CompanyDeleted(CompanyDeleted),
    UserRegistered(UserRegistered),
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::CompanyRegistered(_) => EventType::CompanyRegistered,
            Event::CompanyUpdated(_) => EventType::CompanyUpdated,
            Event::CompanyDeleted(_) => EventType::CompanyDeleted,
            Event::UserRegistered(_) => EventType::UserRegistered,
        }
    }

    /// The user the event is about. Every catalog payload carries one.
    pub fn user_id(&self) -> i64 {
        match self {
            Event::CompanyRegistered(e) => e.user_id,
            Event::CompanyUpdated(e) => e.user_id,
            Event::CompanyDeleted(e) => e.user_id,
            Event::UserRegistered(e) => e.user_id,
        }
    }

    /// Decode the payload of a known event type
    pub fn from_data(event_type: EventType, data: Value) -> serde_json::Result<Self> {
        Ok(match event_type {
            EventType::CompanyRegistered => Event::CompanyRegistered(serde_json::from_value(data)?),
            EventType::CompanyUpdated => Event::CompanyUpdated(serde_json::from_value(data)?),
            EventType::CompanyDeleted => Event::CompanyDeleted(serde_json::from_value(data)?),
            EventType::UserRegistered => Event::UserRegistered(serde_json::from_value(data)?),
        })
    }

    /// Wrap the event in a fresh envelope
    pub fn into_envelope(self) -> EventEnvelope<Event> {
        EventEnvelope::new(self.event_type().as_str(), self)
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Event::CompanyRegistered(e) => e.serialize(serializer),
            Event::CompanyUpdated(e) => e.serialize(serializer),
            Event::CompanyDeleted(e) => e.serialize(serializer),
            Event::UserRegistered(e) => e.serialize(serializer),
        }
    }
}

impl From<CompanyRegistered> for Event {
    fn from(e: CompanyRegistered) -> Self {
        Event::CompanyRegistered(e)
    }
}

impl From<CompanyUpdated> for Event {
    fn from(e: CompanyUpdated) -> Self {
        Event::CompanyUpdated(e)
    }
}

impl From<CompanyDeleted> for Event {
    fn from(e: CompanyDeleted) -> Self {
        Event::CompanyDeleted(e)
    }
}

impl From<UserRegistered> for Event {
    fn from(e: UserRegistered) -> Self {
        Event::UserRegistered(e)
    }
}

/// Result of decoding a message body against the catalog
#[derive(Debug, Clone)]
pub enum Decoded {
    Known(EventEnvelope<Event>),
    /// Valid envelope whose event type is outside the catalog
    Unknown(EnvelopeHeader),
}

#[derive(Deserialize)]
struct DataOnly {
    #[serde(default)]
    data: Value,
}

/// Decode a raw message body into a typed envelope
///
/// The header is validated first; an unrecognised `event_type` yields
/// [`Decoded::Unknown`] without looking at the payload.
pub fn decode(body: &[u8]) -> Result<Decoded, EnvelopeError> {
    let header = EnvelopeHeader::parse(body)?;

    let Some(event_type) = EventType::parse(&header.event_type) else {
        return Ok(Decoded::Unknown(header));
    };

    let data = match serde_json::from_slice::<DataOnly>(body) {
        Ok(raw) => raw.data,
        Err(source) => return Err(EnvelopeError::Payload { header, source }),
    };

    match Event::from_data(event_type, data) {
        Ok(event) => Ok(Decoded::Known(EventEnvelope {
            event_id: header.event_id,
            event_type: header.event_type,
            timestamp: header.timestamp,
            version: header.version,
            data: event,
        })),
        Err(source) => Err(EnvelopeError::Payload { header, source }),
    }
}
