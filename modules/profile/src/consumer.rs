//! Profile service event consumer
//!
//! Creates a candidate profile for every registered job seeker. A repeated
//! `user.registered` for a known user only refreshes the profile photo.

use std::sync::Arc;

use async_trait::async_trait;
use event_bus::{
    BusResult, Consumer, ConsumerConfig, ConsumerHandle, DeliveryContext, Event, EventBus,
    EventEnvelope, EventHandler, EventType, HandlerError, QueueBinding, UserRegistered,
};

use crate::models::NewProfile;
use crate::store::ProfileStore;

pub const QUEUE: &str = "profile-service.user-events";

pub struct UserRegisteredHandler {
    store: Arc<dyn ProfileStore>,
}

impl UserRegisteredHandler {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }

    async fn on_user_registered(&self, data: &UserRegistered) -> Result<(), HandlerError> {
        let existing = self
            .store
            .find_by_user_id(data.user_id)
            .await
            .map_err(HandlerError::transient)?;

        let Some(profile) = existing else {
            let created = self
                .store
                .create(NewProfile::from(data))
                .await
                .map_err(HandlerError::transient)?;
            match created {
                Some(profile) => {
                    tracing::info!(user_id = data.user_id, profile_id = profile.id, "Candidate profile created")
                }
                None => tracing::debug!(user_id = data.user_id, "Profile created concurrently, skipping"),
            }
            return Ok(());
        };

        let photo = data.profile_photo_url.as_deref().filter(|url| !url.is_empty());
        match photo {
            Some(url) if profile.profile_picture_url.as_deref() != Some(url) => {
                self.store
                    .update_photo(data.user_id, url)
                    .await
                    .map_err(HandlerError::transient)?;
                tracing::info!(user_id = data.user_id, "Profile photo refreshed");
            }
            _ => tracing::debug!(user_id = data.user_id, "Profile already up to date"),
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for UserRegisteredHandler {
    async fn handle(
        &self,
        _ctx: &DeliveryContext,
        envelope: &EventEnvelope<Event>,
    ) -> Result<(), HandlerError> {
        match &envelope.data {
            Event::UserRegistered(data) => self.on_user_registered(data).await,
            _ => Ok(()),
        }
    }
}

/// Bind the profile service queue to `user.registered` and start consuming
pub async fn start_user_event_consumer(
    bus: Arc<dyn EventBus>,
    store: Arc<dyn ProfileStore>,
    config: ConsumerConfig,
) -> BusResult<ConsumerHandle> {
    let binding = QueueBinding::for_events(QUEUE, &[EventType::UserRegistered]);
    Consumer::new(bus, config)
        .subscribe(binding, Arc::new(UserRegisteredHandler::new(store)))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryProfileStore;

    fn ctx() -> DeliveryContext {
        DeliveryContext {
            queue: QUEUE.to_string(),
            subject: "jobfair.events.user.registered".to_string(),
            attempt: 1,
        }
    }

    fn registered(photo: Option<&str>) -> EventEnvelope<Event> {
        Event::UserRegistered(UserRegistered {
            user_id: 5,
            full_name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            phone_number: "+44 20 0000".to_string(),
            profile_photo_url: photo.map(str::to_string),
        })
        .into_envelope()
    }

    #[tokio::test]
    async fn test_empty_photo_does_not_clear_existing() {
        let store = InMemoryProfileStore::new();
        let handler = UserRegisteredHandler::new(Arc::new(store.clone()));

        handler.handle(&ctx(), &registered(Some("https://cdn/a.png"))).await.unwrap();
        handler.handle(&ctx(), &registered(Some(""))).await.unwrap();

        let profile = store.get(5).unwrap();
        assert_eq!(profile.profile_picture_url.as_deref(), Some("https://cdn/a.png"));
    }

    #[tokio::test]
    async fn test_store_failure_is_transient() {
        let store = InMemoryProfileStore::new();
        store.fail_next(1);
        let handler = UserRegisteredHandler::new(Arc::new(store));

        let err = handler.handle(&ctx(), &registered(None)).await.unwrap_err();
        assert!(matches!(err, HandlerError::Transient(_)));
    }
}
