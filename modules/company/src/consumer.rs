//! Company service event consumer
//!
//! Enrichment hop of the registration saga: turns the origin's
//! `company.registered` into a company row and re-announces it with the
//! assigned `company_id`. Also keeps the row in step with
//! `company.updated` and `company.deleted`.

use std::sync::Arc;

use async_trait::async_trait;
use event_bus::{
    BusResult, CompanyDeleted, CompanyRegistered, CompanyUpdated, Consumer, ConsumerConfig,
    ConsumerHandle, DeliveryContext, Event, EventBus, EventEnvelope, EventHandler, EventType,
    HandlerError, QueueBinding,
};

use crate::models::NewCompany;
use crate::slug::{disambiguate, generate_slug};
use crate::store::{CompanyStore, StoreError};

pub const QUEUE: &str = "company-service.company-events";

pub struct CompanyEventHandler {
    store: Arc<dyn CompanyStore>,
}

impl CompanyEventHandler {
    pub fn new(store: Arc<dyn CompanyStore>) -> Self {
        Self { store }
    }

    async fn on_registered(&self, data: &CompanyRegistered) -> Result<(), HandlerError> {
        if data.is_enriched() {
            tracing::debug!(user_id = data.user_id, "Enriched registration, nothing to do");
            return Ok(());
        }

        if let Some(existing) = self.store.find_by_user_id(data.user_id).await.map_err(to_handler_error)? {
            tracing::info!(
                user_id = data.user_id,
                company_id = existing.id,
                "Company already exists for user, skipping"
            );
            return Ok(());
        }

        let slug = generate_slug(&data.company_name);
        let company = NewCompany::from_registration(data, slug.clone());

        let created = match self.store.create_with_event(company.clone(), data).await {
            Err(StoreError::SlugTaken(_)) => {
                let fallback = disambiguate(&slug, data.user_id);
                tracing::info!(user_id = data.user_id, slug = %slug, fallback = %fallback, "Slug taken, retrying");
                self.store
                    .create_with_event(company.with_slug(fallback), data)
                    .await
                    .map_err(to_handler_error)?
            }
            other => other.map_err(to_handler_error)?,
        };

        match created {
            Some(company) => tracing::info!(
                user_id = data.user_id,
                company_id = company.id,
                slug = %company.slug,
                "Company created from registration"
            ),
            None => tracing::info!(user_id = data.user_id, "Company created concurrently, skipping"),
        }
        Ok(())
    }

    async fn on_updated(&self, data: &CompanyUpdated) -> Result<(), HandlerError> {
        match self
            .store
            .apply_changes(data.user_id, &data.changes)
            .await
            .map_err(to_handler_error)?
        {
            Some(company) => tracing::info!(
                user_id = data.user_id,
                company_id = company.id,
                changes = data.changes.len(),
                "Company updated"
            ),
            None => tracing::debug!(user_id = data.user_id, "No company for user, update ignored"),
        }
        Ok(())
    }

    async fn on_deleted(&self, data: &CompanyDeleted) -> Result<(), HandlerError> {
        let deleted = self
            .store
            .delete_by_user_id(data.user_id)
            .await
            .map_err(to_handler_error)?;
        tracing::info!(user_id = data.user_id, deleted = deleted, "Company delete applied");
        Ok(())
    }
}

/// A slug that still collides after disambiguation will never succeed
fn to_handler_error(err: StoreError) -> HandlerError {
    match err {
        StoreError::SlugTaken(_) => HandlerError::permanent(err),
        other => HandlerError::transient(other),
    }
}

#[async_trait]
impl EventHandler for CompanyEventHandler {
    async fn handle(
        &self,
        _ctx: &DeliveryContext,
        envelope: &EventEnvelope<Event>,
    ) -> Result<(), HandlerError> {
        match &envelope.data {
            Event::CompanyRegistered(data) => self.on_registered(data).await,
            Event::CompanyUpdated(data) => self.on_updated(data).await,
            Event::CompanyDeleted(data) => self.on_deleted(data).await,
            Event::UserRegistered(_) => {
                tracing::debug!("user.registered is not bound to this queue, ignoring");
                Ok(())
            }
        }
    }
}

/// Bind the company queue to the company lifecycle events and start consuming
pub async fn start_company_event_consumer(
    bus: Arc<dyn EventBus>,
    store: Arc<dyn CompanyStore>,
    config: ConsumerConfig,
) -> BusResult<ConsumerHandle> {
    let binding = QueueBinding::for_events(QUEUE, &EventType::COMPANY_LIFECYCLE);
    Consumer::new(bus, config)
        .subscribe(binding, Arc::new(CompanyEventHandler::new(store)))
        .await
}
