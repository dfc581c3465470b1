//! Job service event consumer
//!
//! Projection hop of the registration saga. Only enriched registrations
//! carry a `company_id`, so the origin's copy is skipped and the company
//! service's re-publish creates the mapping. Every write is an upsert or
//! a delete-if-exists, which makes redelivery and reordering harmless.

use std::sync::Arc;

use async_trait::async_trait;
use event_bus::{
    BusResult, CompanyChange, CompanyDeleted, CompanyRegistered, CompanyUpdated, Consumer,
    ConsumerConfig, ConsumerHandle, DeliveryContext, Event, EventBus, EventEnvelope, EventHandler,
    EventType, HandlerError, QueueBinding,
};

use crate::store::CompanyMappingStore;

pub const QUEUE: &str = "job-service.company-events";

pub struct CompanyProjectionHandler {
    store: Arc<dyn CompanyMappingStore>,
}

impl CompanyProjectionHandler {
    pub fn new(store: Arc<dyn CompanyMappingStore>) -> Self {
        Self { store }
    }

    async fn on_registered(&self, data: &CompanyRegistered) -> Result<(), HandlerError> {
        let Some(company_id) = data.company_id else {
            tracing::debug!(user_id = data.user_id, "Registration without company_id, waiting for enrichment");
            return Ok(());
        };

        self.store
            .upsert(data.user_id, company_id, &data.company_name)
            .await
            .map_err(HandlerError::transient)?;

        tracing::info!(user_id = data.user_id, company_id = company_id, "Company mapping upserted");
        Ok(())
    }

    async fn on_updated(&self, data: &CompanyUpdated) -> Result<(), HandlerError> {
        for change in &data.changes {
            match change {
                CompanyChange::Linked { .. } => {
                    let Some((company_id, company_name)) = change.linked_company() else {
                        tracing::warn!(user_id = data.user_id, "Link without a company_id, ignored");
                        continue;
                    };
                    self.store
                        .upsert(data.user_id, company_id, company_name)
                        .await
                        .map_err(HandlerError::transient)?;
                    tracing::info!(user_id = data.user_id, company_id = company_id, "Company mapping linked");
                }
                CompanyChange::Renamed { company_name } => {
                    let mapped = self
                        .store
                        .rename(data.user_id, company_name)
                        .await
                        .map_err(HandlerError::transient)?;
                    if mapped {
                        tracing::info!(user_id = data.user_id, "Company mapping renamed");
                    } else {
                        tracing::debug!(user_id = data.user_id, "No mapping for user, rename ignored");
                    }
                }
                CompanyChange::ContactChanged { .. }
                | CompanyChange::AddressChanged { .. }
                | CompanyChange::IndustriesChanged { .. }
                | CompanyChange::LogoChanged { .. } => {}
            }
        }
        Ok(())
    }

    async fn on_deleted(&self, data: &CompanyDeleted) -> Result<(), HandlerError> {
        let deleted = self
            .store
            .delete_by_user_id(data.user_id)
            .await
            .map_err(HandlerError::transient)?;
        tracing::info!(user_id = data.user_id, deleted = deleted, "Company mapping delete applied");
        Ok(())
    }
}

#[async_trait]
impl EventHandler for CompanyProjectionHandler {
    async fn handle(
        &self,
        _ctx: &DeliveryContext,
        envelope: &EventEnvelope<Event>,
    ) -> Result<(), HandlerError> {
        match &envelope.data {
            Event::CompanyRegistered(data) => self.on_registered(data).await,
            Event::CompanyUpdated(data) => self.on_updated(data).await,
            Event::CompanyDeleted(data) => self.on_deleted(data).await,
            Event::UserRegistered(_) => Ok(()),
        }
    }
}

/// Bind the job service queue to the company lifecycle events and start consuming
pub async fn start_company_projection_consumer(
    bus: Arc<dyn EventBus>,
    store: Arc<dyn CompanyMappingStore>,
    config: ConsumerConfig,
) -> BusResult<ConsumerHandle> {
    let binding = QueueBinding::for_events(QUEUE, &EventType::COMPANY_LIFECYCLE);
    Consumer::new(bus, config)
        .subscribe(binding, Arc::new(CompanyProjectionHandler::new(store)))
        .await
}
