//! Registration persistence
//!
//! Saving a profile and staging its event happen in one transaction: a
//! registration is never announced without its row, nor stored silently.

mod memory;
mod postgres;

pub use memory::InMemoryRegistrationStore;
pub use postgres::PgRegistrationStore;

use async_trait::async_trait;
use event_bus::outbox::{OutboxError, OutboxRecord};

use crate::models::{CompanyBasicProfile, JobseekerProfile};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Upsert the company basic profile and stage `event`
    async fn save_company_profile(
        &self,
        profile: &CompanyBasicProfile,
        event: &OutboxRecord,
    ) -> Result<(), StoreError>;

    /// Upsert the job seeker profile and stage `event`
    async fn save_jobseeker_profile(
        &self,
        profile: &JobseekerProfile,
        event: &OutboxRecord,
    ) -> Result<(), StoreError>;
}
