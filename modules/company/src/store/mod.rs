//! Company persistence
//!
//! The consumer talks to storage only through [`CompanyStore`]. Creating a
//! company also stages the enriched `company.registered` in the outbox, in
//! the same transaction, so the row and its announcement commit together.

mod memory;
mod postgres;

pub use memory::InMemoryCompanyStore;
pub use postgres::PgCompanyStore;

use async_trait::async_trait;
use event_bus::outbox::OutboxError;
use event_bus::{CompanyChange, CompanyRegistered};

use crate::models::{Company, NewCompany};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("slug already taken: {0}")]
    SlugTaken(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CompanyStore: Send + Sync {
    async fn find_by_user_id(&self, user_id: i64) -> Result<Option<Company>, StoreError>;

    /// Insert the company and stage `registration` enriched with the new id
    ///
    /// Returns `None` when the user already has a company; nothing is
    /// written or staged in that case.
    async fn create_with_event(
        &self,
        company: NewCompany,
        registration: &CompanyRegistered,
    ) -> Result<Option<Company>, StoreError>;

    /// Apply `changes` in order to the user's company, if any
    async fn apply_changes(
        &self,
        user_id: i64,
        changes: &[CompanyChange],
    ) -> Result<Option<Company>, StoreError>;

    /// Returns whether a company was deleted
    async fn delete_by_user_id(&self, user_id: i64) -> Result<bool, StoreError>;
}
