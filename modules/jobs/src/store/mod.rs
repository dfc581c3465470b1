//! Company mapping persistence

mod memory;
mod postgres;

pub use memory::InMemoryCompanyMappingStore;
pub use postgres::PgCompanyMappingStore;

use async_trait::async_trait;

use crate::models::CompanyMapping;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CompanyMappingStore: Send + Sync {
    async fn find_by_user_id(&self, user_id: i64) -> Result<Option<CompanyMapping>, StoreError>;

    /// Insert or overwrite the mapping for `user_id`
    ///
    /// Writing the values already stored leaves the row untouched,
    /// `updated_at` included.
    async fn upsert(
        &self,
        user_id: i64,
        company_id: i64,
        company_name: &str,
    ) -> Result<CompanyMapping, StoreError>;

    /// Refresh the cached name of an existing mapping; returns whether one existed
    async fn rename(&self, user_id: i64, company_name: &str) -> Result<bool, StoreError>;

    /// Returns whether a mapping was deleted
    async fn delete_by_user_id(&self, user_id: i64) -> Result<bool, StoreError>;
}
