//! Candidate profile persistence

mod memory;
mod postgres;

pub use memory::InMemoryProfileStore;
pub use postgres::PgProfileStore;

use async_trait::async_trait;

use crate::models::{CandidateProfile, NewProfile};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_by_user_id(&self, user_id: i64) -> Result<Option<CandidateProfile>, StoreError>;

    /// Returns `None` when the user already has a profile
    async fn create(&self, profile: NewProfile) -> Result<Option<CandidateProfile>, StoreError>;

    /// Returns whether a profile was updated
    async fn update_photo(&self, user_id: i64, url: &str) -> Result<bool, StoreError>;
}
