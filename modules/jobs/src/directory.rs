//! Resolves which company a user acts for
//!
//! Job posting handlers call this before creating or editing a posting.
//! The answer comes from the local projection, so it lags the company
//! service until the enriched registration has been applied.

use std::sync::Arc;

use crate::models::CompanyMapping;
use crate::store::{CompanyMappingStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("company profile not found")]
    NoCompany,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct CompanyDirectory {
    store: Arc<dyn CompanyMappingStore>,
}

impl CompanyDirectory {
    pub fn new(store: Arc<dyn CompanyMappingStore>) -> Self {
        Self { store }
    }

    pub async fn company_for_user(&self, user_id: i64) -> Result<Option<i64>, StoreError> {
        Ok(self
            .store
            .find_by_user_id(user_id)
            .await?
            .map(|m| m.company_id))
    }

    /// Like [`Self::company_for_user`], but a missing mapping is an error
    pub async fn require_company(&self, user_id: i64) -> Result<CompanyMapping, DirectoryError> {
        self.store
            .find_by_user_id(user_id)
            .await?
            .ok_or(DirectoryError::NoCompany)
    }
}
