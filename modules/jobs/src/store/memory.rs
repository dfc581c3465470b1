use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::{CompanyMappingStore, StoreError};
use crate::models::CompanyMapping;

#[derive(Default)]
struct Mappings {
    by_user: BTreeMap<i64, CompanyMapping>,
    failures_left: usize,
}

#[derive(Clone, Default)]
pub struct InMemoryCompanyMappingStore {
    inner: Arc<Mutex<Mappings>>,
}

impl InMemoryCompanyMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` operations fail with [`StoreError::Unavailable`]
    pub fn fail_next(&self, count: usize) {
        self.lock().failures_left = count;
    }

    /// Current mapping, bypassing injected failures
    pub fn get(&self, user_id: i64) -> Option<CompanyMapping> {
        self.lock().by_user.get(&user_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Mappings> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn checked(&self) -> Result<MutexGuard<'_, Mappings>, StoreError> {
        let mut guard = self.lock();
        if guard.failures_left > 0 {
            guard.failures_left -= 1;
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(guard)
    }
}

#[async_trait]
impl CompanyMappingStore for InMemoryCompanyMappingStore {
    async fn find_by_user_id(&self, user_id: i64) -> Result<Option<CompanyMapping>, StoreError> {
        Ok(self.checked()?.by_user.get(&user_id).cloned())
    }

    async fn upsert(
        &self,
        user_id: i64,
        company_id: i64,
        company_name: &str,
    ) -> Result<CompanyMapping, StoreError> {
        let mut guard = self.checked()?;
        let now = Utc::now();

        let mapping = guard
            .by_user
            .entry(user_id)
            .and_modify(|m| {
                if m.company_id != company_id || m.company_name != company_name {
                    m.company_id = company_id;
                    m.company_name = company_name.to_string();
                    m.updated_at = now;
                }
            })
            .or_insert_with(|| CompanyMapping {
                user_id,
                company_id,
                company_name: company_name.to_string(),
                created_at: now,
                updated_at: now,
            });

        Ok(mapping.clone())
    }

    async fn rename(&self, user_id: i64, company_name: &str) -> Result<bool, StoreError> {
        let mut guard = self.checked()?;
        let Some(mapping) = guard.by_user.get_mut(&user_id) else {
            return Ok(false);
        };

        if mapping.company_name != company_name {
            mapping.company_name = company_name.to_string();
            mapping.updated_at = Utc::now();
        }
        Ok(true)
    }

    async fn delete_by_user_id(&self, user_id: i64) -> Result<bool, StoreError> {
        Ok(self.checked()?.by_user.remove(&user_id).is_some())
    }
}
