use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use event_bus::outbox::{InMemoryOutbox, OutboxRecord};
use event_bus::{CompanyChange, CompanyRegistered, Event};

use super::{CompanyStore, StoreError};
use crate::models::{Company, NewCompany};

#[derive(Default)]
struct Companies {
    by_user: BTreeMap<i64, Company>,
    next_id: i64,
    failures_left: usize,
}

/// Company store kept in memory, staging events into an [`InMemoryOutbox`]
#[derive(Clone)]
pub struct InMemoryCompanyStore {
    inner: Arc<Mutex<Companies>>,
    outbox: InMemoryOutbox,
}

impl Default for InMemoryCompanyStore {
    fn default() -> Self {
        Self::new(InMemoryOutbox::new())
    }
}

impl InMemoryCompanyStore {
    pub fn new(outbox: InMemoryOutbox) -> Self {
        Self::starting_at(1, outbox)
    }

    /// Ids are assigned sequentially from `first_id`
    pub fn starting_at(first_id: i64, outbox: InMemoryOutbox) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Companies {
                next_id: first_id,
                ..Default::default()
            })),
            outbox,
        }
    }

    pub fn outbox(&self) -> &InMemoryOutbox {
        &self.outbox
    }

    /// Make the next `count` operations fail with [`StoreError::Unavailable`]
    pub fn fail_next(&self, count: usize) {
        self.lock().failures_left = count;
    }

    pub fn len(&self) -> usize {
        self.lock().by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Companies> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn checked(&self) -> Result<MutexGuard<'_, Companies>, StoreError> {
        let mut guard = self.lock();
        if guard.failures_left > 0 {
            guard.failures_left -= 1;
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(guard)
    }
}

#[async_trait]
impl CompanyStore for InMemoryCompanyStore {
    async fn find_by_user_id(&self, user_id: i64) -> Result<Option<Company>, StoreError> {
        Ok(self.checked()?.by_user.get(&user_id).cloned())
    }

    async fn create_with_event(
        &self,
        company: NewCompany,
        registration: &CompanyRegistered,
    ) -> Result<Option<Company>, StoreError> {
        let mut guard = self.checked()?;

        if guard.by_user.contains_key(&company.user_id) {
            return Ok(None);
        }
        if guard.by_user.values().any(|c| c.slug == company.slug) {
            return Err(StoreError::SlugTaken(company.slug));
        }

        let now = Utc::now();
        let created = Company {
            id: guard.next_id,
            user_id: company.user_id,
            name: company.name,
            slug: company.slug,
            email: company.email,
            phone: company.phone,
            website: company.website,
            industry: company.industry,
            address: company.address,
            logo_url: company.logo_url,
            country_code: company.country_code,
            contact_name: company.contact_name,
            company_size: company.company_size,
            is_verified: false,
            created_at: now,
            updated_at: now,
        };

        let record = OutboxRecord::from_event(Event::CompanyRegistered(
            registration.enriched(created.id),
        ))?;

        guard.next_id += 1;
        guard.by_user.insert(created.user_id, created.clone());
        self.outbox.enqueue(record);

        Ok(Some(created))
    }

    async fn apply_changes(
        &self,
        user_id: i64,
        changes: &[CompanyChange],
    ) -> Result<Option<Company>, StoreError> {
        let mut guard = self.checked()?;
        let Some(company) = guard.by_user.get_mut(&user_id) else {
            return Ok(None);
        };

        for change in changes {
            company.apply(change);
        }
        company.updated_at = Utc::now();
        Ok(Some(company.clone()))
    }

    async fn delete_by_user_id(&self, user_id: i64) -> Result<bool, StoreError> {
        Ok(self.checked()?.by_user.remove(&user_id).is_some())
    }
}
