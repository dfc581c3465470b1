use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use event_bus::outbox::{InMemoryOutbox, OutboxRecord};

use super::{RegistrationStore, StoreError};
use crate::models::{CompanyBasicProfile, JobseekerProfile};

#[derive(Default)]
struct Profiles {
    companies: BTreeMap<i64, CompanyBasicProfile>,
    jobseekers: BTreeMap<i64, JobseekerProfile>,
    failures_left: usize,
}

/// Registration store kept in memory, staging events into an [`InMemoryOutbox`]
#[derive(Clone, Default)]
pub struct InMemoryRegistrationStore {
    inner: Arc<Mutex<Profiles>>,
    outbox: InMemoryOutbox,
}

impl InMemoryRegistrationStore {
    pub fn new(outbox: InMemoryOutbox) -> Self {
        Self {
            inner: Arc::default(),
            outbox,
        }
    }

    pub fn outbox(&self) -> &InMemoryOutbox {
        &self.outbox
    }

    pub fn fail_next(&self, count: usize) {
        self.lock().failures_left = count;
    }

    pub fn company_profile(&self, user_id: i64) -> Option<CompanyBasicProfile> {
        self.lock().companies.get(&user_id).cloned()
    }

    pub fn jobseeker_profile(&self, user_id: i64) -> Option<JobseekerProfile> {
        self.lock().jobseekers.get(&user_id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Profiles> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn checked(&self) -> Result<MutexGuard<'_, Profiles>, StoreError> {
        let mut guard = self.lock();
        if guard.failures_left > 0 {
            guard.failures_left -= 1;
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(guard)
    }
}

#[async_trait]
impl RegistrationStore for InMemoryRegistrationStore {
    async fn save_company_profile(
        &self,
        profile: &CompanyBasicProfile,
        event: &OutboxRecord,
    ) -> Result<(), StoreError> {
        let mut guard = self.checked()?;
        guard.companies.insert(profile.user_id, profile.clone());
        self.outbox.enqueue(event.clone());
        Ok(())
    }

    async fn save_jobseeker_profile(
        &self,
        profile: &JobseekerProfile,
        event: &OutboxRecord,
    ) -> Result<(), StoreError> {
        let mut guard = self.checked()?;
        guard.jobseekers.insert(profile.user_id, profile.clone());
        self.outbox.enqueue(event.clone());
        Ok(())
    }
}
