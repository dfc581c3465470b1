use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::{ProfileStore, StoreError};
use crate::models::{CandidateProfile, NewProfile};

#[derive(Default)]
struct Profiles {
    by_user: BTreeMap<i64, CandidateProfile>,
    next_id: i64,
    failures_left: usize,
}

#[derive(Clone, Default)]
pub struct InMemoryProfileStore {
    inner: Arc<Mutex<Profiles>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: usize) {
        self.lock().failures_left = count;
    }

    pub fn get(&self, user_id: i64) -> Option<CandidateProfile> {
        self.lock().by_user.get(&user_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
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
impl ProfileStore for InMemoryProfileStore {
    async fn find_by_user_id(&self, user_id: i64) -> Result<Option<CandidateProfile>, StoreError> {
        Ok(self.checked()?.by_user.get(&user_id).cloned())
    }

    async fn create(&self, profile: NewProfile) -> Result<Option<CandidateProfile>, StoreError> {
        let mut guard = self.checked()?;
        if guard.by_user.contains_key(&profile.user_id) {
            return Ok(None);
        }

        guard.next_id += 1;
        let now = Utc::now();
        let created = CandidateProfile {
            id: guard.next_id,
            user_id: profile.user_id,
            full_name: profile.full_name,
            email: profile.email,
            phone_number: profile.phone_number,
            profile_picture_url: profile.profile_picture_url,
            created_at: now,
            updated_at: now,
        };
        guard.by_user.insert(created.user_id, created.clone());
        Ok(Some(created))
    }

    async fn update_photo(&self, user_id: i64, url: &str) -> Result<bool, StoreError> {
        let mut guard = self.checked()?;
        let Some(profile) = guard.by_user.get_mut(&user_id) else {
            return Ok(false);
        };
        profile.profile_picture_url = Some(url.to_string());
        profile.updated_at = Utc::now();
        Ok(true)
    }
}
