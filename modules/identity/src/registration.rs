//! Origin hop of the registration flows
//!
//! Registration handlers call into [`RegistrationEvents`] once a user has
//! finished setup. The profile is saved and its event staged in the outbox;
//! the relay publishes it afterwards.

use std::sync::Arc;

use event_bus::outbox::{OutboxError, OutboxRecord};

use crate::models::{CompanyBasicProfile, JobseekerProfile};
use crate::store::{RegistrationStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("invalid registration: {0}")]
    Invalid(String),

    #[error("failed to stage event: {0}")]
    Staging(#[from] OutboxError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct RegistrationEvents {
    store: Arc<dyn RegistrationStore>,
}

impl RegistrationEvents {
    pub fn new(store: Arc<dyn RegistrationStore>) -> Self {
        Self { store }
    }

    /// Save the company basic profile and stage the origin `company.registered`
    ///
    /// Returns the staged event id.
    pub async fn company_setup_completed(
        &self,
        profile: &CompanyBasicProfile,
    ) -> Result<String, RegistrationError> {
        validate_user_id(profile.user_id)?;
        if profile.company_name.trim().is_empty() {
            return Err(RegistrationError::Invalid("company_name cannot be empty".to_string()));
        }

        let record = OutboxRecord::from_event(profile.registered_event())?;
        self.store.save_company_profile(profile, &record).await?;

        tracing::info!(
            user_id = profile.user_id,
            event_id = %record.event_id,
            event_type = %record.event_type,
            "Company registration staged"
        );
        Ok(record.event_id)
    }

    /// Save the job seeker profile and stage `user.registered`
    pub async fn jobseeker_registered(
        &self,
        profile: &JobseekerProfile,
    ) -> Result<String, RegistrationError> {
        validate_user_id(profile.user_id)?;
        if profile.full_name.trim().is_empty() {
            return Err(RegistrationError::Invalid("full_name cannot be empty".to_string()));
        }

        let record = OutboxRecord::from_event(profile.registered_event())?;
        self.store.save_jobseeker_profile(profile, &record).await?;

        tracing::info!(
            user_id = profile.user_id,
            event_id = %record.event_id,
            event_type = %record.event_type,
            "User registration staged"
        );
        Ok(record.event_id)
    }
}

fn validate_user_id(user_id: i64) -> Result<(), RegistrationError> {
    if user_id <= 0 {
        return Err(RegistrationError::Invalid(format!("user_id must be positive, got {user_id}")));
    }
    Ok(())
}
