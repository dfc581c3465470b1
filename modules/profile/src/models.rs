use chrono::{DateTime, Utc};
use event_bus::UserRegistered;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CandidateProfile {
    pub id: i64,
    pub user_id: i64,
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
    pub profile_picture_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProfile {
    pub user_id: i64,
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
    pub profile_picture_url: Option<String>,
}

impl From<&UserRegistered> for NewProfile {
    fn from(event: &UserRegistered) -> Self {
        Self {
            user_id: event.user_id,
            full_name: event.full_name.clone(),
            email: event.email.clone(),
            phone_number: event.phone_number.clone(),
            profile_picture_url: event
                .profile_photo_url
                .clone()
                .filter(|url| !url.is_empty()),
        }
    }
}
