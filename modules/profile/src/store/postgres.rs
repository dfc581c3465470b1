use async_trait::async_trait;
use sqlx::PgPool;

use super::{ProfileStore, StoreError};
use crate::models::{CandidateProfile, NewProfile};

#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn find_by_user_id(&self, user_id: i64) -> Result<Option<CandidateProfile>, StoreError> {
        let profile = sqlx::query_as::<_, CandidateProfile>(
            r#"
            SELECT id, user_id, full_name, email, phone_number, profile_picture_url,
                   created_at, updated_at
            FROM candidate_profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(profile)
    }

    async fn create(&self, profile: NewProfile) -> Result<Option<CandidateProfile>, StoreError> {
        let created = sqlx::query_as::<_, CandidateProfile>(
            r#"
            INSERT INTO candidate_profiles (user_id, full_name, email, phone_number, profile_picture_url)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO NOTHING
            RETURNING id, user_id, full_name, email, phone_number, profile_picture_url,
                      created_at, updated_at
            "#,
        )
        .bind(profile.user_id)
        .bind(&profile.full_name)
        .bind(&profile.email)
        .bind(&profile.phone_number)
        .bind(&profile.profile_picture_url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(created)
    }

    async fn update_photo(&self, user_id: i64, url: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE candidate_profiles
            SET profile_picture_url = $2, updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(url)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
