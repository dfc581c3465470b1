use async_trait::async_trait;
use event_bus::outbox::{enqueue_in_tx, OutboxRecord};
use sqlx::PgPool;

use super::{RegistrationStore, StoreError};
use crate::models::{CompanyBasicProfile, JobseekerProfile};

#[derive(Clone)]
pub struct PgRegistrationStore {
    pool: PgPool,
}

impl PgRegistrationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RegistrationStore for PgRegistrationStore {
    async fn save_company_profile(
        &self,
        profile: &CompanyBasicProfile,
        event: &OutboxRecord,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO company_basic_profiles (
                user_id, company_name, email, phone, website, industry, address,
                logo_url, country_code, contact_name
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (user_id) DO UPDATE SET
                company_name = EXCLUDED.company_name,
                email = EXCLUDED.email,
                phone = EXCLUDED.phone,
                website = EXCLUDED.website,
                industry = EXCLUDED.industry,
                address = EXCLUDED.address,
                logo_url = EXCLUDED.logo_url,
                country_code = EXCLUDED.country_code,
                contact_name = EXCLUDED.contact_name,
                updated_at = NOW()
            "#,
        )
        .bind(profile.user_id)
        .bind(&profile.company_name)
        .bind(&profile.email)
        .bind(&profile.phone)
        .bind(&profile.website)
        .bind(&profile.industry)
        .bind(&profile.address)
        .bind(&profile.logo_url)
        .bind(&profile.country_code)
        .bind(&profile.contact_name)
        .execute(&mut *tx)
        .await?;

        enqueue_in_tx(&mut tx, event).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn save_jobseeker_profile(
        &self,
        profile: &JobseekerProfile,
        event: &OutboxRecord,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO jobseeker_profiles (user_id, full_name, email, phone_number, profile_photo_url)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE SET
                full_name = EXCLUDED.full_name,
                email = EXCLUDED.email,
                phone_number = EXCLUDED.phone_number,
                profile_photo_url = EXCLUDED.profile_photo_url,
                updated_at = NOW()
            "#,
        )
        .bind(profile.user_id)
        .bind(&profile.full_name)
        .bind(&profile.email)
        .bind(&profile.phone_number)
        .bind(&profile.profile_photo_url)
        .execute(&mut *tx)
        .await?;

        enqueue_in_tx(&mut tx, event).await?;

        tx.commit().await?;
        Ok(())
    }
}
