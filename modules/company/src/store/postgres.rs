use async_trait::async_trait;
use event_bus::outbox::{enqueue_in_tx, OutboxRecord};
use event_bus::{CompanyChange, CompanyRegistered, Event};
use sqlx::PgPool;

use super::{CompanyStore, StoreError};
use crate::models::{Company, NewCompany};

const SLUG_CONSTRAINT: &str = "companies_slug_key";

const COMPANY_COLUMNS: &str = "id, user_id, name, slug, email, phone, website, industry, address, \
     logo_url, country_code, contact_name, company_size, is_verified, created_at, updated_at";

#[derive(Clone)]
pub struct PgCompanyStore {
    pool: PgPool,
}

impl PgCompanyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_insert_error(err: sqlx::Error, slug: &str) -> StoreError {
    let slug_conflict = err
        .as_database_error()
        .and_then(|db| db.constraint())
        .is_some_and(|constraint| constraint == SLUG_CONSTRAINT);

    if slug_conflict {
        StoreError::SlugTaken(slug.to_string())
    } else {
        StoreError::Database(err)
    }
}

#[async_trait]
impl CompanyStore for PgCompanyStore {
    async fn find_by_user_id(&self, user_id: i64) -> Result<Option<Company>, StoreError> {
        let company = sqlx::query_as::<_, Company>(&format!(
            "SELECT {COMPANY_COLUMNS} FROM companies WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(company)
    }

    async fn create_with_event(
        &self,
        company: NewCompany,
        registration: &CompanyRegistered,
    ) -> Result<Option<Company>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query_as::<_, Company>(&format!(
            r#"
            INSERT INTO companies (
                user_id, name, slug, email, phone, website, industry, address,
                logo_url, country_code, contact_name, company_size
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (user_id) DO NOTHING
            RETURNING {COMPANY_COLUMNS}
            "#
        ))
        .bind(company.user_id)
        .bind(&company.name)
        .bind(&company.slug)
        .bind(&company.email)
        .bind(&company.phone)
        .bind(&company.website)
        .bind(&company.industry)
        .bind(&company.address)
        .bind(&company.logo_url)
        .bind(&company.country_code)
        .bind(&company.contact_name)
        .bind(&company.company_size)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_insert_error(e, &company.slug))?;

        let Some(created) = created else {
            tx.rollback().await?;
            return Ok(None);
        };

        let record = OutboxRecord::from_event(Event::CompanyRegistered(
            registration.enriched(created.id),
        ))?;
        enqueue_in_tx(&mut tx, &record).await?;

        tx.commit().await?;
        Ok(Some(created))
    }

    async fn apply_changes(
        &self,
        user_id: i64,
        changes: &[CompanyChange],
    ) -> Result<Option<Company>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, Company>(&format!(
            "SELECT {COMPANY_COLUMNS} FROM companies WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut company) = existing else {
            tx.rollback().await?;
            return Ok(None);
        };

        for change in changes {
            company.apply(change);
        }

        let updated = sqlx::query_as::<_, Company>(&format!(
            r#"
            UPDATE companies
            SET name = $2, email = $3, phone = $4, website = $5, industry = $6,
                address = $7, logo_url = $8, country_code = $9, contact_name = $10,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING {COMPANY_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(&company.name)
        .bind(&company.email)
        .bind(&company.phone)
        .bind(&company.website)
        .bind(&company.industry)
        .bind(&company.address)
        .bind(&company.logo_url)
        .bind(&company.country_code)
        .bind(&company.contact_name)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn delete_by_user_id(&self, user_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM companies WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
