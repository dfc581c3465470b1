use async_trait::async_trait;
use sqlx::PgPool;

use super::{CompanyMappingStore, StoreError};
use crate::models::CompanyMapping;

#[derive(Clone)]
pub struct PgCompanyMappingStore {
    pool: PgPool,
}

impl PgCompanyMappingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CompanyMappingStore for PgCompanyMappingStore {
    async fn find_by_user_id(&self, user_id: i64) -> Result<Option<CompanyMapping>, StoreError> {
        let mapping = sqlx::query_as::<_, CompanyMapping>(
            r#"
            SELECT user_id, company_id, company_name, created_at, updated_at
            FROM company_mappings
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(mapping)
    }

    async fn upsert(
        &self,
        user_id: i64,
        company_id: i64,
        company_name: &str,
    ) -> Result<CompanyMapping, StoreError> {
        // The WHERE clause skips no-op updates, in which case nothing is
        // returned and the stored row is read back.
        let written = sqlx::query_as::<_, CompanyMapping>(
            r#"
            INSERT INTO company_mappings (user_id, company_id, company_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE
            SET company_id = EXCLUDED.company_id,
                company_name = EXCLUDED.company_name,
                updated_at = NOW()
            WHERE (company_mappings.company_id, company_mappings.company_name)
                IS DISTINCT FROM (EXCLUDED.company_id, EXCLUDED.company_name)
            RETURNING user_id, company_id, company_name, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(company_id)
        .bind(company_name)
        .fetch_optional(&self.pool)
        .await?;

        match written {
            Some(mapping) => Ok(mapping),
            None => self
                .find_by_user_id(user_id)
                .await?
                .ok_or_else(|| StoreError::Unavailable(format!("mapping for user {user_id} vanished"))),
        }
    }

    async fn rename(&self, user_id: i64, company_name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE company_mappings
            SET company_name = $2, updated_at = NOW()
            WHERE user_id = $1 AND company_name IS DISTINCT FROM $2
            "#,
        )
        .bind(user_id)
        .bind(company_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        Ok(self.find_by_user_id(user_id).await?.is_some())
    }

    async fn delete_by_user_id(&self, user_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM company_mappings WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
