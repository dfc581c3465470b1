use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Local copy of "which company does this user represent"
///
/// Written only by the company event consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CompanyMapping {
    pub user_id: i64,
    pub company_id: i64,
    pub company_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
