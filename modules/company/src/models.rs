use chrono::{DateTime, Utc};
use event_bus::{CompanyChange, CompanyRegistered};
use serde::{Deserialize, Serialize};

/// Size bracket assigned to companies created from a registration
pub const DEFAULT_COMPANY_SIZE: &str = "1-10";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Company {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub slug: String,
    pub email: String,
    pub phone: String,
    pub website: String,
    pub industry: Vec<String>,
    pub address: String,
    pub logo_url: String,
    pub country_code: String,
    pub contact_name: String,
    pub company_size: String,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Company {
    /// Apply one change in place. `Linked` carries an id owned by this
    /// service and is ignored here.
    pub fn apply(&mut self, change: &CompanyChange) {
        match change {
            CompanyChange::Renamed { company_name } => self.name = company_name.clone(),
            CompanyChange::ContactChanged {
                email,
                phone,
                website,
                contact_name,
            } => {
                if let Some(email) = email {
                    self.email = email.clone();
                }
                if let Some(phone) = phone {
                    self.phone = phone.clone();
                }
                if let Some(website) = website {
                    self.website = website.clone();
                }
                if let Some(contact_name) = contact_name {
                    self.contact_name = contact_name.clone();
                }
            }
            CompanyChange::AddressChanged {
                address,
                country_code,
            } => {
                self.address = address.clone();
                if let Some(country_code) = country_code {
                    self.country_code = country_code.clone();
                }
            }
            CompanyChange::IndustriesChanged { industry } => self.industry = industry.clone(),
            CompanyChange::LogoChanged { logo_url } => self.logo_url = logo_url.clone(),
            CompanyChange::Linked { .. } => {}
        }
    }
}

/// Insert payload for a company created from a registration
#[derive(Debug, Clone, PartialEq)]
pub struct NewCompany {
    pub user_id: i64,
    pub name: String,
    pub slug: String,
    pub email: String,
    pub phone: String,
    pub website: String,
    pub industry: Vec<String>,
    pub address: String,
    pub logo_url: String,
    pub country_code: String,
    pub contact_name: String,
    pub company_size: String,
}

impl NewCompany {
    pub fn from_registration(registration: &CompanyRegistered, slug: String) -> Self {
        Self {
            user_id: registration.user_id,
            name: registration.company_name.clone(),
            slug,
            email: registration.email.clone(),
            phone: registration.phone.clone(),
            website: registration.website.clone(),
            industry: registration.industry.clone(),
            address: registration.address.clone(),
            logo_url: registration.logo_url.clone(),
            country_code: registration.country_code.clone(),
            contact_name: registration.contact_name.clone(),
            company_size: DEFAULT_COMPANY_SIZE.to_string(),
        }
    }

    pub fn with_slug(self, slug: String) -> Self {
        Self { slug, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company() -> Company {
        Company {
            id: 7,
            user_id: 42,
            name: "Acme".into(),
            slug: "acme".into(),
            email: "hr@acme.test".into(),
            phone: String::new(),
            website: String::new(),
            industry: vec!["Manufacturing".into()],
            address: "1 Main St".into(),
            logo_url: String::new(),
            country_code: "US".into(),
            contact_name: "Jane".into(),
            company_size: DEFAULT_COMPANY_SIZE.into(),
            is_verified: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_partial_contact_change_keeps_other_fields() {
        let mut c = company();
        c.apply(&CompanyChange::ContactChanged {
            email: None,
            phone: Some("555-0100".into()),
            website: None,
            contact_name: None,
        });
        assert_eq!(c.phone, "555-0100");
        assert_eq!(c.email, "hr@acme.test");
    }

    #[test]
    fn test_rename_keeps_slug() {
        let mut c = company();
        c.apply(&CompanyChange::Renamed { company_name: "Acme Inc".into() });
        assert_eq!(c.name, "Acme Inc");
        assert_eq!(c.slug, "acme");
    }

    #[test]
    fn test_linked_is_ignored() {
        let mut c = company();
        let before = c.clone();
        c.apply(&CompanyChange::Linked { company_id: 99, company_name: "Other".into() });
        assert_eq!(c, before);
    }

    #[test]
    fn test_new_company_defaults_size() {
        let registration = CompanyRegistered {
            user_id: 42,
            company_name: "Acme".into(),
            ..Default::default()
        };
        let new = NewCompany::from_registration(&registration, "acme".into());
        assert_eq!(new.company_size, "1-10");
        assert_eq!(new.user_id, 42);
    }
}
