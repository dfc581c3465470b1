use event_bus::{CompanyRegistered, Event, UserRegistered};
use serde::{Deserialize, Serialize};

/// What a company user fills in when finishing account setup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CompanyBasicProfile {
    pub user_id: i64,
    pub company_name: String,
    pub email: String,
    pub phone: String,
    pub website: String,
    pub industry: Vec<String>,
    pub address: String,
    pub logo_url: String,
    pub country_code: String,
    pub contact_name: String,
}

impl CompanyBasicProfile {
    /// The origin copy of `company.registered`; the company id is not known yet
    pub fn registered_event(&self) -> Event {
        Event::CompanyRegistered(CompanyRegistered {
            user_id: self.user_id,
            company_id: None,
            company_name: self.company_name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            website: self.website.clone(),
            industry: self.industry.clone(),
            address: self.address.clone(),
            logo_url: self.logo_url.clone(),
            country_code: self.country_code.clone(),
            contact_name: self.contact_name.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobseekerProfile {
    pub user_id: i64,
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
    pub profile_photo_url: Option<String>,
}

impl JobseekerProfile {
    pub fn registered_event(&self) -> Event {
        Event::UserRegistered(UserRegistered {
            user_id: self.user_id,
            full_name: self.full_name.clone(),
            email: self.email.clone(),
            phone_number: self.phone_number.clone(),
            profile_photo_url: self.profile_photo_url.clone(),
        })
    }
}
