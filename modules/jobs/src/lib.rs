pub mod consumer;
pub mod directory;
pub mod models;
pub mod store;

pub use consumer::start_company_projection_consumer;
pub use directory::CompanyDirectory;
