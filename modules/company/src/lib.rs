pub mod consumer;
pub mod models;
pub mod slug;
pub mod store;

pub use consumer::start_company_event_consumer;
