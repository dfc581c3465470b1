pub mod consumer;
pub mod models;
pub mod store;

pub use consumer::start_user_event_consumer;
