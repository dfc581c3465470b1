pub mod models;
pub mod registration;
pub mod store;

pub use registration::{RegistrationError, RegistrationEvents};
