pub mod admin;
pub mod audit;
pub mod field;
pub mod identity;
pub mod matcher;
pub mod service_request;
pub mod validate;
pub mod weather;
